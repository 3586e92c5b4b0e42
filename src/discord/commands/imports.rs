// Import levels and role rewards from other leveling bots.

use super::leveling::{cached_member_ids, confirm, guild_id_of, reply_error};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;
use std::collections::HashSet;

/// Pages fetched when importing levels (999 players each).
const DEFAULT_IMPORT_PAGES: u32 = 5;

/// Copy levels over from another bot.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("mee6levels", "mee6roles", "tatsulevels")
)]
pub async fn lvlimport(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Member ids from the cache, falling back to the members endpoint.
async fn member_ids(ctx: &Context<'_>, guild_id: u64) -> Result<HashSet<u64>, Error> {
    if let Some(members) = cached_member_ids(ctx) {
        return Ok(members);
    }

    let members = ctx
        .http()
        .get_guild_members(serenity::GuildId::new(guild_id), Some(1000), None)
        .await?;
    Ok(members.iter().map(|member| member.user.id.get()).collect())
}

/// Bulk imports ping everyone who levels up while mentions are on, so ask
/// first. Returns whether to go ahead.
async fn confirm_bulk_import(ctx: Context<'_>, guild_id: u64) -> Result<bool, Error> {
    let settings = match ctx.data().leveling.settings(guild_id).await {
        Ok(settings) => settings,
        Err(err) => {
            reply_error(ctx, err).await?;
            return Ok(false);
        }
    };
    if !settings.mentions {
        return Ok(true);
    }

    let prompt = format!(
        "{}, level-up mentions are on in this server. Everyone leveled up by this import will be pinged. Continue?",
        ctx.author().name
    );
    if confirm(ctx, prompt).await? {
        return Ok(true);
    }
    ctx.say("Import cancelled. Turn mentions off with `lvladmin toggle` first if you want a quiet import.")
        .await?;
    Ok(false)
}

fn summary_text(service: &str, imported: usize, skipped: usize, failed: usize) -> String {
    let mut text = format!(
        "{} levels imported for **{}** members ({} players skipped because they left the server).",
        service, imported, skipped
    );
    if failed > 0 {
        text.push_str(&format!(
            "\n{} players could not be imported, see the bot logs.",
            failed
        ));
    }
    text
}

/// Set every member's level to their Mee6 level. The Mee6 leaderboard must be public.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn mee6levels(
    ctx: Context<'_>,
    #[description = "Leaderboard pages to read (999 players each)"]
    #[min = 1]
    #[max = 20]
    pages: Option<u32>,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    ctx.defer().await?;
    if !confirm_bulk_import(ctx, guild_id).await? {
        return Ok(());
    }

    let members = member_ids(&ctx, guild_id).await?;
    let source = ctx.data().mee6.clone();
    match ctx
        .data()
        .leveling
        .import_mee6_levels(
            source.as_ref(),
            guild_id,
            pages.unwrap_or(DEFAULT_IMPORT_PAGES),
            &members,
            Some(ctx.channel_id().get()),
        )
        .await
    {
        Ok(summary) => {
            ctx.say(summary_text("Mee6", summary.imported, summary.skipped, summary.failed))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Set every member's level from their Tatsumaki score.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn tatsulevels(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let Some(source) = ctx.data().tatsu.clone() else {
        ctx.say("No Tatsumaki API key is set up. Add `TATSUMAKI_API_KEY` to the bot's environment first.")
            .await?;
        return Ok(());
    };
    ctx.defer().await?;
    if !confirm_bulk_import(ctx, guild_id).await? {
        return Ok(());
    }

    let members = member_ids(&ctx, guild_id).await?;
    match ctx
        .data()
        .leveling
        .import_tatsu_levels(
            source.as_ref(),
            guild_id,
            &members,
            Some(ctx.channel_id().get()),
        )
        .await
    {
        Ok(summary) => {
            ctx.say(summary_text(
                "Tatsumaki",
                summary.imported,
                summary.skipped,
                summary.failed,
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Link the server's Mee6 role rewards as leveler role links.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn mee6roles(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    ctx.defer().await?;

    let cached: Option<HashSet<String>> = ctx
        .guild()
        .map(|guild| guild.roles.values().map(|role| role.name.clone()).collect());
    let role_names = match cached {
        Some(names) => names,
        None => ctx
            .http()
            .get_guild_roles(serenity::GuildId::new(guild_id))
            .await?
            .into_iter()
            .map(|role| role.name)
            .collect(),
    };

    let source = ctx.data().mee6.clone();
    match ctx
        .data()
        .leveling
        .import_mee6_roles(source.as_ref(), guild_id, &role_names)
        .await
    {
        Ok((linked, missing)) => {
            let mut text = if linked.is_empty() {
                "No Mee6 role rewards were linked.".to_string()
            } else {
                let list = linked
                    .iter()
                    .map(|link| format!("`{}` at level {}", link.role_name, link.level))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Linked {} roles: {}", linked.len(), list)
            };
            if !missing.is_empty() {
                text.push_str(&format!(
                    "\nThese roles don't exist here and were skipped: {}",
                    missing.join(", ")
                ));
            }
            ctx.say(text).await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_only_mentioned_when_present() {
        let clean = summary_text("Mee6", 4, 1, 0);
        assert!(clean.contains("**4** members"));
        assert!(!clean.contains("could not"));
        assert!(summary_text("Tatsumaki", 4, 1, 2).contains("2 players could not be imported"));
    }
}
