// Server-admin commands for the leveler.

use super::leveling::reply_error;
use crate::core::leveling::GuildToggle;
use crate::discord::{Context, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;
use poise::ChoiceParameter;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ToggleChoice {
    #[name = "Disable leveler"]
    Disabled,
    #[name = "Level-up alerts"]
    LevelUpAlerts,
    #[name = "Mention on level-up"]
    Mentions,
    #[name = "Text-only alerts"]
    TextOnly,
    #[name = "Private alerts"]
    PrivateAlerts,
}

impl From<ToggleChoice> for GuildToggle {
    fn from(choice: ToggleChoice) -> Self {
        match choice {
            ToggleChoice::Disabled => GuildToggle::Disabled,
            ToggleChoice::LevelUpAlerts => GuildToggle::LevelUpAlerts,
            ToggleChoice::Mentions => GuildToggle::Mentions,
            ToggleChoice::TextOnly => GuildToggle::TextOnly,
            ToggleChoice::PrivateAlerts => GuildToggle::PrivateAlerts,
        }
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "enabled"
    } else {
        "disabled"
    }
}

/// Leveler settings for this server.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands(
        "toggle",
        "msgcredits",
        "xprange",
        "ignore",
        "lockchannel",
        "xpban",
        "setlevel",
        "setrep",
        "overview"
    )
)]
pub async fn lvladmin(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Flip one of the server's leveler switches.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "Setting to flip"] setting: ToggleChoice,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    match ctx.data().leveling.toggle(guild_id, setting.into()).await {
        Ok(value) => {
            ctx.say(format!("**{}** is now {}.", setting.name(), on_off(value)))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Credits earned per message that gives experience.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn msgcredits(
    ctx: Context<'_>,
    #[description = "Credits per message (0 - 1000)"] credits: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    match ctx.data().leveling.set_msg_credits(guild_id, credits).await {
        Ok(credits) => {
            ctx.say(format!("Credits per message logged set to `{}`.", credits))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Set the random xp range per message. Leave both empty to restore the default.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn xprange(
    ctx: Context<'_>,
    #[description = "Minimum xp per message"] min: Option<i64>,
    #[description = "Maximum xp per message"] max: Option<i64>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    let range = match (min, max) {
        (None, None) => None,
        (Some(min), Some(max)) => Some((min, max)),
        _ => {
            ctx.say("Please give both a minimum and a maximum, or neither to reset.")
                .await?;
            return Ok(());
        }
    };

    match ctx.data().leveling.set_xp_range(guild_id, range).await {
        Ok(range) => {
            ctx.say(format!(
                "XP range set to `{} - {}` per message.",
                range.min, range.max
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Stop or resume giving experience in a channel.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn ignore(
    ctx: Context<'_>,
    #[description = "Channel to toggle (defaults to this one)"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    let channel_id = channel
        .map(|channel| channel.id)
        .unwrap_or_else(|| ctx.channel_id());

    match ctx
        .data()
        .leveling
        .toggle_ignored_channel(guild_id, channel_id.get())
        .await
    {
        Ok(true) => {
            ctx.say(format!("<#{}> will no longer give experience.", channel_id))
                .await?;
        }
        Ok(false) => {
            ctx.say(format!("<#{}> gives experience again.", channel_id))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Send all public level-up alerts to one channel. Leave empty to unlock.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn lockchannel(
    ctx: Context<'_>,
    #[description = "Channel for level-up alerts"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    let channel_id = channel.map(|channel| channel.id);

    match ctx
        .data()
        .leveling
        .set_lock_channel(guild_id, channel_id.map(|id| id.get()))
        .await
    {
        Ok(()) => match channel_id {
            Some(id) => {
                ctx.say(format!("Level-up alerts are now locked to <#{}>.", id))
                    .await?;
            }
            None => {
                ctx.say("Level-up alert lock disabled.").await?;
            }
        },
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Block a user from earning message experience for a number of days.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn xpban(
    ctx: Context<'_>,
    #[description = "User to block"] user: serenity::User,
    #[description = "Days to block (0 lifts the ban)"] days: i64,
) -> Result<(), Error> {
    if user.bot {
        ctx.say("Bots don't earn experience anyway! 🤖").await?;
        return Ok(());
    }
    match ctx
        .data()
        .leveling
        .xp_ban(user.id.get(), &user.name, days, Utc::now())
        .await
    {
        Ok(until) => {
            ctx.say(format!(
                "{} can't earn message experience until <t:{}:f>.",
                user.name,
                until.timestamp()
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Set a user's level in this server.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setlevel(
    ctx: Context<'_>,
    #[description = "User to change"] user: serenity::User,
    #[description = "New level"] level: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    if user.bot {
        ctx.say("Bots don't have levels! 🤖").await?;
        return Ok(());
    }

    match ctx
        .data()
        .leveling
        .set_level(
            guild_id,
            user.id.get(),
            &user.name,
            level,
            Some(ctx.channel_id().get()),
        )
        .await
    {
        Ok(outcome) => {
            let mut text = format!(
                "{}'s level has been set to `{}` ({} total xp).",
                user.name,
                outcome.record.progress(guild_id).level,
                outcome.record.total_exp
            );
            for warning in &outcome.report.warnings {
                text.push_str(&format!("\n⚠️ {}", warning));
            }
            ctx.say(text).await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Set a user's reputation points.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn setrep(
    ctx: Context<'_>,
    #[description = "User to change"] user: serenity::User,
    #[description = "New reputation"] rep: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    if user.bot {
        ctx.say("Bots can't hold reputation! 🤖").await?;
        return Ok(());
    }
    match ctx
        .data()
        .leveling
        .set_rep(guild_id, user.id.get(), &user.name, rep)
        .await
    {
        Ok(rep) => {
            ctx.say(format!("{}'s reputation has been set to `{}`.", user.name, rep))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Discord rejects embed field values longer than this.
const FIELD_LIMIT: usize = 1024;

/// Join `items` for an embed field, dropping the tail once the field would
/// overflow and saying how many were left out.
fn fit_field(items: Vec<String>, separator: &str) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    let total = items.len();
    let mut value = String::new();
    for (shown, item) in items.iter().enumerate() {
        let candidate = if shown == 0 {
            item.clone()
        } else {
            format!("{}{}{}", value, separator, item)
        };
        let remaining = total - shown - 1;
        let tail = if remaining == 0 {
            String::new()
        } else {
            format!("{}…and {} more", separator, remaining)
        };
        // The previous round checked `value` plus this exact tail, so
        // falling back to it always fits.
        if candidate.chars().count() + tail.chars().count() > FIELD_LIMIT {
            let hidden = total - shown;
            if shown == 0 {
                return format!("…and {} more", hidden);
            }
            return format!("{}{}…and {} more", value, separator, hidden);
        }
        value = candidate;
    }
    value
}

/// Show every leveler setting for this server.
#[poise::command(slash_command, prefix_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn overview(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    let overview = match ctx.data().leveling.overview(guild_id).await {
        Ok(overview) => overview,
        Err(err) => return reply_error(ctx, err).await,
    };
    let settings = &overview.settings;

    let ignored = fit_field(
        settings
            .ignored_channels
            .iter()
            .map(|id| format!("<#{}>", id))
            .collect(),
        ", ",
    );
    let lock = settings
        .lvl_msg_lock
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "None".to_string());
    let rep_price = if overview.rep_price == 0 {
        "Not set".to_string()
    } else {
        format!("${}", overview.rep_price)
    };

    let switches = format!(
        "Leveler: **{}**\nLevel-up alerts: **{}**\nMentions: **{}**\nText only: **{}**\nPrivate alerts: **{}**",
        on_off(!settings.disabled),
        on_off(settings.lvl_msg),
        on_off(settings.mentions),
        on_off(settings.text_only),
        on_off(settings.private_lvl_message),
    );

    let mut role_links = overview.role_links.clone();
    role_links.sort_by_key(|link| link.level);
    let roles = fit_field(
        role_links
            .iter()
            .map(|link| match &link.remove_role {
                Some(remove) => format!("`{}` at {} (removes `{}`)", link.role_name, link.level, remove),
                None => format!("`{}` at {}", link.role_name, link.level),
            })
            .collect(),
        "\n",
    );

    let embed = serenity::CreateEmbed::new()
        .title("⚙️ Leveler Overview")
        .color(0x5865F2)
        .field("Switches", switches, false)
        .field(
            "XP per message",
            format!("{} - {}", settings.xp_range.min, settings.xp_range.max),
            true,
        )
        .field("Credits per message", settings.msg_credits.to_string(), true)
        .field("Rep reset price", rep_price, true)
        .field("Alert channel lock", lock, true)
        .field("Ignored channels", ignored, false)
        .field("Role links", roles, false)
        .field(
            "Badges",
            format!(
                "{} in catalogue, {} linked to levels",
                overview.badges.len(),
                overview.badge_links.len()
            ),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
