// Discord commands for the leveling system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::leveling::leveling_math::{
    cumulative_experience_for_level, level_for_cumulative_experience, required_experience,
};
use crate::core::leveling::leveling_service::format_wait;
use crate::core::leveling::{
    BoardMetric, BoardScope, Leaderboard, LevelingError, LevelingService, MessageQueue, RepParty,
};
use crate::discord::leveling::leveling_announcements::{build_progress_bar, level_color};
use crate::infra::leveling::{JsonSettingsStore, SqliteLevelStore};
use crate::infra::mee6::Mee6Client;
use crate::infra::tatsu::TatsuClient;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::collections::HashSet;
use std::sync::Arc;

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub type Leveling = LevelingService<SqliteLevelStore, JsonSettingsStore>;

/// Data that's shared across all commands.
pub struct Data {
    pub leveling: Arc<Leveling>,
    /// Producer side of the chat message queue.
    pub queue: MessageQueue,
    pub mee6: Arc<Mee6Client>,
    /// Present when a Tatsumaki API key is configured.
    pub tatsu: Option<Arc<TatsuClient>>,
}

/// Turn a leveling error into a reply. Storage problems are logged and
/// replaced with a generic message; everything else is shown as-is.
pub async fn reply_error(ctx: Context<'_>, err: LevelingError) -> Result<(), Error> {
    let content = match &err {
        LevelingError::Storage(inner) => {
            tracing::error!(command = %ctx.command().qualified_name, error = %inner, "Leveling storage error");
            "Something went wrong while talking to the leveling database.".to_string()
        }
        _ => err.to_string(),
    };
    ctx.send(poise::CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Guild members known to the cache. `None` when the cache has no member list,
/// in which case guild boards are not filtered.
pub fn cached_member_ids(ctx: &Context<'_>) -> Option<HashSet<u64>> {
    let guild = ctx.guild()?;
    if guild.members.is_empty() {
        return None;
    }
    Some(guild.members.keys().map(|id| id.get()).collect())
}

/// Ask the author a yes/no question with buttons. Times out as "no".
pub async fn confirm(ctx: Context<'_>, prompt: String) -> Result<bool, Error> {
    let buttons = |disabled: bool| {
        vec![serenity::CreateActionRow::Buttons(vec![
            serenity::CreateButton::new("confirm_yes")
                .label("Yes")
                .style(serenity::ButtonStyle::Success)
                .disabled(disabled),
            serenity::CreateButton::new("confirm_no")
                .label("No")
                .style(serenity::ButtonStyle::Danger)
                .disabled(disabled),
        ])]
    };

    let msg = ctx
        .send(
            poise::CreateReply::default()
                .content(prompt.clone())
                .components(buttons(false)),
        )
        .await?;
    let msg_id = msg.message().await?.id;

    let answer = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(std::time::Duration::from_secs(15))
        .filter(move |mci| mci.message.id == msg_id)
        .await;

    let confirmed = match answer {
        Some(mci) => {
            if let Err(e) = mci.defer(ctx.http()).await {
                tracing::warn!("Error deferring confirmation interaction: {:?}", e);
            }
            mci.data.custom_id == "confirm_yes"
        }
        None => false,
    };

    let _ = msg
        .edit(
            ctx,
            poise::CreateReply::default()
                .content(prompt)
                .components(buttons(true)),
        )
        .await;
    Ok(confirmed)
}

pub fn guild_id_of(ctx: &Context<'_>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get())
}

/// Show a member's level, experience, reputation and ranks.
#[poise::command(slash_command, prefix_command, guild_only, aliases("rank", "level"))]
pub async fn profile(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target_user = user.as_ref().unwrap_or_else(|| ctx.author());
    let guild_id = guild_id_of(&ctx)?;

    if target_user.bot {
        ctx.say("Bots don't have profiles! 🤖").await?;
        return Ok(());
    }

    let members = cached_member_ids(&ctx);
    let view = match ctx
        .data()
        .leveling
        .profile(guild_id, target_user.id.get(), &target_user.name, members.as_ref())
        .await
    {
        Ok(view) => view,
        Err(err) => return reply_error(ctx, err).await,
    };

    let required = view.required.max(1);
    let progress = view.progress.current_exp as f64 / required as f64;

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Profile of {}", target_user.name))
        .color(level_color(view.progress.level))
        .thumbnail(target_user.face())
        .field("Level", format!("**{}**", view.progress.level), true)
        .field("Server XP", view.server_exp.to_string(), true)
        .field("Total XP", view.record.total_exp.to_string(), true)
        .field(
            "Progress",
            format!(
                "{}/{} XP\n{}",
                view.progress.current_exp,
                view.required,
                build_progress_bar(progress, 15)
            ),
            false,
        )
        .field(
            "Server rank",
            format!("{} (rep {})", view.server_rank, view.server_rep_rank),
            true,
        )
        .field(
            "Global rank",
            format!("{} (rep {})", view.global_rank, view.global_rep_rank),
            true,
        )
        .field("Reputation", format!("+{}", view.record.rep), true)
        .field("Info", view.record.info.clone(), false);

    if !view.record.title.is_empty() {
        embed = embed.description(format!("*{}*", view.record.title));
    }
    // Priority 0 keeps a badge off the card and -1 hides it.
    let mut badges: Vec<_> = view
        .record
        .badges
        .values()
        .filter(|badge| badge.priority_num > 0)
        .collect();
    if !badges.is_empty() {
        badges.sort_by_key(|badge| std::cmp::Reverse(badge.priority_num));
        let names = badges
            .iter()
            .map(|badge| badge.badge.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        embed = embed.field("Badges", names, false);
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn render_page(board: &Leaderboard, page: usize, title: &str, viewer: u64) -> Option<serenity::CreateEmbed> {
    let page = board.page(page).ok()?;
    let unit = match board.query.metric {
        BoardMetric::Experience => "XP",
        BoardMetric::Reputation => "rep",
    };

    let mut description = String::new();
    for (index, entry) in page.entries.iter().enumerate() {
        let rank = page.first_rank + index;
        let medal = match rank {
            1 => "🥇",
            2 => "🥈",
            3 => "🥉",
            _ => "  ",
        };
        let name = if entry.user_id == viewer {
            format!("**{}** (You)", entry.username)
        } else {
            entry.username.clone()
        };
        description.push_str(&format!(
            "{} `#{}` {} | {} {}\n",
            medal, rank, name, entry.value, unit
        ));
    }

    let your_rank = match board.value_of(viewer) {
        Some(value) => format!("{} ({} {})", board.rank_of(viewer), value, unit),
        None => board.rank_of(viewer).to_string(),
    };
    Some(
        serenity::CreateEmbed::new()
            .title(title)
            .description(description)
            .color(0xffd700)
            .footer(serenity::CreateEmbedFooter::new(format!(
                "Your rank: {} | Page {}/{}",
                your_rank, page.page, page.pages
            ))),
    )
}

fn page_buttons(page: usize, pages: usize) -> Vec<serenity::CreateActionRow> {
    vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new("prev")
            .label("◀ Previous")
            .style(serenity::ButtonStyle::Primary)
            .disabled(page <= 1),
        serenity::CreateButton::new("next")
            .label("Next ▶")
            .style(serenity::ButtonStyle::Primary)
            .disabled(page >= pages),
    ])]
}

/// Show the experience or reputation leaderboard.
#[poise::command(slash_command, prefix_command, guild_only, aliases("leaderboard"))]
pub async fn top(
    ctx: Context<'_>,
    #[description = "Rank every user the bot knows instead of this server"] global: Option<bool>,
    #[description = "Rank by reputation instead of experience"] rep: Option<bool>,
    #[description = "Page number (default: 1)"]
    #[min = 1]
    page: Option<usize>,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let scope = if global.unwrap_or(false) {
        BoardScope::Global
    } else {
        BoardScope::Guild(guild_id)
    };
    let metric = if rep.unwrap_or(false) {
        BoardMetric::Reputation
    } else {
        BoardMetric::Experience
    };

    ctx.defer().await?;

    let members = cached_member_ids(&ctx);
    let board = match ctx
        .data()
        .leveling
        .leaderboard(guild_id, scope, metric, members.as_ref())
        .await
    {
        Ok(board) => board,
        Err(err) => return reply_error(ctx, err).await,
    };

    let mut current_page = page.unwrap_or(1);
    if let Err(err) = board.page(current_page) {
        ctx.say(err.to_string()).await?;
        return Ok(());
    }
    let pages = board.page_count();

    let title = match (scope, metric) {
        (BoardScope::Global, BoardMetric::Experience) => "🌎 Global Leaderboard".to_string(),
        (BoardScope::Global, BoardMetric::Reputation) => "🌎 Global Rep Leaderboard".to_string(),
        (BoardScope::Guild(_), BoardMetric::Experience) => "📊 Server Leaderboard".to_string(),
        (BoardScope::Guild(_), BoardMetric::Reputation) => "📊 Server Rep Leaderboard".to_string(),
    };
    let viewer = ctx.author().id.get();

    let Some(embed) = render_page(&board, current_page, &title, viewer) else {
        return Ok(());
    };
    let msg = ctx
        .send(
            poise::CreateReply::default()
                .embed(embed)
                .components(page_buttons(current_page, pages)),
        )
        .await?;
    let msg_id = msg.message().await?.id;

    while let Some(mci) = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(std::time::Duration::from_secs(60 * 2))
        .filter(move |mci| mci.message.id == msg_id)
        .await
    {
        match mci.data.custom_id.as_str() {
            "prev" if current_page > 1 => current_page -= 1,
            "next" if current_page < pages => current_page += 1,
            _ => {}
        }

        if let Err(e) = mci.defer(ctx.http()).await {
            tracing::warn!("Error deferring leaderboard interaction: {:?}", e);
            continue;
        }

        let Some(embed) = render_page(&board, current_page, &title, viewer) else {
            continue;
        };
        if let Err(e) = msg
            .edit(
                ctx,
                poise::CreateReply::default()
                    .embed(embed)
                    .components(page_buttons(current_page, pages)),
            )
            .await
        {
            tracing::warn!("Error updating leaderboard: {:?}", e);
        }
    }

    // Remove the buttons once nobody is paging any more
    let _ = msg
        .edit(ctx, poise::CreateReply::default().components(vec![]))
        .await;

    Ok(())
}

/// Give a reputation point, or check when you can give the next one.
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn rep(
    ctx: Context<'_>,
    #[description = "User to give a rep to (leave empty to see your cooldown)"] user: Option<
        serenity::User,
    >,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let author = ctx.author();
    let now = Utc::now();

    let Some(receiver) = user else {
        match ctx.data().leveling.rep_status(author.id.get(), now).await {
            Ok(None) => {
                ctx.say("**You can give a rep!**").await?;
            }
            Ok(Some(remaining)) => {
                ctx.say(format!(
                    "You need to wait {} until you can give reputation again!",
                    format_wait(&remaining)
                ))
                .await?;
            }
            Err(err) => return reply_error(ctx, err).await,
        }
        return Ok(());
    };

    let giver = RepParty {
        user_id: author.id.get(),
        name: &author.name,
        is_bot: author.bot,
    };
    let target = RepParty {
        user_id: receiver.id.get(),
        name: &receiver.name,
        is_bot: receiver.bot,
    };

    match ctx.data().leveling.give_rep(guild_id, giver, target, now).await {
        Ok(gift) => {
            ctx.say(format!(
                "You have just given {} a reputation point! They now have **{}**.",
                receiver.name, gift.receiver_rep
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Show how many reputation points a member has.
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn reps(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target = user.as_ref().unwrap_or_else(|| ctx.author());
    if target.bot {
        ctx.say("Bots don't have a reputation, y'know.").await?;
        return Ok(());
    }
    let guild_id = guild_id_of(&ctx)?;

    match ctx
        .data()
        .leveling
        .rep_count(guild_id, target.id.get(), &target.name)
        .await
    {
        Ok(rep) => {
            ctx.say(format!("{} has {} reputation points.", target.name, rep))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Pay credits to reset your rep cooldown.
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn represet(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let author = ctx.author();
    match ctx
        .data()
        .leveling
        .reset_rep_cooldown(guild_id, author.id.get(), &author.name, Utc::now())
        .await
    {
        Ok(price) => {
            ctx.say(format!(
                "You reset your rep cooldown for ${}. You can give a rep now!",
                price
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Largest XP amount `lvlinfo` converts. Well past level 10 000.
const MAX_LOOKUP_XP: u64 = 10_000_000_000;

/// Show how much experience a level needs, or which level an amount of XP reaches.
#[poise::command(slash_command, prefix_command)]
pub async fn lvlinfo(
    ctx: Context<'_>,
    #[description = "Level to look up"]
    #[min = 0]
    #[max = 10000]
    level: Option<u32>,
    #[description = "Total XP to convert into a level"]
    #[min = 0]
    #[max = 10000000000u64]
    xp: Option<u64>,
) -> Result<(), Error> {
    if xp.is_some_and(|xp| xp > MAX_LOOKUP_XP) {
        ctx.say(format!("Please pick an amount of XP up to {}.", MAX_LOOKUP_XP))
            .await?;
        return Ok(());
    }

    let mut lines = Vec::new();
    if let Some(level) = level {
        lines.push(format!(
            "Level **{}** needs **{}** XP to complete and **{}** XP in total to reach.",
            level,
            required_experience(i64::from(level)),
            cumulative_experience_for_level(level)
        ));
    }
    if let Some(xp) = xp {
        let reached = level_for_cumulative_experience(xp);
        let left = cumulative_experience_for_level(reached + 1).saturating_sub(xp);
        lines.push(format!(
            "**{}** XP reaches level **{}** ({} XP short of level {}).",
            xp,
            reached,
            left,
            reached + 1
        ));
    }
    if lines.is_empty() {
        lines.push("Give me a level or an amount of XP to look up.".to_string());
    }
    ctx.say(lines.join("\n")).await?;
    Ok(())
}

/// Change what your profile shows.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands("profileset_info", "profileset_title")
)]
pub async fn profileset(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the info text on your profile.
#[poise::command(slash_command, prefix_command, guild_only, rename = "info")]
pub async fn profileset_info(
    ctx: Context<'_>,
    #[description = "A few words about you"]
    #[rest]
    info: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let author = ctx.author();
    match ctx
        .data()
        .leveling
        .set_info(guild_id, author.id.get(), &author.name, &info)
        .await
    {
        Ok(()) => {
            ctx.say("Your info section has been successfully set!").await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Set your profile title, or clear it by leaving it empty.
#[poise::command(slash_command, prefix_command, guild_only, rename = "title")]
pub async fn profileset_title(
    ctx: Context<'_>,
    #[description = "New title (leave empty to clear)"]
    #[rest]
    title: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let author = ctx.author();
    let cleared = title.as_deref().map_or(true, |title| title.trim().is_empty());
    match ctx
        .data()
        .leveling
        .set_title(guild_id, author.id.get(), &author.name, title.as_deref())
        .await
    {
        Ok(()) if cleared => {
            ctx.say("Your title has been successfully cleared!").await?;
        }
        Ok(()) => {
            ctx.say("Your title has been successfully set!").await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Delete everything the leveler stores about you.
#[poise::command(slash_command, prefix_command)]
pub async fn forgetme(ctx: Context<'_>) -> Result<(), Error> {
    match ctx.data().leveling.forget_user(ctx.author().id.get()).await {
        Ok(()) => {
            ctx.send(
                poise::CreateReply::default()
                    .content("Your leveling data has been cleared.")
                    .ephemeral(true),
            )
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}
