// Role and badge rewards that unlock at a level.

use super::leveling::{confirm, guild_id_of, reply_error};
use crate::core::leveling::{BadgePurchase, GuildBadge};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

// ============================================================================
// ROLE LINKS
// ============================================================================

/// Give members a role when they reach a level.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_ROLES",
    subcommands("rolelink_add", "rolelink_remove", "rolelink_list")
)]
pub async fn rolelink(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Link a role to a level, optionally removing another role at the same time.
#[poise::command(slash_command, prefix_command, guild_only, rename = "add", required_permissions = "MANAGE_ROLES")]
pub async fn rolelink_add(
    ctx: Context<'_>,
    #[description = "Role to give"] role: serenity::Role,
    #[description = "Level that unlocks the role"] level: i64,
    #[description = "Role to take away when this one is given"] remove: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let remove_name = remove.as_ref().map(|role| role.name.as_str());

    match ctx
        .data()
        .leveling
        .link_role(guild_id, &role.name, level, remove_name)
        .await
    {
        Ok(link) => {
            let mut text = format!(
                "The `{}` role has been linked to level `{}`",
                link.role_name, link.level
            );
            if let Some(remove) = &link.remove_role {
                text.push_str(&format!(" and will remove the `{}` role", remove));
            }
            text.push('.');
            ctx.say(text).await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Stop giving a role at a level.
#[poise::command(slash_command, prefix_command, guild_only, rename = "remove", required_permissions = "MANAGE_ROLES")]
pub async fn rolelink_remove(
    ctx: Context<'_>,
    #[description = "Role name"] role_name: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    match ctx.data().leveling.unlink_role(guild_id, &role_name).await {
        Ok(()) => {
            ctx.say(format!("Role link for `{}` removed.", role_name))
                .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// List every role link in this server.
#[poise::command(slash_command, prefix_command, guild_only, rename = "list")]
pub async fn rolelink_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let links = match ctx.data().leveling.list_role_links(guild_id).await {
        Ok(links) => links,
        Err(err) => return reply_error(ctx, err).await,
    };

    if links.is_empty() {
        ctx.say("No roles are linked to levels yet.").await?;
        return Ok(());
    }

    let description = links
        .iter()
        .map(|link| match &link.remove_role {
            Some(remove) => format!(
                "**{}** → level {} (removes {})",
                link.role_name, link.level, remove
            ),
            None => format!("**{}** → level {}", link.role_name, link.level),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let embed = serenity::CreateEmbed::new()
        .title("🔗 Role Links")
        .description(description)
        .color(0x5865F2);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

// ============================================================================
// BADGES
// ============================================================================

/// Manage this server's badge catalogue and badge rewards.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    subcommands(
        "badge_add",
        "badge_remove",
        "badge_list",
        "badge_link",
        "badge_unlink",
        "badge_links",
        "badge_give",
        "badge_take",
        "badge_buy",
        "badge_set"
    )
)]
pub async fn badge(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add or replace a badge in this server's catalogue.
#[poise::command(slash_command, prefix_command, guild_only, rename = "add", required_permissions = "ADMINISTRATOR")]
pub async fn badge_add(
    ctx: Context<'_>,
    #[description = "Badge name (no spaces)"] name: String,
    #[description = "Image url for the badge"] image: String,
    #[description = "Border colour, e.g. #ff9900"] border_color: String,
    #[description = "Price in credits (-1 for not purchasable)"] price: i64,
    #[description = "Description"] description: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let badge = GuildBadge {
        guild_id,
        name,
        description,
        bg_img: image,
        border_color,
        price,
    };
    let name = badge.name.clone();

    match ctx.data().leveling.add_badge(badge).await {
        Ok(()) => {
            ctx.say(format!("`{}` badge added.", name)).await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Delete a badge and take it away from everyone who has it.
#[poise::command(slash_command, prefix_command, guild_only, rename = "remove", required_permissions = "ADMINISTRATOR")]
pub async fn badge_remove(
    ctx: Context<'_>,
    #[description = "Badge name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    match ctx.data().leveling.remove_badge(guild_id, &name).await {
        Ok(stripped) => {
            ctx.say(format!(
                "The `{}` badge has been removed ({} members lost it).",
                name, stripped
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Show this server's badge catalogue.
#[poise::command(slash_command, prefix_command, guild_only, rename = "list")]
pub async fn badge_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let badges = match ctx.data().leveling.list_badges(guild_id).await {
        Ok(badges) => badges,
        Err(err) => return reply_error(ctx, err).await,
    };

    if badges.is_empty() {
        ctx.say("This server has no badges.").await?;
        return Ok(());
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("🏅 Badges")
        .color(0xffd700);
    for badge in badges.iter().take(25) {
        let price = if badge.price < 0 {
            "Not purchasable".to_string()
        } else {
            format!("${}", badge.price)
        };
        embed = embed.field(
            badge.name.clone(),
            format!("{}\n{}", badge.description, price),
            true,
        );
    }
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Award a badge when members reach a level.
#[poise::command(slash_command, prefix_command, guild_only, rename = "link", required_permissions = "ADMINISTRATOR")]
pub async fn badge_link(
    ctx: Context<'_>,
    #[description = "Badge name"] name: String,
    #[description = "Level that unlocks the badge"] level: i64,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    match ctx.data().leveling.link_badge(guild_id, &name, level).await {
        Ok(link) => {
            ctx.say(format!(
                "The `{}` badge has been linked to level `{}`.",
                link.badge_name, link.level
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Stop awarding a badge at a level.
#[poise::command(slash_command, prefix_command, guild_only, rename = "unlink", required_permissions = "ADMINISTRATOR")]
pub async fn badge_unlink(
    ctx: Context<'_>,
    #[description = "Badge name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    match ctx.data().leveling.unlink_badge(guild_id, &name).await {
        Ok(()) => {
            ctx.say(format!("Badge link for `{}` removed.", name)).await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// List badges that unlock at a level.
#[poise::command(slash_command, prefix_command, guild_only, rename = "links")]
pub async fn badge_links(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let links = match ctx.data().leveling.list_badge_links(guild_id).await {
        Ok(links) => links,
        Err(err) => return reply_error(ctx, err).await,
    };

    if links.is_empty() {
        ctx.say("No badges are linked to levels yet.").await?;
        return Ok(());
    }

    let description = links
        .iter()
        .map(|link| format!("**{}** → level {}", link.badge_name, link.level))
        .collect::<Vec<_>>()
        .join("\n");
    let embed = serenity::CreateEmbed::new()
        .title("🔗 Badge Links")
        .description(description)
        .color(0xffd700);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Give a member one of this server's badges.
#[poise::command(slash_command, prefix_command, guild_only, rename = "give", required_permissions = "MANAGE_ROLES")]
pub async fn badge_give(
    ctx: Context<'_>,
    #[description = "Member to receive the badge"] user: serenity::User,
    #[description = "Badge name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    match ctx
        .data()
        .leveling
        .give_badge(guild_id, user.id.get(), &user.name, &name)
        .await
    {
        Ok(()) => {
            ctx.say(format!(
                "{} has just given {} the `{}` badge!",
                ctx.author().name,
                user.name,
                name
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Take one of this server's badges away from a member.
#[poise::command(slash_command, prefix_command, guild_only, rename = "take", required_permissions = "MANAGE_ROLES")]
pub async fn badge_take(
    ctx: Context<'_>,
    #[description = "Member to lose the badge"] user: serenity::User,
    #[description = "Badge name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    match ctx
        .data()
        .leveling
        .take_badge(guild_id, user.id.get(), &user.name, &name)
        .await
    {
        Ok(()) => {
            ctx.say(format!(
                "{} has taken the `{}` badge from {}! 🙃",
                ctx.author().name,
                name,
                user.name
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Buy a badge from this server's catalogue with credits.
#[poise::command(slash_command, prefix_command, guild_only, rename = "buy")]
pub async fn badge_buy(
    ctx: Context<'_>,
    #[description = "Badge name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let price = match ctx.data().leveling.list_badges(guild_id).await {
        Ok(badges) => badges
            .iter()
            .find(|badge| badge.name == name)
            .map(|badge| badge.price),
        Err(err) => return reply_error(ctx, err).await,
    };

    if let Some(price) = price.filter(|price| *price > 0) {
        let prompt = format!(
            "{}, you are about to buy the `{}` badge for `{}`. Confirm?",
            ctx.author().name,
            name,
            price
        );
        if !confirm(ctx, prompt).await? {
            ctx.say("Purchase canceled.").await?;
            return Ok(());
        }
    }

    let author = ctx.author();
    match ctx
        .data()
        .leveling
        .buy_badge(guild_id, author.id.get(), &author.name, &name)
        .await
    {
        Ok(BadgePurchase::Free) => {
            ctx.say(format!("`{}` has been obtained.", name)).await?;
        }
        Ok(BadgePurchase::Paid(price)) => {
            ctx.say(format!(
                "You have bought the `{}` badge for `{}`. Set it on your profile with `badge set` next.",
                name, price
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}

/// Choose where one of your badges shows on your profile.
#[poise::command(slash_command, prefix_command, guild_only, rename = "set")]
pub async fn badge_set(
    ctx: Context<'_>,
    #[description = "Badge name"] name: String,
    #[description = "-1 hides it, 0 leaves it off, 1 to 5000 shows it (higher first)"]
    #[min = -1]
    #[max = 5000]
    priority: i64,
) -> Result<(), Error> {
    let guild_id = guild_id_of(&ctx)?;
    let author = ctx.author();
    match ctx
        .data()
        .leveling
        .set_badge_priority(guild_id, author.id.get(), &author.name, &name, priority)
        .await
    {
        Ok(priority) => {
            ctx.say(format!(
                "The `{}` badge priority has been set to `{}`!",
                name, priority
            ))
            .await?;
        }
        Err(err) => return reply_error(ctx, err).await,
    }
    Ok(())
}
