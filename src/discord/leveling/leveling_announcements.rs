// Level-up announcements over serenity.

use super::http_status;
use crate::core::leveling::{LevelUpAnnouncement, LevelUpNotifier, NotifyError, Recipient};
use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, builder::CreateMessage};
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Sends announcements to guild channels or user DMs.
pub struct SerenityNotifier {
    http: Arc<serenity::Http>,
    cache: Arc<serenity::Cache>,
}

impl SerenityNotifier {
    pub fn new(http: Arc<serenity::Http>, cache: Arc<serenity::Cache>) -> Self {
        Self { http, cache }
    }

    fn guild_name(&self, guild_id: u64) -> Option<String> {
        self.cache
            .guild(serenity::GuildId::new(guild_id))
            .map(|guild| guild.name.clone())
    }

    async fn deliver(&self, recipient: &Recipient, message: CreateMessage) -> Result<(), NotifyError> {
        let result = match recipient {
            Recipient::Channel(channel_id) => serenity::ChannelId::new(*channel_id)
                .send_message(self.http.as_ref(), message)
                .await,
            Recipient::DirectMessage(user_id) => serenity::UserId::new(*user_id)
                .direct_message(self.http.as_ref(), message)
                .await,
        };
        result.map(|_| ()).map_err(classify)
    }
}

fn classify(err: serenity::Error) -> NotifyError {
    match http_status(&err) {
        Some(403) => NotifyError::Forbidden,
        Some(404) => NotifyError::ChannelNotFound,
        _ => NotifyError::Http(err.to_string()),
    }
}

#[async_trait]
impl LevelUpNotifier for SerenityNotifier {
    async fn announce(&self, announcement: &LevelUpAnnouncement) -> Result<(), NotifyError> {
        let guild_name = match announcement.recipient {
            Recipient::DirectMessage(_) => self.guild_name(announcement.guild_id),
            Recipient::Channel(_) => None,
        };
        let headline = announcement.headline(guild_name.as_deref());

        let message = if announcement.text_only {
            CreateMessage::new().content(headline)
        } else {
            let embed = serenity::CreateEmbed::new()
                .description(headline)
                .color(level_color(announcement.new_level))
                .field("Total XP", announcement.total_xp.to_string(), true)
                .footer(serenity::CreateEmbedFooter::new(random_flavor_line()));
            CreateMessage::new().embed(embed)
        };

        self.deliver(&announcement.recipient, message).await
    }

    async fn report(&self, target: &Recipient, warnings: &[String]) -> Result<(), NotifyError> {
        if warnings.is_empty() {
            return Ok(());
        }
        self.deliver(target, CreateMessage::new().content(format_warnings(warnings)))
            .await
    }
}

fn format_warnings(warnings: &[String]) -> String {
    let mut text = String::from("**Level-up problems:**");
    for warning in warnings {
        text.push_str("\n- ");
        text.push_str(warning);
    }
    text
}

pub fn level_color(level: u32) -> serenity::Colour {
    if level >= 50 {
        serenity::Colour::DARK_PURPLE
    } else if level >= 25 {
        serenity::Colour::ORANGE
    } else if level >= 10 {
        serenity::Colour::GOLD
    } else if level >= 5 {
        serenity::Colour::BLURPLE
    } else {
        serenity::Colour::LIGHT_GREY
    }
}

pub fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let bar = "▰".repeat(filled) + &"▱".repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}

fn random_flavor_line() -> &'static str {
    const FLAVOR_LINES: [&str; 4] = [
        "Keep chatting!",
        "Your grind is paying off.",
        "Another level, another flex.",
        "That XP bar never stood a chance.",
    ];

    FLAVOR_LINES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FLAVOR_LINES[0])
}
