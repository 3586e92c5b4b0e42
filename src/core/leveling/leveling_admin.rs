// Guild administration for the leveler: settings toggles, role and badge
// links, the guild badge catalogue and xp bans.
//
// Input is validated before anything is written. A rejected command leaves
// every store untouched.

use super::leveling_models::{
    badge_key, BadgeLink, BadgeRecord, GuildBadge, GuildSettings, RoleLink, XpRange,
    DEFAULT_XP_RANGE,
};
use super::leveling_service::{LevelingError, LevelingService};
use super::leveling_store::{LevelStore, SettingsStore, UserQuery};
use chrono::{DateTime, Duration, Utc};

pub const MAX_MSG_CREDITS: i64 = 1000;
pub const MAX_XP_ROLL: i64 = 1000;

/// Boolean guild settings that can be flipped from a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildToggle {
    /// Turns every leveler command in the guild off.
    Disabled,
    LevelUpAlerts,
    Mentions,
    TextOnly,
    PrivateAlerts,
}

impl GuildToggle {
    fn flag(self, settings: &mut GuildSettings) -> &mut bool {
        match self {
            GuildToggle::Disabled => &mut settings.disabled,
            GuildToggle::LevelUpAlerts => &mut settings.lvl_msg,
            GuildToggle::Mentions => &mut settings.mentions,
            GuildToggle::TextOnly => &mut settings.text_only,
            GuildToggle::PrivateAlerts => &mut settings.private_lvl_message,
        }
    }
}

/// Validate an xp range from user input. `None` restores the default.
pub fn validate_xp_range(range: Option<(i64, i64)>) -> Result<XpRange, LevelingError> {
    let Some((min, max)) = range else {
        return Ok(DEFAULT_XP_RANGE);
    };
    if min > MAX_XP_ROLL || max > MAX_XP_ROLL {
        return Err(LevelingError::invalid(
            "Don't you think that number is a bit high? That might break things. Try something under 1k xp.",
        ));
    }
    if min <= 0 || max <= 0 {
        return Err(LevelingError::invalid(
            "The xp amounts must be positive numbers.",
        ));
    }
    if min >= max {
        return Err(LevelingError::invalid(
            "The minimum xp amount needs to be less than the maximum xp amount.",
        ));
    }
    Ok(XpRange {
        min: min as u32,
        max: max as u32,
    })
}

/// Snapshot shown by the settings overview command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildOverview {
    pub settings: GuildSettings,
    pub role_links: Vec<RoleLink>,
    pub badge_links: Vec<BadgeLink>,
    pub badges: Vec<GuildBadge>,
    pub rep_price: u64,
}

impl<S: LevelStore, G: SettingsStore> LevelingService<S, G> {
    async fn update_settings<T>(
        &self,
        guild_id: u64,
        change: impl FnOnce(&mut GuildSettings) -> T,
    ) -> Result<T, LevelingError> {
        self.ensure_ready()?;
        let _guard = self.settings_locks.lock(guild_id).await;
        let mut settings = self.settings.get_settings(guild_id).await?;
        let value = change(&mut settings);
        self.settings.save_settings(&settings).await?;
        Ok(value)
    }

    /// Flip a boolean setting and return its new value.
    ///
    /// `Disabled` is the only toggle that works on a disabled guild.
    pub async fn toggle(&self, guild_id: u64, toggle: GuildToggle) -> Result<bool, LevelingError> {
        if toggle != GuildToggle::Disabled {
            self.ensure_ready()?;
            self.enabled_settings(guild_id).await?;
        }
        let value = self
            .update_settings(guild_id, |settings| {
                let flag = toggle.flag(settings);
                *flag = !*flag;
                *flag
            })
            .await?;
        tracing::info!(guild_id, ?toggle, value, "Guild setting toggled");
        Ok(value)
    }

    pub async fn settings(&self, guild_id: u64) -> Result<GuildSettings, LevelingError> {
        self.ensure_ready()?;
        Ok(self.settings.get_settings(guild_id).await?)
    }

    pub async fn set_msg_credits(&self, guild_id: u64, credits: i64) -> Result<u32, LevelingError> {
        if !(0..=MAX_MSG_CREDITS).contains(&credits) {
            return Err(LevelingError::invalid("Please enter a valid number (0 - 1000)"));
        }
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let credits = credits as u32;
        self.update_settings(guild_id, |settings| settings.msg_credits = credits)
            .await?;
        Ok(credits)
    }

    pub async fn set_xp_range(
        &self,
        guild_id: u64,
        range: Option<(i64, i64)>,
    ) -> Result<XpRange, LevelingError> {
        let range = validate_xp_range(range)?;
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        self.update_settings(guild_id, |settings| settings.xp_range = range)
            .await?;
        Ok(range)
    }

    /// Add or remove a channel from the ignore list. Returns `true` if the
    /// channel is ignored afterwards.
    pub async fn toggle_ignored_channel(
        &self,
        guild_id: u64,
        channel_id: u64,
    ) -> Result<bool, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        self.update_settings(guild_id, |settings| {
            if let Some(index) = settings
                .ignored_channels
                .iter()
                .position(|id| *id == channel_id)
            {
                settings.ignored_channels.remove(index);
                false
            } else {
                settings.ignored_channels.push(channel_id);
                true
            }
        })
        .await
    }

    /// Send every public level-up alert to one channel, or clear the lock.
    pub async fn set_lock_channel(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
    ) -> Result<(), LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        self.update_settings(guild_id, |settings| settings.lvl_msg_lock = channel_id)
            .await
    }

    /// Block a user from earning message xp for `days` days.
    pub async fn xp_ban(
        &self,
        user_id: u64,
        username: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, LevelingError> {
        self.ensure_ready()?;
        if !(0..=36_500).contains(&days) {
            return Err(LevelingError::invalid("Please enter a number of days between 0 and 36500."));
        }
        let until = now + Duration::days(days);
        self.update_user(user_id, username, None, |record| {
            record.chat_block = Some(until);
            Ok(())
        })
        .await?;
        tracing::info!(user_id, %until, "User xp-banned");
        Ok(until)
    }

    // ------------------------------------------------------------------------
    // Role links
    // ------------------------------------------------------------------------

    pub async fn link_role(
        &self,
        guild_id: u64,
        role_name: &str,
        level: i64,
        remove_role: Option<&str>,
    ) -> Result<RoleLink, LevelingError> {
        if level < 0 {
            return Err(LevelingError::invalid("Please enter a positive number."));
        }
        if role_name.trim().is_empty() {
            return Err(LevelingError::invalid("Please name a role."));
        }
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let link = RoleLink {
            guild_id,
            role_name: role_name.to_string(),
            level: u32::try_from(level).map_err(|_| LevelingError::invalid("That level is too high."))?,
            remove_role: remove_role.map(str::to_string),
        };
        self.store.save_role_link(&link).await?;
        Ok(link)
    }

    pub async fn unlink_role(&self, guild_id: u64, role_name: &str) -> Result<(), LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        if !self.store.delete_role_link(guild_id, role_name).await? {
            return Err(LevelingError::invalid(format!(
                "Role `{}` is not linked to a level.",
                role_name
            )));
        }
        Ok(())
    }

    /// Role links ordered by level.
    pub async fn list_role_links(&self, guild_id: u64) -> Result<Vec<RoleLink>, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let mut links = self.store.role_links(guild_id).await?;
        links.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.role_name.cmp(&b.role_name)));
        Ok(links)
    }

    // ------------------------------------------------------------------------
    // Badge catalogue and links
    // ------------------------------------------------------------------------

    pub async fn add_badge(&self, badge: GuildBadge) -> Result<(), LevelingError> {
        if badge.name.trim().is_empty() || badge.name.contains(char::is_whitespace) {
            return Err(LevelingError::invalid("Badge names can't contain spaces."));
        }
        if badge.price < -1 {
            return Err(LevelingError::invalid(
                "Price is not valid. Use -1 to make a badge unpurchasable.",
            ));
        }
        self.ensure_ready()?;
        self.enabled_settings(badge.guild_id).await?;
        self.store.save_guild_badge(&badge).await?;
        tracing::info!(guild_id = badge.guild_id, badge = %badge.name, "Badge saved");
        Ok(())
    }

    /// Remove a badge from the catalogue, its link, and every user holding it.
    /// Returns how many users lost the badge.
    pub async fn remove_badge(&self, guild_id: u64, name: &str) -> Result<usize, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        if !self.store.delete_guild_badge(guild_id, name).await? {
            return Err(LevelingError::invalid(format!(
                "That badge does not exist: `{}`",
                name
            )));
        }
        self.store.delete_badge_link(guild_id, name).await?;

        let key = badge_key(name, guild_id);
        let holders = self
            .store
            .query_users(&UserQuery::holding_badge(key.clone()))
            .await?;
        let mut stripped = 0;
        for holder in holders {
            let key = key.clone();
            let (_, removed) = self
                .update_user(holder.user_id, "", None, move |record| {
                    Ok(record.badges.remove(&key).is_some())
                })
                .await?;
            if removed {
                stripped += 1;
            }
        }
        tracing::info!(guild_id, badge = %name, stripped, "Badge removed");
        Ok(stripped)
    }

    pub async fn list_badges(&self, guild_id: u64) -> Result<Vec<GuildBadge>, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let mut badges = self.store.guild_badges(guild_id).await?;
        badges.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(badges)
    }

    /// Hand a catalogue badge to a member.
    pub async fn give_badge(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        badge_name: &str,
    ) -> Result<(), LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let badge = self.catalogue_badge(guild_id, badge_name).await?;
        self.update_user(user_id, username, Some(guild_id), move |record| {
            let key = badge.user_key();
            if record.badges.contains_key(&key) {
                return Err(LevelingError::invalid(format!(
                    "{} already has that badge!",
                    record.username
                )));
            }
            record.badges.insert(
                key,
                BadgeRecord {
                    badge,
                    priority_num: 0,
                },
            );
            Ok(())
        })
        .await?;
        tracing::info!(guild_id, user_id, badge = %badge_name, "Badge given");
        Ok(())
    }

    /// Take this guild's copy of a badge away from a member.
    pub async fn take_badge(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        badge_name: &str,
    ) -> Result<(), LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        self.catalogue_badge(guild_id, badge_name).await?;
        let key = badge_key(badge_name, guild_id);
        self.update_user(user_id, username, Some(guild_id), move |record| {
            if record.badges.remove(&key).is_none() {
                return Err(LevelingError::invalid(format!(
                    "{} does not have that badge!",
                    record.username
                )));
            }
            Ok(())
        })
        .await?;
        tracing::info!(guild_id, user_id, badge = %badge_name, "Badge taken");
        Ok(())
    }

    /// Link a catalogue badge to a level.
    pub async fn link_badge(
        &self,
        guild_id: u64,
        badge_name: &str,
        level: i64,
    ) -> Result<BadgeLink, LevelingError> {
        if level < 0 {
            return Err(LevelingError::invalid("Please enter a positive number."));
        }
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let exists = self
            .store
            .guild_badges(guild_id)
            .await?
            .iter()
            .any(|badge| badge.name == badge_name);
        if !exists {
            return Err(LevelingError::invalid(format!(
                "That badge does not exist: `{}`",
                badge_name
            )));
        }

        let link = BadgeLink {
            guild_id,
            badge_name: badge_name.to_string(),
            level: u32::try_from(level).map_err(|_| LevelingError::invalid("That level is too high."))?,
        };
        self.store.save_badge_link(&link).await?;
        Ok(link)
    }

    pub async fn unlink_badge(&self, guild_id: u64, badge_name: &str) -> Result<(), LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        if !self.store.delete_badge_link(guild_id, badge_name).await? {
            return Err(LevelingError::invalid(format!(
                "Badge `{}` is not linked to a level.",
                badge_name
            )));
        }
        Ok(())
    }

    pub async fn list_badge_links(&self, guild_id: u64) -> Result<Vec<BadgeLink>, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let mut links = self.store.badge_links(guild_id).await?;
        links.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.badge_name.cmp(&b.badge_name)));
        Ok(links)
    }

    /// Everything configured for a guild. Works even when the guild is disabled.
    pub async fn overview(&self, guild_id: u64) -> Result<GuildOverview, LevelingError> {
        self.ensure_ready()?;
        Ok(GuildOverview {
            settings: self.settings.get_settings(guild_id).await?,
            role_links: self.store.role_links(guild_id).await?,
            badge_links: self.store.badge_links(guild_id).await?,
            badges: self.store.guild_badges(guild_id).await?,
            rep_price: self.options.rep_price,
        })
    }
}
