// Domain models for the leveling engine.
//
// Nothing in here knows about Discord. Ids are plain u64 snowflakes and
// timestamps are chrono UTC values so the same types flow through the
// SQLite store, the JSON settings file and the command layer.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current shape of a persisted [`UserRecord`].
/// Older documents are upgraded by `migration::migrate_user_document`.
pub const USER_RECORD_VERSION: u32 = 2;

pub const DEFAULT_INFO: &str = "I am a mysterious person.";

fn current_version() -> u32 {
    USER_RECORD_VERSION
}

// ============================================================================
// USER RECORDS
// ============================================================================

/// Level bookkeeping for one user inside one guild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildProgress {
    pub level: u32,
    /// Experience earned towards the next level (resets on every level-up).
    pub current_exp: u64,
}

/// A badge defined by a guild. Users hold copies of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildBadge {
    pub guild_id: u64,
    pub name: String,
    pub description: String,
    pub bg_img: String,
    pub border_color: String,
    pub price: i64,
}

impl GuildBadge {
    /// Key under which this badge is stored in a user's collection.
    pub fn user_key(&self) -> String {
        badge_key(&self.name, self.guild_id)
    }
}

pub fn badge_key(badge_name: &str, guild_id: u64) -> String {
    format!("{}_{}", badge_name, guild_id)
}

/// A badge owned by a user, plus the display priority the user picked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeRecord {
    #[serde(flatten)]
    pub badge: GuildBadge,
    #[serde(default)]
    pub priority_num: i32,
}

/// Everything the leveler knows about a single user, across all guilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default = "current_version")]
    pub schema_version: u32,
    pub user_id: u64,
    pub username: String,
    /// Running counter over every guild. Independent from level bookkeeping.
    pub total_exp: u64,
    pub servers: BTreeMap<u64, GuildProgress>,
    pub rep: u32,
    /// Last XP-granting message, or a future instant while xp-banned.
    pub chat_block: Option<DateTime<Utc>>,
    /// Last time this user handed out a reputation point.
    pub rep_block: Option<DateTime<Utc>>,
    pub last_message: String,
    pub badges: BTreeMap<String, BadgeRecord>,
    pub title: String,
    pub info: String,
}

impl UserRecord {
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            schema_version: USER_RECORD_VERSION,
            user_id,
            username: username.into(),
            total_exp: 0,
            servers: BTreeMap::new(),
            rep: 0,
            chat_block: None,
            rep_block: None,
            last_message: String::new(),
            badges: BTreeMap::new(),
            title: String::new(),
            info: DEFAULT_INFO.to_string(),
        }
    }

    /// Progress in a guild, or a fresh level 0 entry if the user never spoke there.
    pub fn progress(&self, guild_id: u64) -> GuildProgress {
        self.servers.get(&guild_id).copied().unwrap_or_default()
    }

    pub fn progress_mut(&mut self, guild_id: u64) -> &mut GuildProgress {
        self.servers.entry(guild_id).or_default()
    }

    pub fn is_in_guild(&self, guild_id: u64) -> bool {
        self.servers.contains_key(&guild_id)
    }

    /// Guild-local experience: everything needed to reach the current level
    /// plus the partial progress. `None` when the user has no guild entry.
    pub fn guild_experience(&self, guild_id: u64) -> Option<u64> {
        self.servers.get(&guild_id).map(|progress| {
            super::leveling_math::cumulative_experience_for_level(progress.level)
                .saturating_add(progress.current_exp)
        })
    }

    /// Data removal: wipe everything except the identity.
    pub fn soft_clear(&mut self) {
        let user_id = self.user_id;
        *self = Self::new(user_id, String::new());
    }
}

// ============================================================================
// GUILD CONFIGURATION
// ============================================================================

pub const DEFAULT_XP_RANGE: XpRange = XpRange { min: 15, max: 20 };

/// Inclusive range used for per-message XP rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpRange {
    pub min: u32,
    pub max: u32,
}

impl XpRange {
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.min >= self.max {
            return u64::from(self.min);
        }
        u64::from(rng.gen_range(self.min..=self.max))
    }
}

impl Default for XpRange {
    fn default() -> Self {
        DEFAULT_XP_RANGE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub disabled: bool,
    /// Level-up alerts.
    pub lvl_msg: bool,
    pub mentions: bool,
    pub text_only: bool,
    pub private_lvl_message: bool,
    /// Channel every public level-up alert is redirected to.
    pub lvl_msg_lock: Option<u64>,
    pub msg_credits: u32,
    pub ignored_channels: Vec<u64>,
    pub xp_range: XpRange,
}

impl GuildSettings {
    pub fn for_guild(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Self::default()
        }
    }

    pub fn is_ignored(&self, channel_id: u64) -> bool {
        self.ignored_channels.contains(&channel_id)
    }
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            guild_id: 0,
            disabled: false,
            lvl_msg: false,
            mentions: true,
            text_only: false,
            private_lvl_message: false,
            lvl_msg_lock: None,
            msg_credits: 0,
            ignored_channels: Vec::new(),
            xp_range: XpRange::default(),
        }
    }
}

// ============================================================================
// LINKS
// ============================================================================

/// Role granted when a member reaches `level` in a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLink {
    pub guild_id: u64,
    pub role_name: String,
    pub level: u32,
    /// Role stripped at the same time, if any.
    pub remove_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeLink {
    pub guild_id: u64,
    pub badge_name: String,
    pub level: u32,
}

// ============================================================================
// EVENTS
// ============================================================================

/// A chat message as seen by the leveler.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub guild_id: u64,
    pub channel_id: u64,
    pub content: String,
    pub arrived_at: DateTime<Utc>,
}

/// Emitted once per level crossed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUpEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
    /// Channel the triggering action happened in, if any.
    pub channel_id: Option<u64>,
}
