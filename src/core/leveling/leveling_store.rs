// Storage ports for the leveling engine.
//
// The core says WHAT it needs from persistence; `infra::leveling` decides HOW.
// User records are documents keyed by user id, guild data (links, badge
// catalogue) is keyed by guild id, and guild settings live behind their own
// trait because they are small, hot and edited by hand.

use super::leveling_models::{BadgeLink, GuildBadge, GuildSettings, RoleLink, UserRecord};
use super::migration::MigrationError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stored user could not be read: {0}")]
    Migration(#[from] MigrationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    TotalExp,
    Rep,
}

/// Filtered, sorted and limited scan over user records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    /// Only users with a progress entry for this guild.
    pub guild_id: Option<u64>,
    pub min_total_exp: Option<u64>,
    pub min_rep: Option<u32>,
    /// Only users holding this badge key.
    pub badge_key: Option<String>,
    /// Descending order on this key. Unsorted scans come back in id order.
    pub sort: Option<SortKey>,
    pub limit: Option<usize>,
}

impl UserQuery {
    pub fn in_guild(guild_id: u64) -> Self {
        Self {
            guild_id: Some(guild_id),
            ..Self::default()
        }
    }

    pub fn holding_badge(badge_key: impl Into<String>) -> Self {
        Self {
            badge_key: Some(badge_key.into()),
            ..Self::default()
        }
    }

    /// Filter predicate shared by stores that scan in memory.
    pub fn matches(&self, record: &UserRecord) -> bool {
        self.guild_id.map_or(true, |guild| record.is_in_guild(guild))
            && self.min_total_exp.map_or(true, |min| record.total_exp >= min)
            && self.min_rep.map_or(true, |min| record.rep >= min)
            && self
                .badge_key
                .as_ref()
                .map_or(true, |key| record.badges.contains_key(key))
    }

    /// Sort and truncate an already filtered list. The sort is stable.
    pub fn finish(&self, mut records: Vec<UserRecord>) -> Vec<UserRecord> {
        match self.sort {
            Some(SortKey::TotalExp) => records.sort_by(|a, b| b.total_exp.cmp(&a.total_exp)),
            Some(SortKey::Rep) => records.sort_by(|a, b| b.rep.cmp(&a.rep)),
            None => {}
        }
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}

/// Persistence for user records and guild-scoped leveling data.
#[async_trait]
pub trait LevelStore: Send + Sync {
    /// Cheap round trip used to decide whether the store is usable.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError>;

    /// Insert or fully replace a user record.
    async fn upsert_user(&self, record: &UserRecord) -> Result<(), StoreError>;

    async fn query_users(&self, query: &UserQuery) -> Result<Vec<UserRecord>, StoreError>;

    async fn role_links(&self, guild_id: u64) -> Result<Vec<RoleLink>, StoreError>;

    /// Replaces any existing link for the same (guild, role name).
    async fn save_role_link(&self, link: &RoleLink) -> Result<(), StoreError>;

    /// Returns whether a link was removed.
    async fn delete_role_link(&self, guild_id: u64, role_name: &str) -> Result<bool, StoreError>;

    async fn badge_links(&self, guild_id: u64) -> Result<Vec<BadgeLink>, StoreError>;

    /// Replaces any existing link for the same (guild, badge name).
    async fn save_badge_link(&self, link: &BadgeLink) -> Result<(), StoreError>;

    async fn delete_badge_link(&self, guild_id: u64, badge_name: &str)
        -> Result<bool, StoreError>;

    async fn guild_badges(&self, guild_id: u64) -> Result<Vec<GuildBadge>, StoreError>;

    async fn save_guild_badge(&self, badge: &GuildBadge) -> Result<(), StoreError>;

    async fn delete_guild_badge(&self, guild_id: u64, name: &str) -> Result<bool, StoreError>;
}

/// Guild-scoped configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Settings for a guild, or the defaults if it was never configured.
    async fn get_settings(&self, guild_id: u64) -> Result<GuildSettings, StoreError>;

    async fn save_settings(&self, settings: &GuildSettings) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(user_id: u64, total_exp: u64, rep: u32) -> UserRecord {
        let mut record = UserRecord::new(user_id, "someone");
        record.total_exp = total_exp;
        record.rep = rep;
        record
    }

    #[test]
    fn default_query_matches_everything() {
        assert!(UserQuery::default().matches(&user(1, 0, 0)));
    }

    #[test]
    fn filters_combine() {
        let query = UserQuery {
            guild_id: Some(5),
            min_rep: Some(1),
            ..UserQuery::default()
        };
        let mut member = user(1, 0, 2);
        member.progress_mut(5);
        assert!(query.matches(&member));
        assert!(!query.matches(&user(2, 0, 2)));

        member.rep = 0;
        assert!(!query.matches(&member));
    }

    #[test]
    fn finish_sorts_stably_and_limits() {
        let query = UserQuery {
            sort: Some(SortKey::Rep),
            limit: Some(2),
            ..UserQuery::default()
        };
        let records = vec![user(1, 0, 1), user(2, 0, 5), user(3, 0, 5)];
        let ids: Vec<u64> = query.finish(records).iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
