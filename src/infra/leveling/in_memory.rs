// In-memory implementations of the leveling stores.
//
// Backs the service tests.
// DashMap gives us concurrent access without wrapping everything in a Mutex.

use crate::core::leveling::{
    BadgeLink, GuildBadge, GuildSettings, LevelStore, RoleLink, SettingsStore, StoreError,
    UserQuery, UserRecord,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct InMemoryLevelStore {
    users: DashMap<u64, UserRecord>,
    role_links: DashMap<u64, Vec<RoleLink>>,
    badge_links: DashMap<u64, Vec<BadgeLink>>,
    badges: DashMap<u64, Vec<GuildBadge>>,
    available: AtomicBool,
    guild_data_available: AtomicBool,
}

impl InMemoryLevelStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            role_links: DashMap::new(),
            badge_links: DashMap::new(),
            badges: DashMap::new(),
            available: AtomicBool::new(true),
            guild_data_available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the backing database.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make only the link and badge catalogue reads fail.
    pub fn set_guild_data_available(&self, available: bool) {
        self.guild_data_available.store(available, Ordering::SeqCst);
    }

    fn check_guild_data(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.guild_data_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Database("guild data marked unavailable".into()))
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Database("in-memory store marked unavailable".into()))
        }
    }
}

impl Default for InMemoryLevelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LevelStore for InMemoryLevelStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError> {
        self.check()?;
        Ok(self.users.get(&user_id).map(|entry| entry.value().clone()))
    }

    async fn upsert_user(&self, record: &UserRecord) -> Result<(), StoreError> {
        self.check()?;
        self.users.insert(record.user_id, record.clone());
        Ok(())
    }

    async fn query_users(&self, query: &UserQuery) -> Result<Vec<UserRecord>, StoreError> {
        self.check()?;
        let mut matching: Vec<UserRecord> = self
            .users
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; keep results deterministic.
        matching.sort_by_key(|record| record.user_id);
        Ok(query.finish(matching))
    }

    async fn role_links(&self, guild_id: u64) -> Result<Vec<RoleLink>, StoreError> {
        self.check_guild_data()?;
        Ok(self
            .role_links
            .get(&guild_id)
            .map(|links| links.clone())
            .unwrap_or_default())
    }

    async fn save_role_link(&self, link: &RoleLink) -> Result<(), StoreError> {
        self.check()?;
        let mut links = self.role_links.entry(link.guild_id).or_default();
        match links.iter_mut().find(|l| l.role_name == link.role_name) {
            Some(existing) => *existing = link.clone(),
            None => links.push(link.clone()),
        }
        Ok(())
    }

    async fn delete_role_link(&self, guild_id: u64, role_name: &str) -> Result<bool, StoreError> {
        self.check()?;
        let Some(mut links) = self.role_links.get_mut(&guild_id) else {
            return Ok(false);
        };
        let before = links.len();
        links.retain(|l| l.role_name != role_name);
        Ok(links.len() != before)
    }

    async fn badge_links(&self, guild_id: u64) -> Result<Vec<BadgeLink>, StoreError> {
        self.check_guild_data()?;
        Ok(self
            .badge_links
            .get(&guild_id)
            .map(|links| links.clone())
            .unwrap_or_default())
    }

    async fn save_badge_link(&self, link: &BadgeLink) -> Result<(), StoreError> {
        self.check()?;
        let mut links = self.badge_links.entry(link.guild_id).or_default();
        match links.iter_mut().find(|l| l.badge_name == link.badge_name) {
            Some(existing) => *existing = link.clone(),
            None => links.push(link.clone()),
        }
        Ok(())
    }

    async fn delete_badge_link(
        &self,
        guild_id: u64,
        badge_name: &str,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let Some(mut links) = self.badge_links.get_mut(&guild_id) else {
            return Ok(false);
        };
        let before = links.len();
        links.retain(|l| l.badge_name != badge_name);
        Ok(links.len() != before)
    }

    async fn guild_badges(&self, guild_id: u64) -> Result<Vec<GuildBadge>, StoreError> {
        self.check_guild_data()?;
        Ok(self
            .badges
            .get(&guild_id)
            .map(|badges| badges.clone())
            .unwrap_or_default())
    }

    async fn save_guild_badge(&self, badge: &GuildBadge) -> Result<(), StoreError> {
        self.check()?;
        let mut badges = self.badges.entry(badge.guild_id).or_default();
        match badges.iter_mut().find(|b| b.name == badge.name) {
            Some(existing) => *existing = badge.clone(),
            None => badges.push(badge.clone()),
        }
        Ok(())
    }

    async fn delete_guild_badge(&self, guild_id: u64, name: &str) -> Result<bool, StoreError> {
        self.check()?;
        let Some(mut badges) = self.badges.get_mut(&guild_id) else {
            return Ok(false);
        };
        let before = badges.len();
        badges.retain(|b| b.name != name);
        Ok(badges.len() != before)
    }
}

/// Guild settings kept only for the lifetime of the process.
pub struct InMemorySettingsStore {
    settings: DashMap<u64, GuildSettings>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self {
            settings: DashMap::new(),
        }
    }
}

impl Default for InMemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get_settings(&self, guild_id: u64) -> Result<GuildSettings, StoreError> {
        // Real stores suspend here; let concurrent callers interleave.
        tokio::task::yield_now().await;
        Ok(self
            .settings
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| GuildSettings::for_guild(guild_id)))
    }

    async fn save_settings(&self, settings: &GuildSettings) -> Result<(), StoreError> {
        self.settings.insert(settings.guild_id, settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::leveling_store::SortKey;
    use crate::core::leveling::readiness::check_once;
    use crate::core::leveling::{ConnectionState, Readiness};

    fn user(user_id: u64, total_exp: u64) -> UserRecord {
        let mut record = UserRecord::new(user_id, format!("user{user_id}"));
        record.total_exp = total_exp;
        record
    }

    #[tokio::test]
    async fn upsert_replaces_whole_record() {
        let store = InMemoryLevelStore::new();
        store.upsert_user(&user(1, 10)).await.unwrap();
        let mut changed = user(1, 99);
        changed.rep = 4;
        store.upsert_user(&changed).await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap(), Some(changed));
    }

    #[tokio::test]
    async fn query_sorts_and_limits() {
        let store = InMemoryLevelStore::new();
        for (id, exp) in [(1, 5), (2, 50), (3, 20)] {
            store.upsert_user(&user(id, exp)).await.unwrap();
        }
        let query = UserQuery {
            sort: Some(SortKey::TotalExp),
            limit: Some(2),
            ..UserQuery::default()
        };
        let ids: Vec<u64> = store
            .query_users(&query)
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn role_links_are_keyed_by_name() {
        let store = InMemoryLevelStore::new();
        let mut link = RoleLink {
            guild_id: 1,
            role_name: "Regular".into(),
            level: 5,
            remove_role: None,
        };
        store.save_role_link(&link).await.unwrap();
        link.level = 8;
        store.save_role_link(&link).await.unwrap();
        assert_eq!(store.role_links(1).await.unwrap(), vec![link]);

        assert!(store.delete_role_link(1, "Regular").await.unwrap());
        assert!(!store.delete_role_link(1, "Regular").await.unwrap());
        assert!(store.role_links(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_health_checks() {
        let store = InMemoryLevelStore::new();
        let readiness = Readiness::new();

        assert_eq!(check_once(&store, &readiness).await, ConnectionState::Ready);

        store.set_available(false);
        assert!(matches!(
            check_once(&store, &readiness).await,
            ConnectionState::Unavailable { .. }
        ));
        assert!(store.get_user(1).await.is_err());

        store.set_available(true);
        assert!(check_once(&store, &readiness).await.is_ready());
    }

    #[tokio::test]
    async fn settings_default_until_saved() {
        let store = InMemorySettingsStore::new();
        let defaults = store.get_settings(3).await.unwrap();
        assert_eq!(defaults, GuildSettings::for_guild(3));

        let mut changed = defaults;
        changed.lvl_msg = true;
        store.save_settings(&changed).await.unwrap();
        assert!(store.get_settings(3).await.unwrap().lvl_msg);
    }
}
