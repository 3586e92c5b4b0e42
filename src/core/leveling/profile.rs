// Things members change about their own profile: info text, title, badge
// display order, and badges bought from the guild catalogue.

use super::leveling_models::{badge_key, BadgeRecord, GuildBadge};
use super::leveling_service::{LevelingError, LevelingService};
use super::leveling_store::{LevelStore, SettingsStore};

/// Info text must stay shorter than this many characters.
pub const MAX_INFO_CHARS: usize = 150;
/// Titles must stay shorter than this many characters.
pub const MAX_TITLE_CHARS: usize = 20;
/// `-1` hides a badge, `0` leaves it off the card, higher shows it earlier.
pub const BADGE_PRIORITY_RANGE: std::ops::RangeInclusive<i64> = -1..=5000;

/// How a catalogue badge ended up on a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgePurchase {
    Free,
    Paid(u64),
}

impl<S: LevelStore, G: SettingsStore> LevelingService<S, G> {
    pub(super) async fn catalogue_badge(
        &self,
        guild_id: u64,
        name: &str,
    ) -> Result<GuildBadge, LevelingError> {
        self.store
            .guild_badges(guild_id)
            .await?
            .into_iter()
            .find(|badge| badge.name == name)
            .ok_or_else(|| {
                LevelingError::invalid(format!(
                    "The badge `{}` does not exist in this server.",
                    name
                ))
            })
    }

    pub async fn set_info(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        info: &str,
    ) -> Result<(), LevelingError> {
        if info.chars().count() >= MAX_INFO_CHARS {
            return Err(LevelingError::invalid(format!(
                "Your description has too many characters! Must be <{}",
                MAX_INFO_CHARS
            )));
        }
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let info = info.to_string();
        self.update_user(user_id, username, Some(guild_id), move |record| {
            record.info = info;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Set or, with `None`, clear the profile title.
    pub async fn set_title(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        title: Option<&str>,
    ) -> Result<(), LevelingError> {
        let title = title.map(str::trim).unwrap_or_default();
        if title.chars().count() >= MAX_TITLE_CHARS {
            return Err(LevelingError::invalid(format!(
                "Your title has too many characters! Must be <{}",
                MAX_TITLE_CHARS
            )));
        }
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let title = title.to_string();
        self.update_user(user_id, username, Some(guild_id), move |record| {
            record.title = title;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Change where a held badge shows up. This guild's copy wins over a
    /// same-named badge from elsewhere.
    pub async fn set_badge_priority(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        badge_name: &str,
        priority: i64,
    ) -> Result<i32, LevelingError> {
        if !BADGE_PRIORITY_RANGE.contains(&priority) {
            return Err(LevelingError::invalid("Invalid priority number! -1 to 5000."));
        }
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let priority = priority as i32;
        let local = badge_key(badge_name, guild_id);
        self.update_user(user_id, username, Some(guild_id), move |record| {
            let key = if record.badges.contains_key(&local) {
                local
            } else {
                record
                    .badges
                    .iter()
                    .find(|(_, held)| held.badge.name == badge_name)
                    .map(|(key, _)| key.clone())
                    .ok_or_else(|| LevelingError::invalid("You don't have that badge!"))?
            };
            if let Some(held) = record.badges.get_mut(&key) {
                held.priority_num = priority;
            }
            Ok(())
        })
        .await?;
        Ok(priority)
    }

    /// Buy a catalogue badge with credits. Free badges are simply handed out.
    pub async fn buy_badge(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        badge_name: &str,
    ) -> Result<BadgePurchase, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let badge = self.catalogue_badge(guild_id, badge_name).await?;
        if badge.price < 0 {
            return Err(LevelingError::invalid("That badge is not purchasable."));
        }
        let price = badge.price as u64;

        let _guard = self.locks.lock(user_id).await;
        let (mut record, _) = self.load_or_create(user_id, username, Some(guild_id)).await?;
        let key = badge.user_key();
        if record.badges.contains_key(&key) {
            return Err(LevelingError::invalid("You already have this badge!"));
        }

        if price > 0 {
            let balance = self.credits.balance(user_id, guild_id).await?;
            if balance < badge.price {
                return Err(LevelingError::invalid(format!(
                    "Not enough money! Need `{}` more.",
                    badge.price - balance
                )));
            }
            self.credits
                .withdraw(user_id, guild_id, price, "badge purchase")
                .await?;
        }

        record.badges.insert(
            key,
            BadgeRecord {
                badge,
                priority_num: 0,
            },
        );
        if let Err(err) = self.store.upsert_user(&record).await {
            if price > 0 {
                if let Err(refund) = self
                    .credits
                    .deposit(user_id, guild_id, price, "badge purchase refund")
                    .await
                {
                    tracing::error!(user_id, guild_id, price, error = %refund, "Badge refund failed");
                }
            }
            return Err(err.into());
        }

        tracing::info!(user_id, guild_id, badge = %badge_name, price, "Badge bought");
        Ok(if price == 0 {
            BadgePurchase::Free
        } else {
            BadgePurchase::Paid(price)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::economy::CreditLedger;
    use crate::core::leveling::leveling_service::test_support::harness;

    fn badge(name: &str, price: i64) -> GuildBadge {
        GuildBadge {
            guild_id: 10,
            name: name.into(),
            description: "desc".into(),
            bg_img: "https://example.invalid/b.png".into(),
            border_color: "#ffffff".into(),
            price,
        }
    }

    #[tokio::test]
    async fn info_and_title_are_length_checked() {
        let h = harness();
        h.service.set_info(10, 1, "a", "I like trains").await.unwrap();
        h.service.set_title(10, 1, "a", Some("Conductor")).await.unwrap();
        let record = h.store.get_user(1).await.unwrap().unwrap();
        assert_eq!(record.info, "I like trains");
        assert_eq!(record.title, "Conductor");

        let long_info = "x".repeat(MAX_INFO_CHARS);
        assert!(h.service.set_info(10, 1, "a", &long_info).await.is_err());
        let long_title = "y".repeat(MAX_TITLE_CHARS);
        assert!(h.service.set_title(10, 1, "a", Some(&long_title)).await.is_err());

        h.service.set_title(10, 1, "a", None).await.unwrap();
        let record = h.store.get_user(1).await.unwrap().unwrap();
        assert_eq!(record.title, "");
        assert_eq!(record.info, "I like trains");
    }

    #[tokio::test]
    async fn badge_priority_needs_a_held_badge() {
        let h = harness();
        h.store.save_guild_badge(&badge("star", 0)).await.unwrap();
        assert!(h.service.set_badge_priority(10, 1, "a", "star", 5).await.is_err());

        h.service.buy_badge(10, 1, "a", "star").await.unwrap();
        assert_eq!(h.service.set_badge_priority(10, 1, "a", "star", 4200).await.unwrap(), 4200);
        let record = h.store.get_user(1).await.unwrap().unwrap();
        assert_eq!(record.badges["star_10"].priority_num, 4200);

        for bad in [-2, 5001] {
            assert!(h.service.set_badge_priority(10, 1, "a", "star", bad).await.is_err());
        }
    }

    #[tokio::test]
    async fn buying_charges_credits_once() {
        let h = harness();
        h.store.save_guild_badge(&badge("gold", 30)).await.unwrap();
        h.store.save_guild_badge(&badge("secret", -1)).await.unwrap();

        let err = h.service.buy_badge(10, 1, "a", "gold").await.unwrap_err();
        assert!(err.to_string().contains("Need `30` more"));
        assert!(h.service.buy_badge(10, 1, "a", "secret").await.is_err());
        assert!(h.service.buy_badge(10, 1, "a", "missing").await.is_err());

        h.credits.deposit(1, 10, 50, "test").await.unwrap();
        assert_eq!(
            h.service.buy_badge(10, 1, "a", "gold").await.unwrap(),
            BadgePurchase::Paid(30)
        );
        assert_eq!(h.credits.balance(1, 10).await.unwrap(), 20);
        assert!(h.store.get_user(1).await.unwrap().unwrap().badges.contains_key("gold_10"));

        let err = h.service.buy_badge(10, 1, "a", "gold").await.unwrap_err();
        assert!(err.to_string().contains("already have"));
        assert_eq!(h.credits.balance(1, 10).await.unwrap(), 20);
    }
}
