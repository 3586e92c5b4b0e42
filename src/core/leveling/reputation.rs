// Reputation points: one gift per giver every 12 hours, a paid cooldown
// reset, and an admin override.

use super::leveling_service::{LevelingError, LevelingService};
use super::leveling_store::{LevelStore, SettingsStore};
use chrono::{DateTime, Duration, Utc};

pub const REP_COOLDOWN_SECS: i64 = 43_200;
pub const MAX_REP: i64 = 99_999;

/// Time left before `rep_block` allows another gift, if any.
pub fn rep_cooldown_remaining(
    rep_block: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let last = rep_block?;
    let remaining = Duration::seconds(REP_COOLDOWN_SECS) - now.signed_duration_since(last);
    (remaining > Duration::zero()).then_some(remaining)
}

/// Someone taking part in a rep exchange.
#[derive(Debug, Clone, Copy)]
pub struct RepParty<'a> {
    pub user_id: u64,
    pub name: &'a str,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepGift {
    pub receiver_id: u64,
    pub receiver_rep: u32,
}

impl<S: LevelStore, G: SettingsStore> LevelingService<S, G> {
    /// Give `receiver` a reputation point from `giver`.
    pub async fn give_rep(
        &self,
        guild_id: u64,
        giver: RepParty<'_>,
        receiver: RepParty<'_>,
        now: DateTime<Utc>,
    ) -> Result<RepGift, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        if giver.user_id == receiver.user_id {
            return Err(LevelingError::SelfRep);
        }
        if receiver.is_bot {
            return Err(LevelingError::BotRep);
        }

        // Always lock the lower id first so two users repping each other
        // cannot deadlock.
        let (first, second) = if giver.user_id < receiver.user_id {
            (giver.user_id, receiver.user_id)
        } else {
            (receiver.user_id, giver.user_id)
        };
        let _first = self.locks.lock(first).await;
        let _second = self.locks.lock(second).await;

        let (mut giver_record, _) = self
            .load_or_create(giver.user_id, giver.name, Some(guild_id))
            .await?;
        if let Some(remaining) = rep_cooldown_remaining(giver_record.rep_block, now) {
            return Err(LevelingError::RepOnCooldown { remaining });
        }
        let (mut receiver_record, _) = self
            .load_or_create(receiver.user_id, receiver.name, Some(guild_id))
            .await?;

        giver_record.rep_block = Some(now);
        receiver_record.rep = receiver_record.rep.saturating_add(1);
        self.store.upsert_user(&giver_record).await?;
        self.store.upsert_user(&receiver_record).await?;

        tracing::info!(
            giver = giver.user_id,
            receiver = receiver.user_id,
            rep = receiver_record.rep,
            "Reputation given"
        );
        Ok(RepGift {
            receiver_id: receiver.user_id,
            receiver_rep: receiver_record.rep,
        })
    }

    /// Reputation points a member holds. Creates the record like any lookup.
    pub async fn rep_count(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
    ) -> Result<u32, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let _guard = self.locks.lock(user_id).await;
        let (record, dirty) = self.load_or_create(user_id, username, Some(guild_id)).await?;
        if dirty {
            self.store.upsert_user(&record).await?;
        }
        Ok(record.rep)
    }

    /// Remaining rep cooldown for a user, `None` if they can give rep now.
    pub async fn rep_status(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<Duration>, LevelingError> {
        self.ensure_ready()?;
        let record = self.store.get_user(user_id).await?;
        Ok(record.and_then(|record| rep_cooldown_remaining(record.rep_block, now)))
    }

    /// Pay to end a running rep cooldown. Returns the price paid.
    pub async fn reset_rep_cooldown(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        let price = self.options.rep_price;
        if price == 0 {
            return Err(LevelingError::invalid(
                "Rep resets are not set up. Ask the bot owner to provide a rep reset cost.",
            ));
        }

        let _guard = self.locks.lock(user_id).await;
        let (mut record, _) = self.load_or_create(user_id, username, Some(guild_id)).await?;
        if rep_cooldown_remaining(record.rep_block, now).is_none() {
            return Err(LevelingError::invalid(
                "You can give a rep without resetting your rep cooldown!",
            ));
        }
        if !self.credits.can_spend(user_id, guild_id, price).await? {
            return Err(LevelingError::invalid(format!(
                "Insufficient funds. Rep resets cost: ${}",
                price
            )));
        }

        self.credits
            .withdraw(user_id, guild_id, price, "rep cooldown reset")
            .await?;
        record.rep_block = Some(now - Duration::seconds(REP_COOLDOWN_SECS + 1));
        self.store.upsert_user(&record).await?;
        tracing::info!(user_id, price, "Rep cooldown reset");
        Ok(price)
    }

    /// Admin override of a user's reputation.
    pub async fn set_rep(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        rep: i64,
    ) -> Result<u32, LevelingError> {
        self.ensure_ready()?;
        if rep < 0 {
            return Err(LevelingError::invalid("Please enter a positive number."));
        }
        if rep > MAX_REP {
            return Err(LevelingError::invalid(
                "Please use a number that is smaller than 100,000.",
            ));
        }
        self.enabled_settings(guild_id).await?;

        let (record, ()) = self
            .update_user(user_id, username, Some(guild_id), |record| {
                record.rep = rep as u32;
                Ok(())
            })
            .await?;
        Ok(record.rep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::economy::CreditLedger;
    use crate::core::leveling::dispatcher::test_doubles::RecordingGranter;
    use crate::core::leveling::leveling_service::test_support::{harness, harness_with};
    use crate::core::leveling::leveling_service::LevelingOptions;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn party(user_id: u64) -> RepParty<'static> {
        RepParty {
            user_id,
            name: "someone",
            is_bot: false,
        }
    }

    #[test]
    fn cooldown_window() {
        assert_eq!(rep_cooldown_remaining(None, t0()), None);
        assert_eq!(
            rep_cooldown_remaining(Some(t0()), t0() + Duration::hours(2)),
            Some(Duration::hours(10))
        );
        assert_eq!(
            rep_cooldown_remaining(Some(t0()), t0() + Duration::hours(12)),
            None
        );
    }

    #[tokio::test]
    async fn rep_is_given_once_per_window() {
        let h = harness();
        let gift = h.service.give_rep(10, party(1), party(2), t0()).await.unwrap();
        assert_eq!(gift.receiver_rep, 1);

        let err = h
            .service
            .give_rep(10, party(1), party(3), t0() + Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LevelingError::RepOnCooldown { .. }));
        assert!(err.to_string().contains("11 hours, 0 minutes, and 0 seconds"));

        h.service
            .give_rep(10, party(1), party(2), t0() + Duration::hours(12))
            .await
            .unwrap();
        let receiver = h.store.get_user(2).await.unwrap().unwrap();
        assert_eq!(receiver.rep, 2);
    }

    #[tokio::test]
    async fn concurrent_gifts_to_one_receiver_all_count() {
        let h = std::sync::Arc::new(harness());
        let mut handles = Vec::new();
        for giver in 1..=20u64 {
            let h = std::sync::Arc::clone(&h);
            handles.push(tokio::spawn(async move {
                h.service.give_rep(10, party(giver), party(99), t0()).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(h.store.get_user(99).await.unwrap().unwrap().rep, 20);
    }

    #[tokio::test]
    async fn rep_count_reads_and_creates() {
        let h = harness();
        assert_eq!(h.service.rep_count(10, 2, "two").await.unwrap(), 0);
        assert!(h.store.get_user(2).await.unwrap().is_some());
        h.service.give_rep(10, party(1), party(2), t0()).await.unwrap();
        assert_eq!(h.service.rep_count(10, 2, "two").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cannot_rep_self_or_bots() {
        let h = harness();
        assert!(matches!(
            h.service.give_rep(10, party(1), party(1), t0()).await,
            Err(LevelingError::SelfRep)
        ));
        let mut bot = party(2);
        bot.is_bot = true;
        assert!(matches!(
            h.service.give_rep(10, party(1), bot, t0()).await,
            Err(LevelingError::BotRep)
        ));
    }

    #[tokio::test]
    async fn reset_requires_price_cooldown_and_funds() {
        let h = harness();
        let err = h.service.reset_rep_cooldown(10, 1, "a", t0()).await.unwrap_err();
        assert!(err.to_string().contains("not set up"));

        let h = harness_with(
            RecordingGranter::default(),
            LevelingOptions {
                rep_price: 50,
                ..LevelingOptions::default()
            },
        );
        let err = h.service.reset_rep_cooldown(10, 1, "a", t0()).await.unwrap_err();
        assert!(err.to_string().contains("without resetting"));

        h.service.give_rep(10, party(1), party(2), t0()).await.unwrap();
        let err = h.service.reset_rep_cooldown(10, 1, "a", t0()).await.unwrap_err();
        assert!(err.to_string().contains("Insufficient funds"));

        h.credits.deposit(1, 10, 80, "test").await.unwrap();
        let paid = h.service.reset_rep_cooldown(10, 1, "a", t0()).await.unwrap();
        assert_eq!(paid, 50);
        assert_eq!(h.credits.balance(1, 10).await.unwrap(), 30);
        assert_eq!(h.service.rep_status(1, t0()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_rep_validates_range() {
        let h = harness();
        assert_eq!(h.service.set_rep(10, 1, "a", 99_999).await.unwrap(), 99_999);
        assert!(matches!(
            h.service.set_rep(10, 1, "a", 100_000).await,
            Err(LevelingError::InvalidInput(_))
        ));
        assert!(matches!(
            h.service.set_rep(10, 1, "a", -1).await,
            Err(LevelingError::InvalidInput(_))
        ));
        assert_eq!(h.store.get_user(1).await.unwrap().unwrap().rep, 99_999);
    }
}
