// The leveling service - ALL the business logic for experience, levels and
// rankings lives behind this type. There is no serenity or poise in here:
// callers hand in plain ids and names and get plain data back, so the same
// service drives the Discord commands, the message queue and the tests.
//
// Admin, reputation and import operations are further `impl` blocks in
// `leveling_admin.rs`, `reputation.rs` and `importer.rs`.

use super::dispatcher::{DispatchReport, GuildRewards, LevelUpDispatcher};
use super::leveling_math::{
    apply_experience, assign_level, cumulative_experience_for_level, required_experience,
};
use super::leveling_models::{ChatEvent, GuildProgress, GuildSettings, LevelUpEvent, UserRecord};
use super::leveling_store::{LevelStore, SettingsStore, StoreError};
use super::ranking::{BoardMetric, BoardQuery, BoardScope, Leaderboard, Rank};
use super::readiness::{ConnectionState, Readiness};
use super::throttle::{mark_granted, MessageThrottle, RejectReason, ThrottleDecision};
use super::keyed_locks::KeyedLocks;
use crate::core::economy::{CreditError, CreditLedger};
use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Highest level an admin may assign.
pub const MAX_ASSIGNABLE_LEVEL: i64 = 10_000;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("The leveling database is not ready yet ({0}). Try again in a moment.")]
    NotReady(ConnectionState),

    #[error("Leveler commands for this server are disabled.")]
    GuildDisabled,

    #[error("{0}")]
    InvalidInput(String),

    #[error("You can't give a rep to yourself!")]
    SelfRep,

    #[error("You can't give a rep to a bot!")]
    BotRep,

    #[error("You need to wait {} until you can give reputation again!", format_wait(.remaining))]
    RepOnCooldown { remaining: Duration },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("{0}")]
    Credits(#[from] CreditError),

    #[error("Import failed: {0}")]
    Import(#[from] super::importer::ImportError),
}

impl LevelingError {
    pub fn invalid(message: impl Into<String>) -> Self {
        LevelingError::InvalidInput(message.into())
    }
}

/// "3 hours, 2 minutes, and 1 seconds"
pub fn format_wait(remaining: &Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let (hours, rest) = (total / 3600, total % 3600);
    format!(
        "{} hours, {} minutes, and {} seconds",
        hours,
        rest / 60,
        rest % 60
    )
}

// ============================================================================
// RESULTS
// ============================================================================

/// What happened to a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Rejected(RejectReason),
    Granted {
        xp: u64,
        /// One report per level crossed.
        level_ups: Vec<DispatchReport>,
    },
}

#[derive(Debug, Clone)]
pub struct SetLevelOutcome {
    pub record: UserRecord,
    pub report: DispatchReport,
}

/// Everything the profile and rank commands display.
#[derive(Debug, Clone)]
pub struct ProfileView {
    pub record: UserRecord,
    pub progress: GuildProgress,
    /// Experience needed to finish the current level.
    pub required: u64,
    pub server_exp: u64,
    pub server_rank: Rank,
    pub global_rank: Rank,
    pub server_rep_rank: Rank,
    pub global_rep_rank: Rank,
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Debug, Clone)]
pub struct LevelingOptions {
    /// Messages starting with any of these are commands and earn nothing.
    pub command_prefixes: Vec<String>,
    /// Price of a rep cooldown reset. Zero disables resets.
    pub rep_price: u64,
}

impl Default for LevelingOptions {
    fn default() -> Self {
        Self {
            command_prefixes: vec!["!".to_string()],
            rep_price: 0,
        }
    }
}

pub struct LevelingService<S: LevelStore, G: SettingsStore> {
    pub(super) store: Arc<S>,
    pub(super) settings: G,
    pub(super) credits: Arc<dyn CreditLedger>,
    pub(super) dispatcher: LevelUpDispatcher,
    pub(super) readiness: Readiness,
    /// Keyed by user id.
    pub(super) locks: KeyedLocks,
    /// Keyed by guild id. Held across settings read-modify-write.
    pub(super) settings_locks: KeyedLocks,
    pub(super) throttle: MessageThrottle,
    pub(super) options: LevelingOptions,
}

impl<S: LevelStore, G: SettingsStore> LevelingService<S, G> {
    pub fn new(
        store: Arc<S>,
        settings: G,
        credits: Arc<dyn CreditLedger>,
        dispatcher: LevelUpDispatcher,
        readiness: Readiness,
        options: LevelingOptions,
    ) -> Self {
        Self {
            store,
            settings,
            credits,
            dispatcher,
            readiness,
            locks: KeyedLocks::new(),
            settings_locks: KeyedLocks::new(),
            throttle: MessageThrottle::new(options.command_prefixes.clone()),
            options,
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    pub(super) fn ensure_ready(&self) -> Result<(), LevelingError> {
        let state = self.readiness.state();
        if state.is_ready() {
            return Ok(());
        }
        tracing::debug!(state = %state, "Leveling operation refused, store not ready");
        Err(LevelingError::NotReady(state))
    }

    /// Settings for a guild whose leveler is enabled.
    pub(super) async fn enabled_settings(&self, guild_id: u64) -> Result<GuildSettings, LevelingError> {
        let settings = self.settings.get_settings(guild_id).await?;
        if settings.disabled {
            return Err(LevelingError::GuildDisabled);
        }
        Ok(settings)
    }

    /// Fetch a user, creating the record and its guild entry on first sight.
    ///
    /// Returns the record and whether it differs from what is stored.
    /// Must be called while holding the user's lock.
    pub(super) async fn load_or_create(
        &self,
        user_id: u64,
        username: &str,
        guild_id: Option<u64>,
    ) -> Result<(UserRecord, bool), LevelingError> {
        let (mut record, mut dirty) = match self.store.get_user(user_id).await? {
            Some(record) => (record, false),
            None => {
                tracing::debug!(user_id, "Creating leveling record");
                (UserRecord::new(user_id, username), true)
            }
        };

        if !username.is_empty() && record.username != username {
            record.username = username.to_string();
            dirty = true;
        }
        if let Some(guild_id) = guild_id {
            if !record.is_in_guild(guild_id) {
                record.progress_mut(guild_id);
                dirty = true;
            }
        }
        Ok((record, dirty))
    }

    /// Read-modify-write of one user under that user's lock.
    ///
    /// `mutate` may refuse the change by returning an error; nothing is
    /// written in that case.
    pub(super) async fn update_user<T, F>(
        &self,
        user_id: u64,
        username: &str,
        guild_id: Option<u64>,
        mutate: F,
    ) -> Result<(UserRecord, T), LevelingError>
    where
        F: FnOnce(&mut UserRecord) -> Result<T, LevelingError> + Send,
    {
        let _guard = self.locks.lock(user_id).await;
        let (mut record, _) = self.load_or_create(user_id, username, guild_id).await?;
        let value = mutate(&mut record)?;
        self.store.upsert_user(&record).await?;
        Ok((record, value))
    }

    pub(super) async fn guild_rewards(&self, guild_id: u64) -> Result<GuildRewards, LevelingError> {
        Ok(GuildRewards {
            role_links: self.store.role_links(guild_id).await?,
            badge_links: self.store.badge_links(guild_id).await?,
            catalogue: self.store.guild_badges(guild_id).await?,
        })
    }

    /// Rewards for a guild. A failed lookup is logged and yields no rewards
    /// plus a warning for the reports, so the experience itself still saves.
    async fn rewards_or_empty(&self, guild_id: u64) -> (GuildRewards, Option<String>) {
        match self.guild_rewards(guild_id).await {
            Ok(rewards) => (rewards, None),
            Err(err) => {
                tracing::warn!(guild_id, error = %err, "Could not load level-up rewards");
                (
                    GuildRewards::default(),
                    Some(format!("Level-up rewards could not be loaded: {}", err)),
                )
            }
        }
    }

    async fn grant_all(&self, record: &mut UserRecord, events: &[LevelUpEvent]) -> Vec<DispatchReport> {
        let Some(first) = events.first() else {
            return Vec::new();
        };
        let (rewards, warning) = self.rewards_or_empty(first.guild_id).await;
        let mut reports = Vec::with_capacity(events.len());
        for event in events {
            let mut report = self.dispatcher.grant_rewards(record, event, &rewards).await;
            report.warnings.extend(warning.clone());
            reports.push(report);
        }
        reports
    }

    async fn announce_all(
        &self,
        record: &UserRecord,
        settings: &GuildSettings,
        reports: &mut [DispatchReport],
    ) {
        for report in reports.iter_mut() {
            tracing::info!(
                user_id = report.event.user_id,
                guild_id = report.event.guild_id,
                old_level = report.event.old_level,
                new_level = report.event.new_level,
                total_xp = report.event.total_xp,
                "User leveled up"
            );
            self.dispatcher.announce(record, settings, report).await;
            self.dispatcher.report_warnings(settings, report).await;
        }
    }

    // ------------------------------------------------------------------------
    // Message experience
    // ------------------------------------------------------------------------

    /// Run a chat message through the throttle and credit any experience.
    pub async fn process_message(&self, event: &ChatEvent) -> Result<MessageOutcome, LevelingError> {
        self.ensure_ready()?;
        if event.author_is_bot {
            return Ok(MessageOutcome::Rejected(RejectReason::Bot));
        }

        let settings = self.settings.get_settings(event.guild_id).await?;
        let guard = self.locks.lock(event.author_id).await;
        let (mut record, dirty) = self
            .load_or_create(event.author_id, &event.author_name, Some(event.guild_id))
            .await?;

        let decision = {
            let mut rng = rand::thread_rng();
            self.throttle
                .evaluate(event, Some(&record), &settings, &mut rng)
        };

        let xp = match decision {
            ThrottleDecision::Grant { xp } => xp,
            ThrottleDecision::Reject(reason) => {
                tracing::debug!(
                    user_id = event.author_id,
                    guild_id = event.guild_id,
                    ?reason,
                    "Message does not qualify for xp"
                );
                if dirty {
                    self.store.upsert_user(&record).await?;
                }
                return Ok(MessageOutcome::Rejected(reason));
            }
        };

        mark_granted(&mut record, event);
        let events = apply_experience(&mut record, event.guild_id, xp, Some(event.channel_id));
        let mut level_ups = self.grant_all(&mut record, &events).await;
        self.store.upsert_user(&record).await?;
        drop(guard);

        tracing::debug!(
            user_id = event.author_id,
            guild_id = event.guild_id,
            xp,
            "Awarded message xp"
        );

        self.announce_all(&record, &settings, &mut level_ups).await;

        if settings.msg_credits > 0 {
            if let Err(err) = self
                .credits
                .deposit(
                    event.author_id,
                    event.guild_id,
                    u64::from(settings.msg_credits),
                    "chat credits",
                )
                .await
            {
                tracing::warn!(user_id = event.author_id, error = %err, "Failed to deposit chat credits");
            }
        }

        Ok(MessageOutcome::Granted { xp, level_ups })
    }

    // ------------------------------------------------------------------------
    // Level assignment
    // ------------------------------------------------------------------------

    /// Force a user's level in a guild and run the level-up dispatch for it.
    pub async fn set_level(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        level: i64,
        channel_id: Option<u64>,
    ) -> Result<SetLevelOutcome, LevelingError> {
        self.ensure_ready()?;
        if level < 0 {
            return Err(LevelingError::invalid("Please enter a positive number."));
        }
        if level > MAX_ASSIGNABLE_LEVEL {
            return Err(LevelingError::invalid(
                "Please enter a number that is less than 10,000.",
            ));
        }
        let level = level as u32;
        let settings = self.enabled_settings(guild_id).await?;

        let guard = self.locks.lock(user_id).await;
        let (mut record, _) = self.load_or_create(user_id, username, Some(guild_id)).await?;
        let old_level = record.progress(guild_id).level;
        assign_level(&mut record, guild_id, level);

        let event = LevelUpEvent {
            user_id,
            guild_id,
            old_level,
            new_level: level,
            total_xp: record.total_exp,
            channel_id,
        };
        let (rewards, warning) = self.rewards_or_empty(guild_id).await;
        let mut report = self
            .dispatcher
            .grant_rewards(&mut record, &event, &rewards)
            .await;
        report.warnings.extend(warning);
        self.store.upsert_user(&record).await?;
        drop(guard);

        tracing::info!(user_id, guild_id, old_level, new_level = level, "Level assigned");

        let mut reports = [report];
        self.announce_all(&record, &settings, &mut reports).await;
        let [report] = reports;
        Ok(SetLevelOutcome { record, report })
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Build a leaderboard. `members` limits guild boards to current members.
    pub async fn leaderboard(
        &self,
        guild_id: u64,
        scope: BoardScope,
        metric: BoardMetric,
        members: Option<&HashSet<u64>>,
    ) -> Result<Leaderboard, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;
        self.board(BoardQuery::new(scope, metric), members).await
    }

    async fn board(
        &self,
        query: BoardQuery,
        members: Option<&HashSet<u64>>,
    ) -> Result<Leaderboard, LevelingError> {
        let records = self.store.query_users(&query.store_query()).await?;
        Ok(Leaderboard::build(query, &records, members))
    }

    /// Profile data for one user in a guild.
    pub async fn profile(
        &self,
        guild_id: u64,
        user_id: u64,
        username: &str,
        members: Option<&HashSet<u64>>,
    ) -> Result<ProfileView, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let record = {
            let _guard = self.locks.lock(user_id).await;
            let (record, dirty) = self.load_or_create(user_id, username, Some(guild_id)).await?;
            if dirty {
                self.store.upsert_user(&record).await?;
            }
            record
        };

        let guild = BoardScope::Guild(guild_id);
        let server_rank = self
            .board(BoardQuery::new(guild, BoardMetric::Experience), members)
            .await?
            .rank_of(user_id);
        let server_rep_rank = self
            .board(BoardQuery::new(guild, BoardMetric::Reputation), members)
            .await?
            .rank_of(user_id);
        let global_rank = self
            .board(BoardQuery::new(BoardScope::Global, BoardMetric::Experience), None)
            .await?
            .rank_of(user_id);
        let global_rep_rank = self
            .board(BoardQuery::new(BoardScope::Global, BoardMetric::Reputation), None)
            .await?
            .rank_of(user_id);

        let progress = record.progress(guild_id);
        Ok(ProfileView {
            required: required_experience(i64::from(progress.level)),
            server_exp: cumulative_experience_for_level(progress.level) + progress.current_exp,
            progress,
            server_rank,
            global_rank,
            server_rep_rank,
            global_rep_rank,
            record,
        })
    }

    // ------------------------------------------------------------------------
    // Data removal
    // ------------------------------------------------------------------------

    /// Soft-clear everything stored about a user except the id.
    pub async fn forget_user(&self, user_id: u64) -> Result<(), LevelingError> {
        self.ensure_ready()?;
        let _guard = self.locks.lock(user_id).await;
        let Some(mut record) = self.store.get_user(user_id).await? else {
            return Ok(());
        };
        record.soft_clear();
        self.store.upsert_user(&record).await?;
        tracing::info!(user_id, "Cleared leveling data on request");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::leveling::dispatcher::test_doubles::{RecordingGranter, RecordingNotifier};
    use crate::infra::economy::InMemoryCreditLedger;
    use crate::infra::leveling::{InMemoryLevelStore, InMemorySettingsStore};

    pub type TestService = LevelingService<InMemoryLevelStore, InMemorySettingsStore>;

    pub struct Harness {
        pub service: TestService,
        pub store: Arc<InMemoryLevelStore>,
        pub granter: Arc<RecordingGranter>,
        pub notifier: Arc<RecordingNotifier>,
        pub credits: Arc<InMemoryCreditLedger>,
    }

    pub fn harness() -> Harness {
        harness_with(RecordingGranter::default(), LevelingOptions::default())
    }

    pub fn harness_with(granter: RecordingGranter, options: LevelingOptions) -> Harness {
        let store = Arc::new(InMemoryLevelStore::new());
        let granter = Arc::new(granter);
        let notifier = Arc::new(RecordingNotifier::default());
        let credits = Arc::new(InMemoryCreditLedger::new());
        let service = LevelingService::new(
            Arc::clone(&store),
            InMemorySettingsStore::new(),
            credits.clone(),
            LevelUpDispatcher::new(granter.clone(), notifier.clone()),
            Readiness::ready(),
            options,
        );
        Harness {
            service,
            store,
            granter,
            notifier,
            credits,
        }
    }
}
