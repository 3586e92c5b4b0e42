// Core leveling module - experience, levels, reputation and leaderboards.
// Everything here is platform-agnostic; Discord and storage live elsewhere.

pub mod dispatcher;
pub mod importer;
pub mod keyed_locks;
pub mod leveling_admin;
pub mod leveling_math;
pub mod leveling_models;
pub mod leveling_service;
pub mod leveling_store;
pub mod message_queue;
pub mod migration;
pub mod profile;
pub mod ranking;
pub mod readiness;
pub mod reputation;
pub mod throttle;

pub use dispatcher::{
    DispatchReport, GrantError, LevelUpAnnouncement, LevelUpDispatcher, LevelUpNotifier,
    NotifyError, Recipient, RoleGranter,
};
pub use importer::{ImportError, Mee6Page, Mee6Source, TatsuEntry, TatsuSource};
pub use leveling_admin::{GuildOverview, GuildToggle};
pub use leveling_models::*;
pub use leveling_service::{
    LevelingError, LevelingOptions, LevelingService, MessageOutcome, ProfileView,
};
pub use leveling_store::{LevelStore, SettingsStore, StoreError, UserQuery};
pub use message_queue::{message_queue, ChatProcessor, MessageQueue, MessageQueueReceiver};
pub use migration::{migrate_user_document, MigrationError};
pub use ranking::{BoardMetric, BoardScope, Leaderboard, PageError, Rank, PAGE_SIZE};
pub use readiness::{monitor_store, ConnectionState, Readiness};
pub use profile::BadgePurchase;
pub use reputation::{RepGift, RepParty};
