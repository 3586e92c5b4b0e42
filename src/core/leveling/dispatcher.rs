// Level-up side effects: linked roles, linked badges and the announcement.
//
// Grants go through `RoleGranter` and announcements through
// `LevelUpNotifier`; both are implemented by the Discord layer. Nothing in
// here fails the caller: every problem ends up as a warning in the
// `DispatchReport`.

use super::leveling_models::{
    BadgeLink, BadgeRecord, GuildBadge, GuildSettings, LevelUpEvent, RoleLink,
    UserRecord,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrantError {
    #[error("Missing Permissions")]
    PermissionDenied,

    #[error("Role `{0}` does not exist")]
    RoleNotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Cannot send messages to the target")]
    Forbidden,

    #[error("Target channel not found")]
    ChannelNotFound,

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Role changes requested by the leveler. Roles are addressed by name.
#[async_trait]
pub trait RoleGranter: Send + Sync {
    async fn add_role(&self, guild_id: u64, user_id: u64, role_name: &str)
        -> Result<(), GrantError>;

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_name: &str,
    ) -> Result<(), GrantError>;
}

/// Sink for level-up announcements and dispatch warnings.
#[async_trait]
pub trait LevelUpNotifier: Send + Sync {
    async fn announce(&self, announcement: &LevelUpAnnouncement) -> Result<(), NotifyError>;

    async fn report(&self, target: &Recipient, warnings: &[String]) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Channel(u64),
    DirectMessage(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayName {
    Mention(u64),
    Plain(String),
    /// Private announcements address the user directly.
    You,
}

impl DisplayName {
    pub fn render(&self) -> String {
        match self {
            DisplayName::Mention(user_id) => format!("<@{}>", user_id),
            DisplayName::Plain(name) => name.clone(),
            DisplayName::You => "You".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUpAnnouncement {
    pub user_id: u64,
    pub guild_id: u64,
    pub new_level: u32,
    pub total_xp: u64,
    pub recipient: Recipient,
    pub display: DisplayName,
    pub text_only: bool,
}

impl LevelUpAnnouncement {
    /// Headline text. `guild_name` is only shown in private messages.
    pub fn headline(&self, guild_name: Option<&str>) -> String {
        let location = match (&self.recipient, guild_name) {
            (Recipient::DirectMessage(_), Some(name)) => format!(" on {}", name),
            _ => String::new(),
        };
        format!(
            "**{} just gained a level{}! (LEVEL {})**",
            self.display.render(),
            location,
            self.new_level
        )
    }
}

/// Everything one level-up dispatch did or failed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub event: LevelUpEvent,
    pub roles_added: Vec<String>,
    pub roles_removed: Vec<String>,
    pub badges_added: Vec<String>,
    pub warnings: Vec<String>,
    pub announced: bool,
}

impl DispatchReport {
    pub fn new(event: LevelUpEvent) -> Self {
        Self {
            event,
            roles_added: Vec::new(),
            roles_removed: Vec::new(),
            badges_added: Vec::new(),
            warnings: Vec::new(),
            announced: false,
        }
    }
}

/// Guild data a dispatch needs, loaded once per batch of events.
#[derive(Debug, Clone, Default)]
pub struct GuildRewards {
    pub role_links: Vec<RoleLink>,
    pub badge_links: Vec<BadgeLink>,
    pub catalogue: Vec<GuildBadge>,
}

impl GuildRewards {
    pub fn is_empty(&self) -> bool {
        self.role_links.is_empty() && self.badge_links.is_empty()
    }
}

#[derive(Clone)]
pub struct LevelUpDispatcher {
    granter: Arc<dyn RoleGranter>,
    notifier: Arc<dyn LevelUpNotifier>,
}

impl LevelUpDispatcher {
    pub fn new(granter: Arc<dyn RoleGranter>, notifier: Arc<dyn LevelUpNotifier>) -> Self {
        Self { granter, notifier }
    }

    /// Apply role and badge links for the level in `event`.
    ///
    /// Badges are written into `record`; the caller persists it.
    pub async fn grant_rewards(
        &self,
        record: &mut UserRecord,
        event: &LevelUpEvent,
        rewards: &GuildRewards,
    ) -> DispatchReport {
        let mut report = DispatchReport::new(event.clone());
        if rewards.is_empty() {
            return report;
        }

        for link in rewards
            .role_links
            .iter()
            .filter(|link| link.level == event.new_level)
        {
            match self
                .granter
                .add_role(event.guild_id, event.user_id, &link.role_name)
                .await
            {
                Ok(()) => report.roles_added.push(link.role_name.clone()),
                Err(err) => {
                    tracing::warn!(
                        guild_id = event.guild_id,
                        user_id = event.user_id,
                        role = %link.role_name,
                        error = %err,
                        "Level-up role grant failed"
                    );
                    report
                        .warnings
                        .push(format!("Levelup role adding failed: {}", err));
                }
            }

            let Some(remove_role) = link.remove_role.as_deref() else {
                continue;
            };
            match self
                .granter
                .remove_role(event.guild_id, event.user_id, remove_role)
                .await
            {
                Ok(()) => report.roles_removed.push(remove_role.to_string()),
                Err(err) => {
                    tracing::warn!(
                        guild_id = event.guild_id,
                        user_id = event.user_id,
                        role = %remove_role,
                        error = %err,
                        "Level-up role removal failed"
                    );
                    report
                        .warnings
                        .push(format!("Levelup role removal failed: {}", err));
                }
            }
        }

        for link in rewards
            .badge_links
            .iter()
            .filter(|link| link.level == event.new_level)
        {
            let Some(badge) = rewards
                .catalogue
                .iter()
                .find(|badge| badge.name == link.badge_name)
            else {
                report.warnings.push(format!(
                    "Error. Badge was not given: `{}` is not in the server badge list",
                    link.badge_name
                ));
                continue;
            };

            let key = badge.user_key();
            let priority_num = record
                .badges
                .get(&key)
                .map_or(0, |existing| existing.priority_num);
            record.badges.insert(
                key.clone(),
                BadgeRecord {
                    badge: badge.clone(),
                    priority_num,
                },
            );
            report.badges_added.push(key);
        }

        report
    }

    /// Send the announcement, if the guild wants one. Failures are logged.
    pub async fn announce(
        &self,
        record: &UserRecord,
        settings: &GuildSettings,
        report: &mut DispatchReport,
    ) {
        let Some(announcement) = build_announcement(record, &report.event, settings) else {
            return;
        };

        match self.notifier.announce(&announcement).await {
            Ok(()) => report.announced = true,
            Err(err) => {
                tracing::warn!(
                    guild_id = announcement.guild_id,
                    user_id = announcement.user_id,
                    error = %err,
                    "Failed to send level-up announcement"
                );
            }
        }
    }

    /// Surface grant warnings where the level-up happened.
    pub async fn report_warnings(&self, settings: &GuildSettings, report: &DispatchReport) {
        if report.warnings.is_empty() {
            return;
        }
        let Some(target) = warning_target(settings, &report.event) else {
            return;
        };
        if let Err(err) = self.notifier.report(&target, &report.warnings).await {
            tracing::warn!(error = %err, "Failed to report level-up warnings");
        }
    }
}

/// Where, and how, a level-up would be announced.
///
/// Private messages take precedence over the lock channel, which takes
/// precedence over the channel the level-up happened in.
pub fn build_announcement(
    record: &UserRecord,
    event: &LevelUpEvent,
    settings: &GuildSettings,
) -> Option<LevelUpAnnouncement> {
    if !settings.lvl_msg {
        return None;
    }

    let (recipient, display) = if settings.private_lvl_message {
        (Recipient::DirectMessage(event.user_id), DisplayName::You)
    } else {
        let channel = settings.lvl_msg_lock.or(event.channel_id)?;
        let display = if settings.mentions {
            DisplayName::Mention(event.user_id)
        } else {
            DisplayName::Plain(record.username.clone())
        };
        (Recipient::Channel(channel), display)
    };

    Some(LevelUpAnnouncement {
        user_id: event.user_id,
        guild_id: event.guild_id,
        new_level: event.new_level,
        total_xp: event.total_xp,
        recipient,
        display,
        text_only: settings.text_only,
    })
}

fn warning_target(settings: &GuildSettings, event: &LevelUpEvent) -> Option<Recipient> {
    if settings.private_lvl_message {
        return Some(Recipient::DirectMessage(event.user_id));
    }
    settings
        .lvl_msg_lock
        .or(event.channel_id)
        .map(Recipient::Channel)
}

#[cfg(test)]
pub(crate) mod test_doubles {
    use super::*;
    use std::sync::Mutex;

    /// Records every call; fails for the role names it is told to.
    #[derive(Default)]
    pub struct RecordingGranter {
        pub denied: Vec<String>,
        pub added: Mutex<Vec<(u64, String)>>,
        pub removed: Mutex<Vec<(u64, String)>>,
    }

    impl RecordingGranter {
        pub fn denying(roles: &[&str]) -> Self {
            Self {
                denied: roles.iter().map(|r| r.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RoleGranter for RecordingGranter {
        async fn add_role(&self, _: u64, user_id: u64, role_name: &str) -> Result<(), GrantError> {
            if self.denied.iter().any(|r| r == role_name) {
                return Err(GrantError::PermissionDenied);
            }
            self.added
                .lock()
                .unwrap()
                .push((user_id, role_name.to_string()));
            Ok(())
        }

        async fn remove_role(
            &self,
            _: u64,
            user_id: u64,
            role_name: &str,
        ) -> Result<(), GrantError> {
            if self.denied.iter().any(|r| r == role_name) {
                return Err(GrantError::PermissionDenied);
            }
            self.removed
                .lock()
                .unwrap()
                .push((user_id, role_name.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub fail: bool,
        pub announcements: Mutex<Vec<LevelUpAnnouncement>>,
        pub reports: Mutex<Vec<(Recipient, Vec<String>)>>,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl LevelUpNotifier for RecordingNotifier {
        async fn announce(&self, announcement: &LevelUpAnnouncement) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Forbidden);
            }
            self.announcements.lock().unwrap().push(announcement.clone());
            Ok(())
        }

        async fn report(&self, target: &Recipient, warnings: &[String]) -> Result<(), NotifyError> {
            self.reports
                .lock()
                .unwrap()
                .push((target.clone(), warnings.to_vec()));
            Ok(())
        }
    }
}
