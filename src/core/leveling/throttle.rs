// Message-XP throttle: decides whether a chat message earns experience.

use super::leveling_models::{ChatEvent, GuildSettings, UserRecord};
use chrono::Duration;
use rand::Rng;

/// Minimum time between two XP-granting messages from the same user.
pub const XP_COOLDOWN_SECS: i64 = 120;

/// Messages must be longer than this many characters.
pub const MIN_MESSAGE_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Bot,
    GuildDisabled,
    IgnoredChannel,
    OnCooldown { remaining: Duration },
    Command,
    TooShort,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    Grant { xp: u64 },
    Reject(RejectReason),
}

#[derive(Debug, Clone)]
pub struct MessageThrottle {
    cooldown: Duration,
    command_prefixes: Vec<String>,
}

impl MessageThrottle {
    pub fn new(command_prefixes: Vec<String>) -> Self {
        Self {
            cooldown: Duration::seconds(XP_COOLDOWN_SECS),
            command_prefixes: command_prefixes
                .into_iter()
                .filter(|prefix| !prefix.is_empty())
                .collect(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Evaluate a message against the sender's record and the guild settings.
    ///
    /// `record` is `None` for users the leveler has never seen, who are
    /// never on cooldown.
    pub fn evaluate<R: Rng + ?Sized>(
        &self,
        event: &ChatEvent,
        record: Option<&UserRecord>,
        settings: &GuildSettings,
        rng: &mut R,
    ) -> ThrottleDecision {
        if event.author_is_bot {
            return ThrottleDecision::Reject(RejectReason::Bot);
        }
        if settings.disabled {
            return ThrottleDecision::Reject(RejectReason::GuildDisabled);
        }
        if settings.is_ignored(event.channel_id) {
            return ThrottleDecision::Reject(RejectReason::IgnoredChannel);
        }

        if let Some(last) = record.and_then(|r| r.chat_block) {
            // A future chat_block (xp ban) yields a negative elapsed time.
            let elapsed = event.arrived_at.signed_duration_since(last);
            if elapsed < self.cooldown {
                return ThrottleDecision::Reject(RejectReason::OnCooldown {
                    remaining: self.cooldown - elapsed,
                });
            }
        }

        if self.is_command(&event.content) {
            return ThrottleDecision::Reject(RejectReason::Command);
        }
        if event.content.chars().count() <= MIN_MESSAGE_CHARS {
            return ThrottleDecision::Reject(RejectReason::TooShort);
        }
        if record.is_some_and(|r| r.last_message == event.content) {
            return ThrottleDecision::Reject(RejectReason::Repeated);
        }

        ThrottleDecision::Grant {
            xp: settings.xp_range.roll(rng),
        }
    }

    fn is_command(&self, content: &str) -> bool {
        self.command_prefixes
            .iter()
            .any(|prefix| content.starts_with(prefix.as_str()))
    }
}

/// Record that `event` earned XP so the next message is throttled against it.
pub fn mark_granted(record: &mut UserRecord, event: &ChatEvent) {
    record.chat_block = Some(event.arrived_at);
    record.last_message = event.content.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::leveling_models::XpRange;
    use chrono::{DateTime, TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn event(content: &str, at: DateTime<Utc>) -> ChatEvent {
        ChatEvent {
            author_id: 1,
            author_name: "ferris".into(),
            author_is_bot: false,
            guild_id: 10,
            channel_id: 100,
            content: content.into(),
            arrived_at: at,
        }
    }

    fn throttle() -> MessageThrottle {
        MessageThrottle::new(vec!["!".into(), "?".into()])
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn first_message_is_granted_within_range() {
        let settings = GuildSettings::for_guild(10);
        let decision = throttle().evaluate(
            &event("this is a long enough message", t0()),
            None,
            &settings,
            &mut rng(),
        );
        match decision {
            ThrottleDecision::Grant { xp } => assert!((15..=20).contains(&xp)),
            other => panic!("expected grant, got {other:?}"),
        }
    }

    #[test]
    fn cooldown_rejects_then_releases() {
        let settings = GuildSettings::for_guild(10);
        let throttle = throttle();
        let mut record = UserRecord::new(1, "ferris");
        mark_granted(&mut record, &event("first message in the channel", t0()));

        let early = event("second message in the channel", t0() + Duration::seconds(10));
        assert_eq!(
            throttle.evaluate(&early, Some(&record), &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::OnCooldown {
                remaining: Duration::seconds(110)
            })
        );

        let later = event("second message in the channel", t0() + Duration::seconds(121));
        assert!(matches!(
            throttle.evaluate(&later, Some(&record), &settings, &mut rng()),
            ThrottleDecision::Grant { .. }
        ));
    }

    #[test]
    fn exactly_at_cooldown_boundary_is_granted() {
        let settings = GuildSettings::for_guild(10);
        let mut record = UserRecord::new(1, "ferris");
        mark_granted(&mut record, &event("first message in the channel", t0()));
        let boundary = event("another message entirely", t0() + Duration::seconds(120));
        assert!(matches!(
            throttle().evaluate(&boundary, Some(&record), &settings, &mut rng()),
            ThrottleDecision::Grant { .. }
        ));
    }

    #[test]
    fn short_messages_are_rejected() {
        let settings = GuildSettings::for_guild(10);
        // exactly ten characters
        assert_eq!(
            throttle().evaluate(&event("0123456789", t0()), None, &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::TooShort)
        );
        assert!(matches!(
            throttle().evaluate(&event("01234567890", t0()), None, &settings, &mut rng()),
            ThrottleDecision::Grant { .. }
        ));
    }

    #[test]
    fn repeated_messages_are_rejected() {
        let settings = GuildSettings::for_guild(10);
        let mut record = UserRecord::new(1, "ferris");
        mark_granted(&mut record, &event("same old message here", t0()));
        let repeat = event("same old message here", t0() + Duration::seconds(600));
        assert_eq!(
            throttle().evaluate(&repeat, Some(&record), &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::Repeated)
        );
    }

    #[test]
    fn commands_bots_and_ignored_channels_are_rejected() {
        let mut settings = GuildSettings::for_guild(10);
        assert_eq!(
            throttle().evaluate(&event("!rank please show it", t0()), None, &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::Command)
        );

        let mut bot = event("beep boop I am a robot", t0());
        bot.author_is_bot = true;
        assert_eq!(
            throttle().evaluate(&bot, None, &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::Bot)
        );

        settings.ignored_channels.push(100);
        assert_eq!(
            throttle().evaluate(&event("a perfectly fine message", t0()), None, &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::IgnoredChannel)
        );
    }

    #[test]
    fn disabled_guilds_grant_nothing() {
        let mut settings = GuildSettings::for_guild(10);
        settings.disabled = true;
        assert_eq!(
            throttle().evaluate(&event("a perfectly fine message", t0()), None, &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::GuildDisabled)
        );
    }

    #[test]
    fn xp_ban_blocks_until_it_expires() {
        let settings = GuildSettings::for_guild(10);
        let mut record = UserRecord::new(1, "ferris");
        record.chat_block = Some(t0() + Duration::days(1));
        let during = event("trying to earn xp while banned", t0() + Duration::hours(5));
        assert!(matches!(
            throttle().evaluate(&during, Some(&record), &settings, &mut rng()),
            ThrottleDecision::Reject(RejectReason::OnCooldown { .. })
        ));
        let after = event("trying to earn xp after the ban", t0() + Duration::days(2));
        assert!(matches!(
            throttle().evaluate(&after, Some(&record), &settings, &mut rng()),
            ThrottleDecision::Grant { .. }
        ));
    }

    #[test]
    fn custom_range_is_used() {
        let mut settings = GuildSettings::for_guild(10);
        settings.xp_range = XpRange { min: 100, max: 101 };
        match throttle().evaluate(&event("a perfectly fine message", t0()), None, &settings, &mut rng()) {
            ThrottleDecision::Grant { xp } => assert!(xp == 100 || xp == 101),
            other => panic!("expected grant, got {other:?}"),
        }
    }
}
