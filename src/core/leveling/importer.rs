// Level import from other leveling bots: Mee6 levels and role rewards, and
// Tatsumaki scores. Every player is imported on their own; one bad entry is
// counted and logged, never fatal for the rest.

use super::leveling_math::level_for_cumulative_experience;
use super::leveling_models::RoleLink;
use super::leveling_service::{LevelingError, LevelingService};
use super::leveling_store::{LevelStore, SettingsStore};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("No data was found within the {service} API (status {status})")]
    NoData { service: &'static str, status: u16 },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Mee6Player {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Mee6Role {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Mee6RoleReward {
    pub rank: u32,
    pub role: Mee6Role,
}

/// One leaderboard page as returned by Mee6.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Mee6Page {
    #[serde(default)]
    pub players: Vec<Mee6Player>,
    #[serde(default)]
    pub role_rewards: Vec<Mee6RoleReward>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(id) => Ok(id),
        RawId::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Where Mee6 data comes from. Implemented over HTTP in `infra::mee6`.
#[async_trait]
pub trait Mee6Source: Send + Sync {
    /// Zero-based leaderboard page.
    async fn leaderboard_page(&self, guild_id: u64, page: u32) -> Result<Mee6Page, ImportError>;
}

/// One Tatsumaki leaderboard row. `score` is total experience.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TatsuEntry {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub user_id: u64,
    pub score: u64,
}

/// Where Tatsumaki data comes from. Implemented over HTTP in `infra::tatsu`.
#[async_trait]
pub trait TatsuSource: Send + Sync {
    /// The whole guild leaderboard. Tatsumaki pads it with `null` rows.
    async fn leaderboard(&self, guild_id: u64) -> Result<Vec<Option<TatsuEntry>>, ImportError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Players who are no longer guild members.
    pub skipped: usize,
    /// Players whose level could not be set.
    pub failed: usize,
}

/// Guild being imported into. Non-members are skipped.
struct ImportTarget<'a> {
    guild_id: u64,
    members: &'a HashSet<u64>,
    channel_id: Option<u64>,
}

impl<S: LevelStore, G: SettingsStore> LevelingService<S, G> {
    async fn import_player(
        &self,
        target: &ImportTarget<'_>,
        user_id: u64,
        username: &str,
        level: i64,
        summary: &mut ImportSummary,
    ) {
        let guild_id = target.guild_id;
        if !target.members.contains(&user_id) {
            summary.skipped += 1;
            return;
        }
        match self
            .set_level(guild_id, user_id, username, level, target.channel_id)
            .await
        {
            Ok(_) => summary.imported += 1,
            Err(err) => {
                tracing::warn!(guild_id, user_id, level, error = %err, "Skipping imported player");
                summary.failed += 1;
            }
        }
    }

    /// Set the level of every Mee6 player who is still a member.
    pub async fn import_mee6_levels(
        &self,
        source: &dyn Mee6Source,
        guild_id: u64,
        pages: u32,
        members: &HashSet<u64>,
        channel_id: Option<u64>,
    ) -> Result<ImportSummary, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let target = ImportTarget {
            guild_id,
            members,
            channel_id,
        };
        let mut summary = ImportSummary::default();
        for page in 0..pages {
            let data = source.leaderboard_page(guild_id, page).await?;
            if data.players.is_empty() {
                break;
            }
            for player in data.players {
                self.import_player(
                    &target,
                    player.id,
                    &player.username,
                    i64::from(player.level),
                    &mut summary,
                )
                .await;
            }
        }

        tracing::info!(
            guild_id,
            imported = summary.imported,
            skipped = summary.skipped,
            failed = summary.failed,
            "Mee6 levels imported"
        );
        Ok(summary)
    }

    /// Set every member's level from their Tatsumaki score.
    pub async fn import_tatsu_levels(
        &self,
        source: &dyn TatsuSource,
        guild_id: u64,
        members: &HashSet<u64>,
        channel_id: Option<u64>,
    ) -> Result<ImportSummary, LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let rows = source.leaderboard(guild_id).await?;
        let target = ImportTarget {
            guild_id,
            members,
            channel_id,
        };
        let mut summary = ImportSummary::default();
        for entry in rows.into_iter().flatten() {
            let level = level_for_cumulative_experience(entry.score);
            self.import_player(&target, entry.user_id, "", i64::from(level), &mut summary)
                .await;
        }

        tracing::info!(
            guild_id,
            imported = summary.imported,
            skipped = summary.skipped,
            failed = summary.failed,
            "Tatsumaki levels imported"
        );
        Ok(summary)
    }

    /// Turn Mee6 role rewards into role links. Roles missing from the guild
    /// are returned by name and not linked.
    pub async fn import_mee6_roles(
        &self,
        source: &dyn Mee6Source,
        guild_id: u64,
        guild_roles: &HashSet<String>,
    ) -> Result<(Vec<RoleLink>, Vec<String>), LevelingError> {
        self.ensure_ready()?;
        self.enabled_settings(guild_id).await?;

        let data = source.leaderboard_page(guild_id, 0).await?;
        let mut linked = Vec::new();
        let mut missing = Vec::new();
        for reward in data.role_rewards {
            if !guild_roles.contains(&reward.role.name) {
                missing.push(reward.role.name);
                continue;
            }
            let link = RoleLink {
                guild_id,
                role_name: reward.role.name,
                level: reward.rank,
                remove_role: None,
            };
            self.store.save_role_link(&link).await?;
            linked.push(link);
        }
        Ok((linked, missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::leveling_math::cumulative_experience_for_level;
    use crate::core::leveling::leveling_service::test_support::harness;

    struct FixedSource {
        pages: Vec<Mee6Page>,
    }

    #[async_trait]
    impl Mee6Source for FixedSource {
        async fn leaderboard_page(&self, _: u64, page: u32) -> Result<Mee6Page, ImportError> {
            Ok(self.pages.get(page as usize).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn pages_decode_string_ids() {
        let page: Mee6Page = serde_json::from_str(
            r#"{
                "players": [{"id": "123456789012345678", "username": "a", "level": 12, "xp": 999}],
                "role_rewards": [{"rank": 5, "role": {"id": "1", "name": "Active"}}]
            }"#,
        )
        .unwrap();
        assert_eq!(page.players[0].id, 123_456_789_012_345_678);
        assert_eq!(page.role_rewards[0].role.name, "Active");
    }

    #[tokio::test]
    async fn levels_are_imported_for_members_only() {
        let h = harness();
        let source = FixedSource {
            pages: vec![Mee6Page {
                players: vec![
                    Mee6Player { id: 1, username: "one".into(), level: 4 },
                    Mee6Player { id: 2, username: "gone".into(), level: 9 },
                ],
                role_rewards: Vec::new(),
            }],
        };
        let members: HashSet<u64> = [1].into_iter().collect();

        let summary = h
            .service
            .import_mee6_levels(&source, 10, 3, &members, None)
            .await
            .unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, skipped: 1, failed: 0 });

        let record = h.store.get_user(1).await.unwrap().unwrap();
        assert_eq!(record.progress(10).level, 4);
        assert_eq!(record.total_exp, cumulative_experience_for_level(4));
        assert!(h.store.get_user(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_bad_player_does_not_stop_the_import() {
        let h = harness();
        let source = FixedSource {
            pages: vec![Mee6Page {
                players: vec![
                    Mee6Player { id: 1, username: "one".into(), level: 3 },
                    Mee6Player { id: 2, username: "legend".into(), level: 10_001 },
                    Mee6Player { id: 3, username: "three".into(), level: 6 },
                ],
                role_rewards: Vec::new(),
            }],
        };
        let members: HashSet<u64> = [1, 2, 3].into_iter().collect();

        let summary = h
            .service
            .import_mee6_levels(&source, 10, 1, &members, None)
            .await
            .unwrap();
        assert_eq!(summary, ImportSummary { imported: 2, skipped: 0, failed: 1 });
        assert_eq!(h.store.get_user(3).await.unwrap().unwrap().progress(10).level, 6);
        assert!(h.store.get_user(2).await.unwrap().is_none());
    }

    struct FixedTatsu(Vec<Option<TatsuEntry>>);

    #[async_trait]
    impl TatsuSource for FixedTatsu {
        async fn leaderboard(&self, _: u64) -> Result<Vec<Option<TatsuEntry>>, ImportError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn tatsu_rows_decode_with_nulls() {
        let rows: Vec<Option<TatsuEntry>> = serde_json::from_str(
            r#"[{"user_id": "123", "score": 700, "rank": 1}, null]"#,
        )
        .unwrap();
        assert_eq!(rows[0], Some(TatsuEntry { user_id: 123, score: 700 }));
        assert_eq!(rows[1], None);
    }

    #[tokio::test]
    async fn tatsu_scores_become_levels() {
        let h = harness();
        let source = FixedTatsu(vec![
            Some(TatsuEntry { user_id: 1, score: cumulative_experience_for_level(5) + 10 }),
            None,
            Some(TatsuEntry { user_id: 2, score: 999 }),
        ]);
        let members: HashSet<u64> = [1].into_iter().collect();

        let summary = h
            .service
            .import_tatsu_levels(&source, 10, &members, None)
            .await
            .unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, skipped: 1, failed: 0 });
        let record = h.store.get_user(1).await.unwrap().unwrap();
        assert_eq!(record.progress(10).level, 5);
        assert_eq!(record.total_exp, cumulative_experience_for_level(5));
    }

    #[tokio::test]
    async fn role_rewards_become_links() {
        let h = harness();
        let source = FixedSource {
            pages: vec![Mee6Page {
                players: Vec::new(),
                role_rewards: vec![
                    Mee6RoleReward { rank: 5, role: Mee6Role { name: "Active".into() } },
                    Mee6RoleReward { rank: 10, role: Mee6Role { name: "Ghost".into() } },
                ],
            }],
        };
        let roles: HashSet<String> = ["Active".to_string()].into_iter().collect();

        let (linked, missing) = h.service.import_mee6_roles(&source, 10, &roles).await.unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].remove_role, None);
        assert_eq!(missing, vec!["Ghost".to_string()]);
        assert_eq!(h.store.role_links(10).await.unwrap(), linked);
    }
}
