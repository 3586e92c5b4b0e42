// SQLite implementation of LevelStore.
//
// Each user is one JSON document in `users.document`. The columns next to it
// (username, total_exp, rep) are copies kept for sorting and filtering, so
// leaderboards never have to decode every document. Guild membership and
// badge ownership filters go through SQLite's json_each.

use crate::core::leveling::leveling_store::SortKey;
use crate::core::leveling::{
    migrate_user_document, BadgeLink, GuildBadge, LevelStore, RoleLink, StoreError, UserQuery,
    UserRecord,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

fn db(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub struct SqliteLevelStore {
    pool: SqlitePool,
    migrated: AtomicBool,
}

impl SqliteLevelStore {
    /// Build the store without touching the database. The first successful
    /// `ping` creates the tables, so the bot can start while the file is
    /// unavailable and pick it up later.
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            let path = Path::new(database_url);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            format!("sqlite://{}", database_url)
        };

        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(db)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            migrated: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    fn in_memory() -> Self {
        // One connection that never idles out, otherwise the database vanishes.
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(options);
        Self {
            pool,
            migrated: AtomicBool::new(false),
        }
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                total_exp INTEGER NOT NULL DEFAULT 0,
                rep INTEGER NOT NULL DEFAULT 0,
                document TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_total_exp ON users(total_exp DESC)")
            .execute(&self.pool)
            .await
            .map_err(db)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_rep ON users(rep DESC)")
            .execute(&self.pool)
            .await
            .map_err(db)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS role_links (
                guild_id INTEGER NOT NULL,
                role_name TEXT NOT NULL,
                level INTEGER NOT NULL,
                remove_role TEXT,
                PRIMARY KEY (guild_id, role_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS badge_links (
                guild_id INTEGER NOT NULL,
                badge_name TEXT NOT NULL,
                level INTEGER NOT NULL,
                PRIMARY KEY (guild_id, badge_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_badges (
                guild_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                bg_img TEXT NOT NULL DEFAULT '',
                border_color TEXT NOT NULL DEFAULT '',
                price INTEGER NOT NULL DEFAULT -1,
                PRIMARY KEY (guild_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db)?;

        Ok(())
    }

    async fn ensure_migrated(&self) -> Result<(), StoreError> {
        if self.migrated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.migrate().await?;
        self.migrated.store(true, Ordering::Release);
        tracing::info!("Leveling database schema ready");
        Ok(())
    }

    fn decode_user(row: &SqliteRow) -> Result<UserRecord, StoreError> {
        let document: String = row.try_get("document").map_err(db)?;
        let value: serde_json::Value = serde_json::from_str(&document)?;
        Ok(migrate_user_document(value)?)
    }
}

#[async_trait]
impl LevelStore for SqliteLevelStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db)?;
        self.ensure_migrated().await
    }

    async fn get_user(&self, user_id: u64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT document FROM users WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

        row.as_ref().map(Self::decode_user).transpose()
    }

    async fn upsert_user(&self, record: &UserRecord) -> Result<(), StoreError> {
        let document = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO users (user_id, username, total_exp, rep, document)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                total_exp = excluded.total_exp,
                rep = excluded.rep,
                document = excluded.document
            "#,
        )
        .bind(record.user_id as i64)
        .bind(&record.username)
        .bind(to_i64(record.total_exp))
        .bind(i64::from(record.rep))
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn query_users(&self, query: &UserQuery) -> Result<Vec<UserRecord>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT document FROM users WHERE 1 = 1");

        if let Some(guild_id) = query.guild_id {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(users.document, '$.servers') WHERE json_each.key = ")
                .push_bind(guild_id.to_string())
                .push(")");
        }
        if let Some(min) = query.min_total_exp {
            builder.push(" AND total_exp >= ").push_bind(to_i64(min));
        }
        if let Some(min) = query.min_rep {
            builder.push(" AND rep >= ").push_bind(i64::from(min));
        }
        if let Some(key) = &query.badge_key {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(users.document, '$.badges') WHERE json_each.key = ")
                .push_bind(key.clone())
                .push(")");
        }

        builder.push(match query.sort {
            Some(SortKey::TotalExp) => " ORDER BY total_exp DESC, user_id ASC",
            Some(SortKey::Rep) => " ORDER BY rep DESC, user_id ASC",
            None => " ORDER BY user_id ASC",
        });
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(to_i64(limit as u64));
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(Self::decode_user).collect()
    }

    async fn role_links(&self, guild_id: u64) -> Result<Vec<RoleLink>, StoreError> {
        let rows = sqlx::query(
            "SELECT role_name, level, remove_role FROM role_links WHERE guild_id = ? ORDER BY level, role_name",
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|row| {
                Ok(RoleLink {
                    guild_id,
                    role_name: row.try_get("role_name").map_err(db)?,
                    level: row.try_get::<i64, _>("level").map_err(db)? as u32,
                    remove_role: row.try_get("remove_role").map_err(db)?,
                })
            })
            .collect()
    }

    async fn save_role_link(&self, link: &RoleLink) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO role_links (guild_id, role_name, level, remove_role)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id, role_name) DO UPDATE SET
                level = excluded.level,
                remove_role = excluded.remove_role
            "#,
        )
        .bind(link.guild_id as i64)
        .bind(&link.role_name)
        .bind(i64::from(link.level))
        .bind(&link.remove_role)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn delete_role_link(&self, guild_id: u64, role_name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM role_links WHERE guild_id = ? AND role_name = ?")
            .bind(guild_id as i64)
            .bind(role_name)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() > 0)
    }

    async fn badge_links(&self, guild_id: u64) -> Result<Vec<BadgeLink>, StoreError> {
        let rows = sqlx::query(
            "SELECT badge_name, level FROM badge_links WHERE guild_id = ? ORDER BY level, badge_name",
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|row| {
                Ok(BadgeLink {
                    guild_id,
                    badge_name: row.try_get("badge_name").map_err(db)?,
                    level: row.try_get::<i64, _>("level").map_err(db)? as u32,
                })
            })
            .collect()
    }

    async fn save_badge_link(&self, link: &BadgeLink) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO badge_links (guild_id, badge_name, level)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id, badge_name) DO UPDATE SET level = excluded.level
            "#,
        )
        .bind(link.guild_id as i64)
        .bind(&link.badge_name)
        .bind(i64::from(link.level))
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn delete_badge_link(
        &self,
        guild_id: u64,
        badge_name: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM badge_links WHERE guild_id = ? AND badge_name = ?")
            .bind(guild_id as i64)
            .bind(badge_name)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() > 0)
    }

    async fn guild_badges(&self, guild_id: u64) -> Result<Vec<GuildBadge>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, description, bg_img, border_color, price
            FROM guild_badges WHERE guild_id = ? ORDER BY name
            "#,
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        rows.iter()
            .map(|row| {
                Ok(GuildBadge {
                    guild_id,
                    name: row.try_get("name").map_err(db)?,
                    description: row.try_get("description").map_err(db)?,
                    bg_img: row.try_get("bg_img").map_err(db)?,
                    border_color: row.try_get("border_color").map_err(db)?,
                    price: row.try_get("price").map_err(db)?,
                })
            })
            .collect()
    }

    async fn save_guild_badge(&self, badge: &GuildBadge) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO guild_badges (guild_id, name, description, bg_img, border_color, price)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id, name) DO UPDATE SET
                description = excluded.description,
                bg_img = excluded.bg_img,
                border_color = excluded.border_color,
                price = excluded.price
            "#,
        )
        .bind(badge.guild_id as i64)
        .bind(&badge.name)
        .bind(&badge.description)
        .bind(&badge.bg_img)
        .bind(&badge.border_color)
        .bind(badge.price)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn delete_guild_badge(&self, guild_id: u64, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM guild_badges WHERE guild_id = ? AND name = ?")
            .bind(guild_id as i64)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::leveling::BadgeRecord;

    async fn store() -> SqliteLevelStore {
        let store = SqliteLevelStore::in_memory();
        store.ping().await.unwrap();
        store
    }

    fn user(user_id: u64, total_exp: u64, rep: u32, guilds: &[u64]) -> UserRecord {
        let mut record = UserRecord::new(user_id, format!("user{user_id}"));
        record.total_exp = total_exp;
        record.rep = rep;
        for guild in guilds {
            record.progress_mut(*guild).current_exp = total_exp;
        }
        record
    }

    #[tokio::test]
    async fn users_round_trip_through_documents() {
        let store = store().await;
        let mut record = user(1, 120, 3, &[10, 20]);
        record.title = "Chatterbox".into();
        store.upsert_user(&record).await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap(), Some(record));
        assert_eq!(store.get_user(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn legacy_documents_are_migrated_on_read() {
        let store = store().await;
        sqlx::query("INSERT INTO users (user_id, username, total_exp, rep, document) VALUES (?, ?, ?, ?, ?)")
            .bind(7_i64)
            .bind("old")
            .bind(50_i64)
            .bind(0_i64)
            .bind(r#"{"user_id": "7", "username": "old", "total_exp": 50, "servers": {"10": {"level": 1, "current_exp": 10}}}"#)
            .execute(&store.pool)
            .await
            .unwrap();

        let record = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(record.user_id, 7);
        assert_eq!(record.progress(10).level, 1);
    }

    #[tokio::test]
    async fn queries_filter_on_guild_and_floors() {
        let store = store().await;
        store.upsert_user(&user(1, 500, 0, &[10])).await.unwrap();
        store.upsert_user(&user(2, 5, 4, &[10, 20])).await.unwrap();
        store.upsert_user(&user(3, 900, 1, &[20])).await.unwrap();

        let in_guild: Vec<u64> = store
            .query_users(&UserQuery {
                guild_id: Some(10),
                sort: Some(SortKey::TotalExp),
                ..UserQuery::default()
            })
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(in_guild, vec![1, 2]);

        let global: Vec<u64> = store
            .query_users(&UserQuery {
                min_total_exp: Some(10),
                sort: Some(SortKey::TotalExp),
                limit: Some(1),
                ..UserQuery::default()
            })
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(global, vec![3]);

        let rep: Vec<u64> = store
            .query_users(&UserQuery {
                min_rep: Some(1),
                sort: Some(SortKey::Rep),
                ..UserQuery::default()
            })
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(rep, vec![2, 3]);
    }

    #[tokio::test]
    async fn badge_holders_are_found_by_key() {
        let store = store().await;
        let badge = GuildBadge {
            guild_id: 10,
            name: "Veteran".into(),
            description: "Here since day one".into(),
            bg_img: String::new(),
            border_color: "#ffffff".into(),
            price: -1,
        };
        let mut holder = user(1, 0, 0, &[10]);
        holder.badges.insert(
            badge.user_key(),
            BadgeRecord {
                badge: badge.clone(),
                priority_num: 0,
            },
        );
        store.upsert_user(&holder).await.unwrap();
        store.upsert_user(&user(2, 0, 0, &[10])).await.unwrap();

        let found = store
            .query_users(&UserQuery::holding_badge(badge.user_key()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, 1);
    }

    #[tokio::test]
    async fn guild_tables_upsert_and_delete() {
        let store = store().await;
        let mut link = RoleLink {
            guild_id: 10,
            role_name: "Regular".into(),
            level: 5,
            remove_role: Some("Newcomer".into()),
        };
        store.save_role_link(&link).await.unwrap();
        link.level = 6;
        store.save_role_link(&link).await.unwrap();
        assert_eq!(store.role_links(10).await.unwrap(), vec![link]);
        assert!(store.delete_role_link(10, "Regular").await.unwrap());
        assert!(!store.delete_role_link(10, "Regular").await.unwrap());

        let badge_link = BadgeLink {
            guild_id: 10,
            badge_name: "Veteran".into(),
            level: 20,
        };
        store.save_badge_link(&badge_link).await.unwrap();
        assert_eq!(store.badge_links(10).await.unwrap(), vec![badge_link]);
        assert!(store.delete_badge_link(10, "Veteran").await.unwrap());

        let badge = GuildBadge {
            guild_id: 10,
            name: "Veteran".into(),
            description: String::new(),
            bg_img: String::new(),
            border_color: String::new(),
            price: 250,
        };
        store.save_guild_badge(&badge).await.unwrap();
        assert_eq!(store.guild_badges(10).await.unwrap(), vec![badge]);
        assert!(store.delete_guild_badge(10, "Veteran").await.unwrap());
        assert!(store.guild_badges(10).await.unwrap().is_empty());
    }
}
