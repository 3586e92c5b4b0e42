// SQLite implementation of the CreditLedger trait

use crate::core::economy::{CreditError, CreditLedger, Transaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite};
use std::str::FromStr;

fn store_err(err: sqlx::Error) -> CreditError {
    CreditError::StoreError(err.to_string())
}

fn to_amount(amount: u64) -> Result<i64, CreditError> {
    i64::try_from(amount).map_err(|_| CreditError::StoreError(format!("amount {amount} is too large")))
}

pub struct SqliteCreditStore {
    pool: SqlitePool,
}

impl SqliteCreditStore {
    /// Open (or create) the credit database and its tables.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let connection_string = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };
        let options = SqliteConnectOptions::from_str(&connection_string)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    #[cfg(test)]
    async fn in_memory() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        let ledger = Self { pool };
        ledger.migrate().await.unwrap();
        ledger
    }

    /// Create the account and log tables if they are missing.
    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_accounts (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
                lifetime_credits INTEGER NOT NULL DEFAULT 0,
                touched_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (guild_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                note TEXT NOT NULL,
                logged_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS credit_log_by_member
            ON credit_log(guild_id, user_id, seq DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_log(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        entry: &Transaction,
    ) -> Result<(), CreditError> {
        sqlx::query(
            r#"
            INSERT INTO credit_log (guild_id, user_id, delta, note, logged_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.guild_id as i64)
        .bind(entry.user_id as i64)
        .bind(entry.amount)
        .bind(&entry.reason)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn credits_in(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        user_id: u64,
        guild_id: u64,
    ) -> Result<i64, CreditError> {
        let row = sqlx::query("SELECT credits FROM credit_accounts WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .fetch_optional(&mut **tx)
            .await
            .map_err(store_err)?;
        Ok(row.map(|row| row.get::<i64, _>("credits")).unwrap_or(0))
    }
}

#[async_trait]
impl CreditLedger for SqliteCreditStore {
    async fn balance(&self, user_id: u64, guild_id: u64) -> Result<i64, CreditError> {
        let row = sqlx::query("SELECT credits FROM credit_accounts WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|row| row.get::<i64, _>("credits")).unwrap_or(0))
    }

    async fn deposit(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        reason: &str,
    ) -> Result<i64, CreditError> {
        let amount = to_amount(amount)?;
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            r#"
            INSERT INTO credit_accounts (guild_id, user_id, credits, lifetime_credits)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                credits = credits + excluded.credits,
                lifetime_credits = lifetime_credits + excluded.lifetime_credits,
                touched_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(amount)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        Self::append_log(&mut tx, &Transaction::new(user_id, guild_id, amount, reason)).await?;
        let credits = Self::credits_in(&mut tx, user_id, guild_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(credits)
    }

    async fn withdraw(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        reason: &str,
    ) -> Result<i64, CreditError> {
        let signed = to_amount(amount)?;
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let result = sqlx::query(
            r#"
            UPDATE credit_accounts
            SET credits = credits - ?1, touched_at = CURRENT_TIMESTAMP
            WHERE guild_id = ?2 AND user_id = ?3 AND credits >= ?1
            "#,
        )
        .bind(signed)
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            let available = Self::credits_in(&mut tx, user_id, guild_id).await?;
            tx.rollback().await.map_err(store_err)?;
            return Err(CreditError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        Self::append_log(&mut tx, &Transaction::new(user_id, guild_id, -signed, reason)).await?;
        let credits = Self::credits_in(&mut tx, user_id, guild_id).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(credits)
    }

    async fn transactions(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, CreditError> {
        let rows = sqlx::query(
            r#"
            SELECT delta, note, logged_at
            FROM credit_log
            WHERE guild_id = ? AND user_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let logged_at: String = row.get("logged_at");
            let Ok(timestamp) = DateTime::parse_from_rfc3339(&logged_at) else {
                tracing::warn!(user_id, guild_id, %logged_at, "Skipping credit log row with a bad timestamp");
                continue;
            };
            entries.push(Transaction {
                user_id,
                guild_id,
                amount: row.get("delta"),
                reason: row.get("note"),
                timestamp: timestamp.with_timezone(&Utc),
            });
        }
        Ok(entries)
    }
}
