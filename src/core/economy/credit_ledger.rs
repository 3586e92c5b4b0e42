// Credit ledger - the bank the leveler pays chat credits into and charges
// rep resets against.
//
// Wallets are per user per guild. Every balance change is logged as a
// transaction so admins can audit where credits came from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub user_id: u64,
    pub guild_id: u64,
    /// Positive for deposits, negative for withdrawals.
    pub amount: i64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(user_id: u64, guild_id: u64, amount: i64, reason: impl Into<String>) -> Self {
        Self {
            user_id,
            guild_id,
            amount,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    InsufficientFunds { required: u64, available: i64 },
    StoreError(String),
}

impl fmt::Display for CreditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditError::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "Insufficient funds: need {} credits, but only have {}",
                required, available
            ),
            CreditError::StoreError(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl std::error::Error for CreditError {}

// ============================================================================
// LEDGER TRAIT
// ============================================================================

/// Bank operations the leveler relies on.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance; zero for users without a wallet.
    async fn balance(&self, user_id: u64, guild_id: u64) -> Result<i64, CreditError>;

    /// Add credits and return the new balance.
    async fn deposit(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        reason: &str,
    ) -> Result<i64, CreditError>;

    /// Take credits and return the new balance.
    /// Fails with `InsufficientFunds` without touching the wallet.
    async fn withdraw(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        reason: &str,
    ) -> Result<i64, CreditError>;

    async fn can_spend(&self, user_id: u64, guild_id: u64, amount: u64) -> Result<bool, CreditError> {
        let balance = self.balance(user_id, guild_id).await?;
        Ok(i64::try_from(amount).map_or(false, |amount| balance >= amount))
    }

    /// Most recent transactions first.
    async fn transactions(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, CreditError>;
}
