// In-memory credit ledger for tests.

use crate::core::economy::{CreditError, CreditLedger, Transaction};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryCreditLedger {
    balances: DashMap<(u64, u64), i64>,
    history: DashMap<(u64, u64), Vec<Transaction>>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, user_id: u64, guild_id: u64, amount: i64, reason: &str) {
        self.history
            .entry((user_id, guild_id))
            .or_default()
            .push(Transaction::new(user_id, guild_id, amount, reason));
    }
}

fn to_amount(amount: u64) -> Result<i64, CreditError> {
    i64::try_from(amount).map_err(|_| CreditError::StoreError(format!("amount {amount} is too large")))
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn balance(&self, user_id: u64, guild_id: u64) -> Result<i64, CreditError> {
        Ok(self
            .balances
            .get(&(user_id, guild_id))
            .map(|balance| *balance)
            .unwrap_or(0))
    }

    async fn deposit(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        reason: &str,
    ) -> Result<i64, CreditError> {
        let amount = to_amount(amount)?;
        let new_balance = {
            let mut balance = self.balances.entry((user_id, guild_id)).or_insert(0);
            *balance = balance.saturating_add(amount);
            *balance
        };
        self.record(user_id, guild_id, amount, reason);
        Ok(new_balance)
    }

    async fn withdraw(
        &self,
        user_id: u64,
        guild_id: u64,
        amount: u64,
        reason: &str,
    ) -> Result<i64, CreditError> {
        let signed = to_amount(amount)?;
        let new_balance = {
            let mut balance = self.balances.entry((user_id, guild_id)).or_insert(0);
            if *balance < signed {
                return Err(CreditError::InsufficientFunds {
                    required: amount,
                    available: *balance,
                });
            }
            *balance -= signed;
            *balance
        };
        self.record(user_id, guild_id, -signed, reason);
        Ok(new_balance)
    }

    async fn transactions(
        &self,
        user_id: u64,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<Transaction>, CreditError> {
        Ok(self
            .history
            .get(&(user_id, guild_id))
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deposits_and_withdrawals_are_logged() {
        let ledger = InMemoryCreditLedger::new();
        assert_eq!(ledger.deposit(1, 2, 100, "chat credits").await.unwrap(), 100);
        assert_eq!(ledger.withdraw(1, 2, 30, "rep cooldown reset").await.unwrap(), 70);

        let history = ledger.transactions(1, 2, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, -30);
        assert_eq!(history[1].reason, "chat credits");
    }

    #[tokio::test]
    async fn overdraft_is_refused_without_changes() {
        let ledger = InMemoryCreditLedger::new();
        ledger.deposit(1, 2, 10, "chat credits").await.unwrap();
        let err = ledger.withdraw(1, 2, 11, "badge").await.unwrap_err();
        assert_eq!(
            err,
            CreditError::InsufficientFunds {
                required: 11,
                available: 10
            }
        );
        assert_eq!(ledger.balance(1, 2).await.unwrap(), 10);
        assert!(!ledger.can_spend(1, 2, 11).await.unwrap());
        assert!(ledger.can_spend(1, 2, 10).await.unwrap());
    }

    #[tokio::test]
    async fn wallets_are_per_guild() {
        let ledger = InMemoryCreditLedger::new();
        ledger.deposit(1, 2, 10, "chat credits").await.unwrap();
        assert_eq!(ledger.balance(1, 3).await.unwrap(), 0);
    }
}
