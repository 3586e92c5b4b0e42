// Economy infrastructure - credit ledger implementations

#[cfg(test)]
mod in_memory;
mod sqlite_credit_store;

#[cfg(test)]
pub use in_memory::InMemoryCreditLedger;
pub use sqlite_credit_store::SqliteCreditStore;
