// Economy module - the credit ledger the leveler deposits into and charges.

mod credit_ledger;

pub use credit_ledger::{CreditError, CreditLedger, Transaction};
