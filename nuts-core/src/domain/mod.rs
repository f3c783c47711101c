//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
pub mod balance;
pub mod canonical;
mod category;
mod connection;
pub mod result;
mod sync;
mod transaction;

pub use account::{Account, AccountUpdate};
pub use balance::{AccountWithTrend, BalancePoint, TrendWindow};
pub use canonical::{
    AccountType, CanonicalAccount, CanonicalTransaction, Institution, RejectedTransaction,
    TransactionBatch, TransactionDirection, TransactionWindow,
};
pub use category::Category;
pub use connection::{Connection, ConnectionStatus};
pub use sync::{ReconciliationFailure, SyncJob, SyncReport, SyncType};
pub use transaction::{Transaction, TransactionType};
