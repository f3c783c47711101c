//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod cipher;
mod data_provider;
mod job_queue;
mod repository;

pub use cipher::CredentialCipher;
pub use data_provider::{BankDataProvider, Credential};
pub use job_queue::SyncQueue;
pub use repository::CategoryStore;
