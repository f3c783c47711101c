//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for persistence
//! - Teller, Mono and SimpleFIN HTTP clients for BankDataProvider
//! - Demo data provider for offline use and tests
//! - XChaCha20-Poly1305 for CredentialCipher

pub mod cipher;
pub mod demo;
pub mod duckdb;
mod http;
pub mod mono;
pub mod simplefin;
pub mod teller;
