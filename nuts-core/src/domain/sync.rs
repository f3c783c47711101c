//! Sync job and report types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::Error;

/// How much history a sync job asks providers for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncType::Full),
            "incremental" => Ok(SyncType::Incremental),
            other => Err(Error::validation(format!("unknown sync type: {}", other))),
        }
    }
}

/// A unit of work for the sync queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub sync_type: SyncType,
}

/// One account whose transactions could not be reconciled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationFailure {
    pub provider: String,
    pub account_id: String,
    pub message: String,
}

impl ReconciliationFailure {
    pub fn new(provider: &str, account_id: &str, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            account_id: account_id.to_string(),
            message: message.into(),
        }
    }
}

impl From<ReconciliationFailure> for Error {
    fn from(failure: ReconciliationFailure) -> Self {
        Error::PartialReconciliation {
            provider: failure.provider,
            account_id: failure.account_id,
            message: failure.message,
        }
    }
}

/// Outcome of one completed sync job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub connection_id: Uuid,
    pub provider: String,
    pub sync_type: SyncType,
    pub accounts_created: usize,
    pub accounts_updated: usize,
    pub transactions_inserted: usize,
    /// Fetched transactions whose idempotency key was already stored
    pub transactions_skipped: usize,
    pub categories_created: usize,
    pub failures: Vec<ReconciliationFailure>,
}

impl SyncReport {
    pub fn new(connection_id: Uuid, provider: &str, sync_type: SyncType) -> Self {
        Self {
            connection_id,
            provider: provider.to_string(),
            sync_type,
            accounts_created: 0,
            accounts_updated: 0,
            transactions_inserted: 0,
            transactions_skipped: 0,
            categories_created: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Failures as errors, each naming its provider and account
    pub fn failure_errors(&self) -> Vec<Error> {
        self.failures.iter().cloned().map(Error::from).collect()
    }
}
