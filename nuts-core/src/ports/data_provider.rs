//! Bank data provider port
//!
//! Defines the interface for fetching account and transaction data from
//! bank aggregators (Teller, Mono, SimpleFIN, demo data). Implementations
//! map provider responses into the canonical model before returning, so the
//! sync service never sees provider-specific shapes.

use std::fmt;

use crate::domain::result::Result;
use crate::domain::{CanonicalAccount, TransactionBatch, TransactionWindow};

/// Plaintext provider credential (access token, account id, access URL)
///
/// Only lives in memory for the duration of a provider call. `Debug` never
/// prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> std::result::Result<Self, std::string::FromUtf8Error> {
        String::from_utf8(bytes).map(Self)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Bank data provider trait
///
/// Calls are blocking and may take seconds; the sync queue runs them on
/// blocking worker threads. Errors use the provider variants of
/// [`crate::Error`] so the queue can tell auth failures from retryable ones.
pub trait BankDataProvider: Send + Sync {
    /// Provider name (e.g., "teller", "mono")
    fn name(&self) -> &str;

    /// Fetch every account visible to the credential
    fn get_accounts(&self, credential: &Credential) -> Result<Vec<CanonicalAccount>>;

    /// Fetch transactions for one provider account
    ///
    /// Rows that cannot be mapped are returned in the batch's `rejected`
    /// list rather than dropped.
    fn get_transactions(
        &self,
        credential: &Credential,
        provider_account_id: &str,
        window: TransactionWindow,
    ) -> Result<TransactionBatch>;

    /// Whether linking starts from a short-lived code that must be exchanged
    fn uses_token_exchange(&self) -> bool {
        false
    }

    /// Exchange a link code for a long-lived credential
    ///
    /// Only exchange-based providers implement this; the default rejects it.
    fn exchange_token(&self, _code: &str) -> Result<Credential> {
        Err(crate::Error::validation(format!(
            "{} does not support token exchange",
            self.name()
        )))
    }
}
