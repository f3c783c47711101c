//! Connection domain model
//!
//! A connection is one linked credential at one provider. It owns no data:
//! accounts point back at it, and removing it leaves them in place.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::canonical::Institution;
use super::result::Error;

/// Sync status of a connection
///
/// `pending` until the first successful sync, then `active` or `error`
/// depending on the most recent sync. Nothing moves back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConnectionStatus::Pending),
            "active" => Ok(ConnectionStatus::Active),
            "error" => Ok(ConnectionStatus::Error),
            other => Err(Error::validation(format!("unknown connection status: {}", other))),
        }
    }
}

/// A linked provider credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_name: String,
    /// Base64 of the cipher output; never the plaintext credential
    #[serde(skip_serializing)]
    pub credential_enc: String,
    pub item_id: Option<String>,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub status: ConnectionStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Create a new connection in the `pending` state
    pub fn new(
        user_id: Uuid,
        provider_name: impl Into<String>,
        credential_enc: impl Into<String>,
        institution: &Institution,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider_name: provider_name.into(),
            credential_enc: credential_enc.into(),
            item_id: None,
            institution_id: institution.id.clone(),
            institution_name: institution.name.clone(),
            status: ConnectionStatus::Pending,
            last_sync_at: None,
            last_error: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a successful sync
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.status = ConnectionStatus::Active;
        self.last_sync_at = Some(at);
        self.last_error = None;
        self.updated_at = at;
    }

    /// Record a failed sync. `last_sync_at` keeps pointing at the last success.
    pub fn mark_failed(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.status = ConnectionStatus::Error;
        self.last_error = Some(message.into());
        self.updated_at = at;
    }
}
