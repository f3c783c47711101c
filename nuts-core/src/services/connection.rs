//! Connection service - link, list and delete provider connections

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::{Error, Result};
use crate::domain::{Connection, Institution, SyncType};
use crate::ports::{BankDataProvider, Credential, CredentialCipher, SyncQueue};
use crate::services::{LogEvent, LoggingService, ProviderRegistry};

/// What the user brought to link a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    /// A long-lived credential used as is (access token, account key, access URL)
    Token(String),
    /// A short-lived code the provider exchanges for a credential
    Code(String),
}

/// Encrypt a credential for the `credential_enc` column
pub fn seal_credential(cipher: &dyn CredentialCipher, credential: Credential) -> Result<String> {
    let sealed = cipher.encrypt(&credential.into_bytes())?;
    Ok(BASE64.encode(sealed))
}

/// Decrypt a stored `credential_enc` value
pub fn open_credential(cipher: &dyn CredentialCipher, stored: &str) -> Result<Credential> {
    let sealed = BASE64
        .decode(stored)
        .map_err(|e| Error::Encryption(format!("stored credential is not base64: {}", e)))?;
    let plain = cipher.decrypt(&sealed)?;
    Credential::from_bytes(plain)
        .map_err(|_| Error::Encryption("stored credential is not UTF-8".to_string()))
}

pub struct ConnectionService {
    repository: Arc<DuckDbRepository>,
    registry: Arc<ProviderRegistry>,
    cipher: Arc<dyn CredentialCipher>,
    queue: Arc<dyn SyncQueue>,
    logger: Option<Arc<LoggingService>>,
}

impl ConnectionService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        registry: Arc<ProviderRegistry>,
        cipher: Arc<dyn CredentialCipher>,
        queue: Arc<dyn SyncQueue>,
    ) -> Self {
        Self {
            repository,
            registry,
            cipher,
            queue,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Link a provider credential and schedule its first full sync
    ///
    /// The connection is stored `pending`; the returned value reflects that.
    /// Provider calls run on a blocking thread.
    pub async fn link(&self, user_id: Uuid, provider: &str, request: LinkRequest) -> Result<Connection> {
        let adapter = self.registry.get(provider)?;
        let name = adapter.name().to_string();

        let (credential, institution) = tokio::task::spawn_blocking(move || {
            resolve_credential(adapter.as_ref(), request)
        })
        .await
        .map_err(|e| Error::transient(&name, format!("link task failed: {}", e)))??;

        let credential_enc = seal_credential(self.cipher.as_ref(), credential)?;
        let connection = Connection::new(user_id, &name, credential_enc, &institution);
        self.repository.insert_connection(&connection)?;

        tracing::info!(
            connection_id = %connection.id,
            provider = %name,
            "connection linked"
        );
        if let Some(logger) = &self.logger {
            let event = LogEvent::new("connection_linked")
                .with_provider(&name)
                .with_connection(connection.id);
            if let Err(e) = logger.log(event) {
                tracing::warn!(error = %e, "failed to write event log");
            }
        }

        self.queue
            .enqueue_bank_sync(user_id, connection.id, SyncType::Full)
            .await?;
        Ok(connection)
    }

    pub fn list(&self, user_id: Uuid) -> Result<Vec<Connection>> {
        self.repository.list_connections(user_id)
    }

    pub fn get(&self, connection_id: Uuid) -> Result<Connection> {
        self.repository
            .get_connection(connection_id)?
            .ok_or_else(|| Error::not_found(format!("connection {}", connection_id)))
    }

    /// Remove a connection; its accounts and transactions stay as history
    pub fn delete(&self, connection_id: Uuid) -> Result<()> {
        if !self.repository.delete_connection(connection_id)? {
            return Err(Error::not_found(format!("connection {}", connection_id)));
        }
        tracing::info!(connection_id = %connection_id, "connection deleted");
        Ok(())
    }
}

/// Turn a link request into a credential and the institution behind it
fn resolve_credential(
    provider: &dyn BankDataProvider,
    request: LinkRequest,
) -> Result<(Credential, Institution)> {
    let credential = match request {
        LinkRequest::Code(code) => {
            if !provider.uses_token_exchange() {
                return Err(Error::validation(format!(
                    "{} links with a token, not a code",
                    provider.name()
                )));
            }
            provider.exchange_token(code.trim())?
        }
        LinkRequest::Token(token) => {
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::validation("credential must not be empty"));
            }
            Credential::new(token)
        }
    };

    // Institution details only come with accounts. Data that is still being
    // prepared is left to the first sync.
    let institution = match provider.get_accounts(&credential) {
        Ok(accounts) => accounts
            .into_iter()
            .map(|a| a.institution)
            .find(|i| i.id.is_some() || i.name.is_some())
            .unwrap_or_default(),
        Err(e) if e.is_retryable() => {
            tracing::warn!(provider = %provider.name(), error = %e, "institution lookup deferred");
            Institution::default()
        }
        Err(e) => return Err(e),
    };

    Ok((credential, institution))
}
