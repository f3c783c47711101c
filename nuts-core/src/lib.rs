//! Nuts Core - bank sync and balance reconstruction
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Connection, Account, Transaction, etc.)
//! - **ports**: Trait definitions for external dependencies (BankDataProvider, SyncQueue)
//! - **services**: Business logic orchestration (sync, trends, connections)
//! - **adapters**: Concrete implementations (DuckDB, Teller, Mono, SimpleFIN, etc.)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use adapters::cipher::ChaChaCredentialCipher;
use adapters::duckdb::DuckDbRepository;
use config::Config;
use ports::{CredentialCipher, SyncQueue};
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{
    Account, AccountWithTrend, BalancePoint, Connection, ConnectionStatus, SyncReport, SyncType,
    Transaction,
};

/// Main context for Nuts operations
///
/// Holds configuration, the database, the provider registry and the
/// services that need no credential key. Services that touch credentials
/// are built on demand, since only they require `NUTS_ENCRYPTION_KEY`.
pub struct NutsContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub registry: Arc<ProviderRegistry>,
    pub logger: Arc<LoggingService>,
    pub balance_service: BalanceService,
    nuts_dir: PathBuf,
}

impl NutsContext {
    /// Open the data directory, creating it and its databases if needed
    pub fn new(nuts_dir: &Path, entry_point: EntryPoint, app_version: &str) -> Result<Self> {
        std::fs::create_dir_all(nuts_dir)?;
        let config = Config::load(nuts_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&nuts_dir.join("nuts.duckdb"))?);
        repository.ensure_schema()?;

        let registry = Arc::new(ProviderRegistry::from_config(&config.providers)?);
        let logger = Arc::new(LoggingService::new(nuts_dir, entry_point, app_version)?);
        let balance_service = BalanceService::new(Arc::clone(&repository));

        Ok(Self {
            config,
            repository,
            registry,
            logger,
            balance_service,
            nuts_dir: nuts_dir.to_path_buf(),
        })
    }

    pub fn nuts_dir(&self) -> &Path {
        &self.nuts_dir
    }

    pub fn user_id(&self) -> uuid::Uuid {
        self.config.user_id
    }

    /// Credential cipher keyed from `NUTS_ENCRYPTION_KEY`
    pub fn cipher(&self) -> std::result::Result<Arc<dyn CredentialCipher>, Error> {
        let passphrase = self.config.encryption_key.as_deref().ok_or_else(|| {
            Error::config("NUTS_ENCRYPTION_KEY must be set to link or sync connections")
        })?;
        Ok(Arc::new(ChaChaCredentialCipher::open(&self.nuts_dir, passphrase)?))
    }

    pub fn sync_service(&self) -> std::result::Result<Arc<SyncService>, Error> {
        let service = SyncService::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.registry),
            self.cipher()?,
            self.config.sync.incremental_count,
        )
        .with_logger(Arc::clone(&self.logger));
        Ok(Arc::new(service))
    }

    /// Start a worker pool for sync jobs; must be called inside a tokio runtime
    pub fn start_queue(&self) -> std::result::Result<Arc<LocalSyncQueue>, Error> {
        Ok(Arc::new(LocalSyncQueue::start(self.sync_service()?, &self.config.sync)))
    }

    pub fn connection_service(
        &self,
        queue: Arc<dyn SyncQueue>,
    ) -> std::result::Result<ConnectionService, Error> {
        let service = ConnectionService::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.registry),
            self.cipher()?,
            queue,
        )
        .with_logger(Arc::clone(&self.logger));
        Ok(service)
    }
}
