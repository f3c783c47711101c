//! Sync service - reconcile one connection against its provider
//!
//! A job runs in two phases. All provider calls happen first, outside any
//! database transaction. The fetched state is then applied in a single
//! unit of work that either commits entirely or leaves nothing behind.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountUpdate, CanonicalAccount, CanonicalTransaction, Connection, ReconciliationFailure,
    SyncReport, SyncType, Transaction, TransactionWindow,
};
use crate::ports::{BankDataProvider, CredentialCipher};
use crate::services::connection::open_credential;
use crate::services::{CategoryResolver, LogEvent, LoggingService, ProviderRegistry};

/// Cooperative cancellation flag shared between a job and whoever may stop it
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything fetched from the provider for one job
struct Fetched {
    accounts: Vec<CanonicalAccount>,
    transactions: Vec<(String, Vec<CanonicalTransaction>)>,
    failures: Vec<ReconciliationFailure>,
}

/// Sync service for account and transaction reconciliation
pub struct SyncService {
    repository: Arc<DuckDbRepository>,
    registry: Arc<ProviderRegistry>,
    cipher: Arc<dyn CredentialCipher>,
    logger: Option<Arc<LoggingService>>,
    incremental_count: usize,
}

impl SyncService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        registry: Arc<ProviderRegistry>,
        cipher: Arc<dyn CredentialCipher>,
        incremental_count: usize,
    ) -> Self {
        Self {
            repository,
            registry,
            cipher,
            logger: None,
            incremental_count,
        }
    }

    /// Also record sync events in the durable event log
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Run one sync job for a connection
    ///
    /// On a fatal error every write of the job is rolled back, the connection
    /// is marked `error` and the error is returned for the queue to judge.
    /// Per-account transaction failures do not fail the job; they are listed
    /// in the report.
    pub fn sync_connection(
        &self,
        connection_id: Uuid,
        sync_type: SyncType,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let connection = self
            .repository
            .get_connection(connection_id)?
            .ok_or_else(|| Error::not_found(format!("connection {}", connection_id)))?;

        tracing::info!(
            connection_id = %connection.id,
            provider = %connection.provider_name,
            sync_type = %sync_type,
            "sync started"
        );
        self.record(
            LogEvent::new("sync_started")
                .with_provider(&connection.provider_name)
                .with_connection(connection.id),
        );

        match self.run(&connection, sync_type, cancel) {
            Ok(report) => {
                tracing::info!(
                    connection_id = %connection.id,
                    provider = %connection.provider_name,
                    accounts_created = report.accounts_created,
                    accounts_updated = report.accounts_updated,
                    transactions_inserted = report.transactions_inserted,
                    transactions_skipped = report.transactions_skipped,
                    failures = report.failures.len(),
                    "sync completed"
                );
                let mut event = LogEvent::new("sync_completed")
                    .with_provider(&connection.provider_name)
                    .with_connection(connection.id);
                if report.is_partial() {
                    let details: Vec<String> = report
                        .failure_errors()
                        .iter()
                        .map(|e| e.to_string())
                        .collect();
                    event = event
                        .with_error("partial reconciliation")
                        .with_error_details(details.join("; "));
                }
                self.record(event);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    connection_id = %connection.id,
                    provider = %connection.provider_name,
                    error = %e,
                    "sync failed"
                );
                self.record(
                    LogEvent::new("sync_failed")
                        .with_provider(&connection.provider_name)
                        .with_connection(connection.id)
                        .with_error(e.to_string()),
                );
                if !matches!(e, Error::Cancelled) {
                    self.mark_failed(connection, &e);
                }
                Err(e)
            }
        }
    }

    /// Sync every connection of a user in turn
    ///
    /// One connection failing does not stop the others. Stops early only
    /// when cancelled.
    pub fn sync_user(
        &self,
        user_id: Uuid,
        sync_type: SyncType,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Uuid, Result<SyncReport>)>> {
        let mut results = Vec::new();
        for connection in self.repository.list_connections(user_id)? {
            cancel.check()?;
            let result = self.sync_connection(connection.id, sync_type, cancel);
            results.push((connection.id, result));
        }
        Ok(results)
    }

    fn run(
        &self,
        connection: &Connection,
        sync_type: SyncType,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let provider = self.registry.get(&connection.provider_name)?;
        let fetched = self.fetch(connection, provider.as_ref(), sync_type, cancel)?;
        cancel.check()?;
        self.apply(connection, sync_type, fetched, cancel)
    }

    /// Provider phase
    fn fetch(
        &self,
        connection: &Connection,
        provider: &dyn BankDataProvider,
        sync_type: SyncType,
        cancel: &CancellationToken,
    ) -> Result<Fetched> {
        let credential = open_credential(self.cipher.as_ref(), &connection.credential_enc)?;
        let window = match sync_type {
            SyncType::Full => TransactionWindow::Full,
            SyncType::Incremental => TransactionWindow::Recent(self.incremental_count),
        };

        cancel.check()?;
        let accounts = provider.get_accounts(&credential)?;

        // Transactions are reconciled for every live local account on the
        // connection, including ones this response no longer lists
        let mut keys: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        let local = self.repository.get_accounts_by_connection(connection.id)?;
        let reported = accounts.iter().map(|a| a.provider_account_id.clone());
        let remembered = local
            .into_iter()
            .filter(|a| a.deleted_at.is_none())
            .filter_map(|a| a.provider_account_id);
        for key in reported.chain(remembered) {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }

        let mut transactions = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();
        for key in keys {
            cancel.check()?;
            match provider.get_transactions(&credential, &key, window) {
                Ok(batch) => {
                    for rejected in &batch.rejected {
                        tracing::warn!(
                            connection_id = %connection.id,
                            provider = %connection.provider_name,
                            account_id = %key,
                            transaction_id = %rejected.provider_transaction_id,
                            reason = %rejected.reason,
                            "provider transaction rejected"
                        );
                        failures.push(ReconciliationFailure::new(
                            &connection.provider_name,
                            &key,
                            format!(
                                "transaction {} rejected: {}",
                                rejected.provider_transaction_id, rejected.reason
                            ),
                        ));
                    }
                    transactions.push((key, batch.transactions));
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        provider = %connection.provider_name,
                        account_id = %key,
                        error = %e,
                        "skipping account whose transactions could not be fetched"
                    );
                    failures.push(ReconciliationFailure::new(
                        &connection.provider_name,
                        &key,
                        e.to_string(),
                    ));
                }
            }
        }

        Ok(Fetched {
            accounts,
            transactions,
            failures,
        })
    }

    /// Database phase
    fn apply(
        &self,
        connection: &Connection,
        sync_type: SyncType,
        fetched: Fetched,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let now = Utc::now();
        let user_id = connection.user_id;
        let mut report = SyncReport::new(connection.id, &connection.provider_name, sync_type);
        report.failures = fetched.failures;

        let mut uow = self.repository.begin()?;

        // Account reconciliation
        let existing = uow.accounts_for_connection(connection.id)?;
        let mut index: HashMap<String, Account> = existing
            .into_iter()
            .filter_map(|a| a.provider_account_id.clone().map(|key| (key, a)))
            .collect();

        let mut creates = Vec::new();
        let mut updates = Vec::new();
        let mut handled = HashSet::new();
        for account in &fetched.accounts {
            if !handled.insert(account.provider_account_id.as_str()) {
                continue;
            }
            let local = index.get(&account.provider_account_id);
            if account.balance.is_none() {
                let message = match local {
                    Some(_) => "provider reported no balance; stored balance kept",
                    None => "provider reported no balance; account starts at zero",
                };
                tracing::warn!(
                    connection_id = %connection.id,
                    provider = %connection.provider_name,
                    account_id = %account.provider_account_id,
                    "{}", message
                );
                report.failures.push(ReconciliationFailure::new(
                    &connection.provider_name,
                    &account.provider_account_id,
                    message,
                ));
            }
            match local {
                Some(local) => updates.push(AccountUpdate::from_canonical(local.id, account)),
                None => creates.push(Account::from_canonical(
                    user_id,
                    connection.id,
                    &connection.provider_name,
                    account,
                    now,
                )),
            }
        }
        uow.insert_accounts(&creates)?;
        uow.update_accounts(&updates, now)?;
        report.accounts_created = creates.len();
        report.accounts_updated = updates.len();
        for account in creates {
            if let Some(key) = account.provider_account_id.clone() {
                index.insert(key, account);
            }
        }

        // Transaction reconciliation
        let mut categories = CategoryResolver::new(user_id, uow.categories(user_id)?);
        for (key, transactions) in fetched.transactions {
            let Some(account) = index.get(&key) else {
                continue;
            };
            if account.deleted_at.is_some() {
                continue;
            }

            let mut known = uow.provider_transaction_ids(account.id)?;
            let mut batch = Vec::new();
            for tx in &transactions {
                // Already stored, or repeated within this response
                if !known.insert(tx.provider_transaction_id.clone()) {
                    report.transactions_skipped += 1;
                    continue;
                }
                let category_id = match &tx.category {
                    Some(name) => categories.resolve(&mut uow, name)?,
                    None => None,
                };
                batch.push(Transaction::from_canonical(user_id, account.id, tx, category_id, now));
            }
            uow.insert_transactions(&batch)?;
            report.transactions_inserted += batch.len();
            tracing::debug!(
                connection_id = %connection.id,
                account_id = %key,
                inserted = batch.len(),
                "transactions reconciled"
            );
        }
        report.categories_created = categories.created();

        let mut synced = connection.clone();
        synced.mark_synced(now);
        uow.save_connection_status(&synced)?;

        cancel.check()?;
        uow.commit()?;
        Ok(report)
    }

    fn mark_failed(&self, mut connection: Connection, error: &Error) {
        connection.mark_failed(error.to_string(), Utc::now());
        if let Err(e) = self.repository.save_connection_status(&connection) {
            tracing::error!(connection_id = %connection.id, error = %e, "failed to record sync failure");
        }
    }

    fn record(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            if let Err(e) = logger.log(event) {
                tracing::warn!(error = %e, "failed to write event log");
            }
        }
    }
}
