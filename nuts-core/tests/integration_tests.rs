//! Integration tests for nuts-core services
//!
//! These tests verify sync and balance scenarios using real DuckDB.
//! Provider IO is scripted at the trait level, but all database operations are real.
//!
//! Run with: cargo test --test integration_tests -- --nocapture

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use nuts_core::adapters::cipher::ChaChaCredentialCipher;
use nuts_core::adapters::duckdb::DuckDbRepository;
use nuts_core::config::SyncConfig;
use nuts_core::domain::{
    AccountType, CanonicalAccount, CanonicalTransaction, Connection, ConnectionStatus, Institution,
    RejectedTransaction, SyncType, TransactionBatch, TransactionDirection, TransactionWindow,
};
use nuts_core::ports::{BankDataProvider, Credential, CredentialCipher, SyncQueue};
use nuts_core::services::connection::seal_credential;
use nuts_core::services::{
    BalanceService, CancellationToken, ConnectionService, LinkRequest, LocalSyncQueue,
    ProviderRegistry, SyncService,
};
use nuts_core::Error;

// ============================================================================
// Test Helpers
// ============================================================================

const PROVIDER: &str = "scripted";

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// What the scripted provider currently reports
#[derive(Default)]
struct Script {
    accounts: Vec<CanonicalAccount>,
    transactions: HashMap<String, Vec<CanonicalTransaction>>,
    rejected: HashMap<String, Vec<RejectedTransaction>>,
    failing_accounts: HashSet<String>,
    accounts_error: bool,
}

/// Provider whose responses the test controls
#[derive(Default)]
struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    fn set_accounts(&self, accounts: &[(&str, &str)]) {
        self.script.lock().unwrap().accounts = accounts
            .iter()
            .map(|(id, balance)| account(id, balance))
            .collect();
    }

    fn add_transaction(&self, account_id: &str, tx_id: &str, amount: &str, on: &str, category: Option<&str>) {
        self.script
            .lock()
            .unwrap()
            .transactions
            .entry(account_id.to_string())
            .or_default()
            .push(CanonicalTransaction {
                provider_transaction_id: tx_id.to_string(),
                provider_account_id: account_id.to_string(),
                amount: dec(amount),
                currency: "USD".to_string(),
                description: format!("tx {}", tx_id),
                category: category.map(str::to_string),
                date: date(on),
                direction: TransactionDirection::from_amount(dec(amount)),
                merchant_name: None,
                pending: false,
            });
    }

    fn clear_balance(&self, account_id: &str) {
        let mut script = self.script.lock().unwrap();
        for account in script.accounts.iter_mut() {
            if account.provider_account_id == account_id {
                account.balance = None;
            }
        }
    }

    fn reject_transaction(&self, account_id: &str, tx_id: &str, reason: &str) {
        self.script
            .lock()
            .unwrap()
            .rejected
            .entry(account_id.to_string())
            .or_default()
            .push(RejectedTransaction {
                provider_transaction_id: tx_id.to_string(),
                reason: reason.to_string(),
            });
    }

    fn fail_transactions_for(&self, account_id: &str, fail: bool) {
        let mut script = self.script.lock().unwrap();
        if fail {
            script.failing_accounts.insert(account_id.to_string());
        } else {
            script.failing_accounts.remove(account_id);
        }
    }

    fn fail_accounts(&self, fail: bool) {
        self.script.lock().unwrap().accounts_error = fail;
    }
}

fn account(id: &str, balance: &str) -> CanonicalAccount {
    CanonicalAccount {
        provider_account_id: id.to_string(),
        name: format!("Account {}", id),
        account_type: AccountType::Cash,
        subtype: Some("checking".to_string()),
        balance: Some(dec(balance)),
        available_balance: None,
        currency: "USD".to_string(),
        account_number: None,
        institution: Institution {
            id: Some("scripted_bank".to_string()),
            name: Some("Scripted Bank".to_string()),
        },
        is_active: true,
        updated_at: Utc::now(),
    }
}

impl BankDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn get_accounts(&self, _credential: &Credential) -> nuts_core::domain::result::Result<Vec<CanonicalAccount>> {
        let script = self.script.lock().unwrap();
        if script.accounts_error {
            return Err(Error::provider_auth(PROVIDER, "HTTP 401"));
        }
        Ok(script.accounts.clone())
    }

    fn get_transactions(
        &self,
        _credential: &Credential,
        provider_account_id: &str,
        window: TransactionWindow,
    ) -> nuts_core::domain::result::Result<TransactionBatch> {
        let script = self.script.lock().unwrap();
        if script.failing_accounts.contains(provider_account_id) {
            return Err(Error::transient(PROVIDER, "HTTP 502"));
        }
        let mut txs = script
            .transactions
            .get(provider_account_id)
            .cloned()
            .unwrap_or_default();
        if let Some(count) = window.count() {
            txs.truncate(count);
        }
        let mut batch = TransactionBatch::new(txs);
        batch.rejected = script
            .rejected
            .get(provider_account_id)
            .cloned()
            .unwrap_or_default();
        Ok(batch)
    }
}

struct PlainCipher;

impl CredentialCipher for PlainCipher {
    fn encrypt(&self, plaintext: &[u8]) -> nuts_core::domain::result::Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> nuts_core::domain::result::Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

struct Harness {
    _temp_dir: TempDir,
    repo: Arc<DuckDbRepository>,
    provider: Arc<ScriptedProvider>,
    sync: SyncService,
    user_id: Uuid,
    connection_id: Uuid,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let repo = Arc::new(DuckDbRepository::new(&temp_dir.path().join("test.duckdb")).unwrap());
        repo.ensure_schema().unwrap();

        let provider = Arc::new(ScriptedProvider::default());
        let registry = Arc::new(ProviderRegistry::from_providers(vec![
            Arc::clone(&provider) as Arc<dyn BankDataProvider>
        ]));
        let cipher: Arc<dyn CredentialCipher> = Arc::new(PlainCipher);

        let user_id = Uuid::new_v4();
        let sealed = seal_credential(cipher.as_ref(), Credential::new("token")).unwrap();
        let connection = Connection::new(user_id, PROVIDER, sealed, &Institution::default());
        repo.insert_connection(&connection).unwrap();

        let sync = SyncService::new(Arc::clone(&repo), registry, cipher, 100);
        Self {
            _temp_dir: temp_dir,
            repo,
            provider,
            sync,
            user_id,
            connection_id: connection.id,
        }
    }

    fn sync(&self, sync_type: SyncType) -> nuts_core::domain::result::Result<nuts_core::SyncReport> {
        self.sync
            .sync_connection(self.connection_id, sync_type, &CancellationToken::new())
    }

    fn account_id(&self, provider_account_id: &str) -> Uuid {
        self.repo
            .get_accounts_by_connection(self.connection_id)
            .unwrap()
            .into_iter()
            .find(|a| a.provider_account_id.as_deref() == Some(provider_account_id))
            .map(|a| a.id)
            .unwrap()
    }

    fn total_transactions(&self) -> i64 {
        self.repo
            .get_accounts(self.user_id)
            .unwrap()
            .iter()
            .map(|a| self.repo.count_transactions(a.id).unwrap())
            .sum()
    }
}

// ============================================================================
// Sync Idempotency Tests
// ============================================================================

/// Replaying the same job adds no rows
#[test]
fn test_replayed_sync_adds_nothing() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "100.00"), ("b", "200.00")]);
    h.provider.add_transaction("a", "t1", "-12.34", "2025-01-02", None);
    h.provider.add_transaction("a", "t2", "50.00", "2025-01-03", None);
    h.provider.add_transaction("b", "t3", "-7.00", "2025-01-04", None);

    let first = h.sync(SyncType::Full).unwrap();
    assert_eq!(first.accounts_created, 2);
    assert_eq!(first.transactions_inserted, 3);
    assert_eq!(h.total_transactions(), 3);

    let second = h.sync(SyncType::Full).unwrap();
    assert_eq!(second.accounts_created, 0);
    assert_eq!(second.accounts_updated, 2);
    assert_eq!(second.transactions_inserted, 0);
    assert_eq!(second.transactions_skipped, 3);
    assert_eq!(h.repo.get_accounts(h.user_id).unwrap().len(), 2);
    assert_eq!(h.total_transactions(), 3);
}

/// A transaction id repeated inside one response is stored once
#[test]
fn test_duplicate_ids_within_one_response() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "0")]);
    h.provider.add_transaction("a", "dup", "-1.00", "2025-01-02", None);
    h.provider.add_transaction("a", "dup", "-1.00", "2025-01-02", None);

    let report = h.sync(SyncType::Full).unwrap();
    assert_eq!(report.transactions_inserted, 1);
    assert_eq!(report.transactions_skipped, 1);
}

/// Stored amounts keep their exact decimal value and sign
#[test]
fn test_amounts_and_types_are_stored_exactly() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "0")]);
    h.provider.add_transaction("a", "in", "1234.56", "2025-01-02", None);
    h.provider.add_transaction("a", "out", "-0.01", "2025-01-03", None);
    h.sync(SyncType::Full).unwrap();

    let txs = h.repo.get_transactions_by_account(h.account_id("a")).unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].amount, dec("1234.56"));
    assert_eq!(txs[0].transaction_type.as_str(), "income");
    assert_eq!(txs[1].amount, dec("-0.01"));
    assert_eq!(txs[1].transaction_type.as_str(), "expense");
    assert!(txs.iter().all(|t| t.is_external));
}

// ============================================================================
// Account Reconciliation Tests
// ============================================================================

/// Overlapping keys update, new keys create, missing keys stay
#[test]
fn test_account_reconciliation_counts() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "10"), ("b", "20")]);
    h.sync(SyncType::Full).unwrap();
    let b_id = h.account_id("b");

    h.provider.set_accounts(&[("b", "25.50"), ("c", "30"), ("d", "40")]);
    let report = h.sync(SyncType::Incremental).unwrap();

    assert_eq!(report.accounts_created, 2);
    assert_eq!(report.accounts_updated, 1);

    let accounts = h.repo.get_accounts(h.user_id).unwrap();
    assert_eq!(accounts.len(), 4);
    assert!(accounts.iter().all(|a| a.deleted_at.is_none()));

    let b = h.repo.get_account(b_id).unwrap().unwrap();
    assert_eq!(b.balance, dec("25.50"));
}

/// Accounts no longer listed still get their transactions reconciled
#[test]
fn test_unlisted_account_still_reconciles_transactions() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "10"), ("b", "20")]);
    h.sync(SyncType::Full).unwrap();

    h.provider.set_accounts(&[("b", "20")]);
    h.provider.add_transaction("a", "late", "-3.00", "2025-02-01", None);
    let report = h.sync(SyncType::Incremental).unwrap();

    assert_eq!(report.transactions_inserted, 1);
    assert_eq!(h.repo.count_transactions(h.account_id("a")).unwrap(), 1);
}

/// A listing without a balance leaves the stored balance alone
#[test]
fn test_missing_balance_keeps_stored_balance() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "120.50")]);
    h.sync(SyncType::Full).unwrap();

    h.provider.clear_balance("a");
    let report = h.sync(SyncType::Incremental).unwrap();

    assert_eq!(report.accounts_updated, 1);
    assert!(report.is_partial());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account_id, "a");
    assert!(report.failures[0].message.contains("no balance"));

    let a = h.repo.get_account(h.account_id("a")).unwrap().unwrap();
    assert_eq!(a.balance, dec("120.50"));
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

/// A row the provider could not map is reported while its siblings land
#[test]
fn test_rejected_row_is_reported() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "0")]);
    h.provider.add_transaction("a", "good", "-4.00", "2025-01-02", None);
    h.provider.reject_transaction("a", "bad", "invalid amount 'abc'");

    let report = h.sync(SyncType::Full).unwrap();
    assert_eq!(report.transactions_inserted, 1);
    assert!(report.is_partial());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account_id, "a");
    assert!(report.failures[0].message.contains("bad"));
    assert_eq!(report.failure_errors().len(), 1);
    assert_eq!(h.repo.count_transactions(h.account_id("a")).unwrap(), 1);
}

/// One account failing does not stop its siblings
#[test]
fn test_partial_failure_keeps_siblings() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "0"), ("b", "0")]);
    h.provider.add_transaction("a", "t1", "5.00", "2025-01-02", None);
    h.provider.add_transaction("b", "t2", "6.00", "2025-01-02", None);
    h.provider.fail_transactions_for("b", true);

    let report = h.sync(SyncType::Full).unwrap();
    assert!(report.is_partial());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account_id, "b");
    assert_eq!(report.failures[0].provider, PROVIDER);
    assert_eq!(report.transactions_inserted, 1);

    let connection = h.repo.get_connection(h.connection_id).unwrap().unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);

    // The skipped account catches up on the next run
    h.provider.fail_transactions_for("b", false);
    let report = h.sync(SyncType::Full).unwrap();
    assert!(!report.is_partial());
    assert_eq!(report.transactions_inserted, 1);
    assert_eq!(h.repo.count_transactions(h.account_id("b")).unwrap(), 1);
}

/// A fatal failure leaves the data and last sync time of the previous success
#[test]
fn test_fatal_failure_keeps_previous_state() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "10")]);
    h.provider.add_transaction("a", "t1", "5.00", "2025-01-02", None);
    h.sync(SyncType::Full).unwrap();
    let synced_at = h.repo.get_connection(h.connection_id).unwrap().unwrap().last_sync_at;

    h.provider.fail_accounts(true);
    h.provider.add_transaction("a", "t2", "6.00", "2025-01-03", None);
    let result = h.sync(SyncType::Full);
    assert!(matches!(result, Err(Error::ProviderAuth { .. })));

    let connection = h.repo.get_connection(h.connection_id).unwrap().unwrap();
    assert_eq!(connection.status, ConnectionStatus::Error);
    assert_eq!(connection.last_sync_at, synced_at);
    assert!(connection.last_error.unwrap().contains("401"));
    assert_eq!(h.total_transactions(), 1);
}

// ============================================================================
// Category Tests
// ============================================================================

/// Category names resolve case-insensitively and are created once
#[test]
fn test_categories_created_once() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "0")]);
    h.provider.add_transaction("a", "t1", "-10", "2025-01-02", Some("Groceries"));
    h.provider.add_transaction("a", "t2", "-20", "2025-01-03", Some("groceries"));
    h.provider.add_transaction("a", "t3", "-30", "2025-01-04", Some(""));

    let report = h.sync(SyncType::Full).unwrap();
    assert_eq!(report.categories_created, 1);

    let categories = h.repo.get_categories(h.user_id).unwrap();
    assert_eq!(categories.len(), 1);
    let txs = h.repo.get_transactions_by_account(h.account_id("a")).unwrap();
    assert_eq!(txs[0].category_id, Some(categories[0].id));
    assert_eq!(txs[1].category_id, Some(categories[0].id));
    assert_eq!(txs[2].category_id, None);

    h.provider.add_transaction("a", "t4", "-40", "2025-01-05", Some("GROCERIES"));
    assert_eq!(h.sync(SyncType::Full).unwrap().categories_created, 0);
}

// ============================================================================
// Connection Lifecycle Tests
// ============================================================================

/// Deleting a connection keeps its accounts and transactions
#[test]
fn test_delete_connection_keeps_history() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "10")]);
    h.provider.add_transaction("a", "t1", "5.00", "2025-01-02", None);
    h.sync(SyncType::Full).unwrap();
    let account_id = h.account_id("a");

    assert!(h.repo.delete_connection(h.connection_id).unwrap());
    assert!(h.repo.get_connection(h.connection_id).unwrap().is_none());

    let account = h.repo.get_account(account_id).unwrap().unwrap();
    assert_eq!(account.connection_id, None);
    assert_eq!(h.repo.count_transactions(account_id).unwrap(), 1);
}

/// Linking through the real cipher and queue ends with an active connection
#[tokio::test]
async fn test_link_then_queued_full_sync() {
    let temp_dir = TempDir::new().unwrap();
    let repo = Arc::new(DuckDbRepository::new(&temp_dir.path().join("test.duckdb")).unwrap());
    repo.ensure_schema().unwrap();

    let provider = Arc::new(ScriptedProvider::default());
    provider.set_accounts(&[("a", "10")]);
    provider.add_transaction("a", "t1", "5.00", "2025-01-02", None);
    let registry = Arc::new(ProviderRegistry::from_providers(vec![
        Arc::clone(&provider) as Arc<dyn BankDataProvider>
    ]));
    let cipher: Arc<dyn CredentialCipher> =
        Arc::new(ChaChaCredentialCipher::open(temp_dir.path(), "passphrase").unwrap());

    let sync = Arc::new(SyncService::new(
        Arc::clone(&repo),
        Arc::clone(&registry),
        Arc::clone(&cipher),
        100,
    ));
    let queue = Arc::new(LocalSyncQueue::start(
        sync,
        &SyncConfig {
            initial_backoff_ms: 1,
            ..SyncConfig::default()
        },
    ));
    let connections = ConnectionService::new(
        Arc::clone(&repo),
        registry,
        cipher,
        Arc::clone(&queue) as Arc<dyn SyncQueue>,
    );

    let user_id = Uuid::new_v4();
    let linked = connections
        .link(user_id, PROVIDER, LinkRequest::Token("secret-token".to_string()))
        .await
        .unwrap();
    assert_eq!(linked.status, ConnectionStatus::Pending);
    assert_eq!(linked.institution_name.as_deref(), Some("Scripted Bank"));
    assert!(!linked.credential_enc.contains("secret-token"));

    let outcomes = queue.shutdown().await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].job.sync_type, SyncType::Full);
    assert_eq!(outcomes[0].result.as_ref().unwrap().transactions_inserted, 1);

    let connection = connections.get(linked.id).unwrap();
    assert_eq!(connection.status, ConnectionStatus::Active);
    assert!(connection.last_sync_at.is_some());
}

// ============================================================================
// Balance Trend Tests
// ============================================================================

/// Synced external accounts trend from the provider balance backwards
#[test]
fn test_trend_for_synced_external_account() {
    let h = Harness::new();
    h.provider.set_accounts(&[("a", "500"), ("quiet", "75.25")]);
    h.provider.add_transaction("a", "t1", "-50", "2025-03-05", None);
    h.provider.add_transaction("a", "old", "-999", "2024-01-01", None);
    h.sync(SyncType::Full).unwrap();

    let balances = BalanceService::new(Arc::clone(&h.repo));
    let trends = balances
        .get_accounts_trend(h.user_id, Some(date("2025-03-01")), Some(date("2025-03-10")))
        .unwrap();

    assert_eq!(trends.len(), 2);
    let a = &trends[0];
    assert_eq!(a.name, "Account a");
    assert!(a.is_external);
    assert_eq!(a.balance, dec("500"));
    assert_eq!(a.balance_timeseries.first().unwrap().balance, dec("550"));
    assert_eq!(a.balance_timeseries.last().unwrap().balance, dec("500"));
    assert_eq!(a.trend.round_dp(2), dec("-9.09"));

    let quiet = &trends[1];
    assert_eq!(quiet.balance_timeseries.len(), 10);
    assert!(quiet.balance_timeseries.iter().all(|p| p.balance == dec("75.25")));
    assert_eq!(quiet.trend, Decimal::ZERO);
}

#[test]
fn test_trend_rejects_inverted_window() {
    let h = Harness::new();
    let balances = BalanceService::new(Arc::clone(&h.repo));
    let result = balances.get_accounts_trend(h.user_id, Some(date("2025-03-10")), Some(date("2025-03-01")));
    assert!(matches!(result, Err(Error::Validation(_))));
}
