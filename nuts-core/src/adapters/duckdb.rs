//! DuckDB repository implementation
//!
//! One connection behind a mutex. Plain reads and single writes go through
//! [`DuckDbRepository`]; a sync job's writes go through a [`UnitOfWork`],
//! which holds the connection for the whole job and rolls back unless
//! committed.
//!
//! Money is bound as text and cast to `DECIMAL(18, 4)`; digits past the
//! fourth decimal place are rounded by DuckDB.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountType, AccountUpdate, Category, Connection as BankConnection, ConnectionStatus,
    Transaction, TransactionType,
};
use crate::migrations::MIGRATIONS;
use crate::ports::CategoryStore;
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

static UNIT_OF_WORK_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

const CONNECTION_COLUMNS: &str = "id, user_id, provider_name, credential_enc, item_id,
    institution_id, institution_name, status, last_sync_at::VARCHAR, last_error,
    expires_at::VARCHAR, created_at::VARCHAR, updated_at::VARCHAR";

const ACCOUNT_COLUMNS: &str = "id, user_id, name, account_type, subtype, currency,
    CAST(balance AS VARCHAR), CAST(available_balance AS VARCHAR), account_number, is_active,
    color, meta, institution_name, is_external,
    provider_account_id, provider_name, connection_id,
    created_at::VARCHAR, updated_at::VARCHAR, deleted_at::VARCHAR";

const TRANSACTION_COLUMNS: &str = "id, user_id, account_id, CAST(amount AS VARCHAR), currency,
    type, description, category_id, transaction_date::VARCHAR, destination_account_id,
    provider_transaction_id, merchant_name, pending, is_external,
    created_at::VARCHAR, updated_at::VARCHAR, deleted_at::VARCHAR";

/// DuckDB repository implementation
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Retries with exponential backoff on file locking errors, which show up
    /// when a second process (the CLI next to a running worker) opens the file.
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            delay_ms = delay.as_millis() as u64,
                            error = %err_msg,
                            "database busy, retrying"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// Migrated in-memory database, used by tests
    pub fn in_memory() -> anyhow::Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        let repo = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn try_open_connection(db_path: &Path) -> anyhow::Result<Connection> {
        // Extension autoloading stays off: cached extensions in ~/.duckdb may
        // be signed by a different team on macOS
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    /// Run database migrations
    pub fn run_migrations(&self) -> anyhow::Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn, MIGRATIONS).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> anyhow::Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            tracing::info!(applied = ?result.applied, "database migrations applied");
        }
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Persistence(format!("connection lock poisoned: {}", e)))
    }

    /// Start a unit of work holding the connection until commit or drop
    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        UnitOfWork::begin(self.lock()?)
    }

    // === Connection operations ===

    pub fn insert_connection(&self, connection: &BankConnection) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO connections (id, user_id, provider_name, credential_enc, item_id,
                                      institution_id, institution_name, status, last_sync_at,
                                      last_error, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                connection.id.to_string(),
                connection.user_id.to_string(),
                connection.provider_name,
                connection.credential_enc,
                connection.item_id,
                connection.institution_id,
                connection.institution_name,
                connection.status.as_str(),
                connection.last_sync_at.map(format_timestamp),
                connection.last_error,
                connection.expires_at.map(format_timestamp),
                format_timestamp(connection.created_at),
                format_timestamp(connection.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_connection(&self, id: Uuid) -> Result<Option<BankConnection>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connections WHERE id = ?",
            CONNECTION_COLUMNS
        ))?;
        let mut rows = stmt.query_map([id.to_string()], row_to_connection)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_connections(&self, user_id: Uuid) -> Result<Vec<BankConnection>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connections WHERE user_id = ? ORDER BY created_at",
            CONNECTION_COLUMNS
        ))?;
        let connections = stmt
            .query_map([user_id.to_string()], row_to_connection)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(connections)
    }

    /// Persist status, error and last sync time of a connection
    pub fn save_connection_status(&self, connection: &BankConnection) -> Result<()> {
        let conn = self.lock()?;
        write_connection_status(&conn, connection)
    }

    /// Delete a connection, detaching its accounts
    ///
    /// Accounts and transactions stay; they become plain historical rows with
    /// no connection. Returns false if no such connection exists.
    pub fn delete_connection(&self, id: Uuid) -> Result<bool> {
        let mut uow = self.begin()?;
        let detached = uow.conn.execute(
            "UPDATE accounts SET connection_id = NULL WHERE connection_id = ?",
            [id.to_string()],
        )?;
        let deleted = uow
            .conn
            .execute("DELETE FROM connections WHERE id = ?", [id.to_string()])?;
        uow.commit()?;
        tracing::debug!(connection_id = %id, detached, "connection deleted");
        Ok(deleted > 0)
    }

    // === Account operations ===

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        let conn = self.lock()?;
        write_account(&conn, account)
    }

    pub fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS))?;
        let mut rows = stmt.query_map([id.to_string()], row_to_account)?;
        Ok(rows.next().transpose()?)
    }

    /// All of a user's accounts, soft-deleted ones included, ordered by name
    pub fn get_accounts(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts WHERE user_id = ? ORDER BY name, id",
            ACCOUNT_COLUMNS
        ))?;
        let accounts = stmt
            .query_map([user_id.to_string()], row_to_account)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub fn get_accounts_by_connection(&self, connection_id: Uuid) -> Result<Vec<Account>> {
        let conn = self.lock()?;
        select_accounts_by_connection(&conn, connection_id)
    }

    // === Transaction operations ===

    pub fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let conn = self.lock()?;
        write_transaction(&conn, tx)
    }

    pub fn get_transactions_by_account(&self, account_id: Uuid) -> Result<Vec<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE account_id = ? AND deleted_at IS NULL
             ORDER BY transaction_date, id",
            TRANSACTION_COLUMNS
        ))?;
        let txs = stmt
            .query_map([account_id.to_string()], row_to_transaction)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(txs)
    }

    /// Live transactions of a user dated on or before `until`
    pub fn get_ledger(&self, user_id: Uuid, until: NaiveDate) -> Result<Vec<Transaction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE user_id = ? AND deleted_at IS NULL AND transaction_date <= CAST(? AS DATE)
             ORDER BY transaction_date, id",
            TRANSACTION_COLUMNS
        ))?;
        let txs = stmt
            .query_map(params![user_id.to_string(), until.to_string()], row_to_transaction)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(txs)
    }

    pub fn count_transactions(&self, account_id: Uuid) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE account_id = ?",
            [account_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // === Category operations ===

    pub fn get_categories(&self, user_id: Uuid) -> Result<Vec<Category>> {
        let conn = self.lock()?;
        select_categories(&conn, user_id)
    }

    pub fn insert_category(&self, category: &Category) -> Result<()> {
        let conn = self.lock()?;
        write_category(&conn, category)
    }
}

/// A database transaction holding the repository's connection
///
/// Rolls back on drop unless [`UnitOfWork::commit`] succeeded, so every
/// early return or `?` inside a sync job discards its writes.
pub struct UnitOfWork<'a> {
    conn: MutexGuard<'a, Connection>,
    id: u64,
    committed: bool,
}

impl<'a> UnitOfWork<'a> {
    fn begin(conn: MutexGuard<'a, Connection>) -> Result<Self> {
        conn.execute_batch("BEGIN TRANSACTION")?;
        let id = UNIT_OF_WORK_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx_id = id, "DuckDB transaction started");
        Ok(Self {
            conn,
            id,
            committed: false,
        })
    }

    pub fn accounts_for_connection(&self, connection_id: Uuid) -> Result<Vec<Account>> {
        select_accounts_by_connection(&self.conn, connection_id)
    }

    pub fn insert_accounts(&mut self, accounts: &[Account]) -> Result<()> {
        for account in accounts {
            write_account(&self.conn, account)?;
        }
        Ok(())
    }

    /// Refresh existing accounts; an update without a balance keeps the stored one
    pub fn update_accounts(&mut self, updates: &[AccountUpdate], now: DateTime<Utc>) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "UPDATE accounts
             SET name = ?,
                 balance = COALESCE(CAST(? AS DECIMAL(18, 4)), balance),
                 available_balance = CAST(? AS DECIMAL(18, 4)),
                 is_active = ?,
                 updated_at = ?
             WHERE id = ?",
        )?;
        let now = format_timestamp(now);
        for update in updates {
            stmt.execute(params![
                update.name,
                update.balance.map(|b| b.to_string()),
                update.available_balance.map(|b| b.to_string()),
                update.is_active,
                now,
                update.account_id.to_string(),
            ])?;
        }
        Ok(())
    }

    /// Provider transaction ids already stored for an account, deleted rows included
    pub fn provider_transaction_ids(&self, account_id: Uuid) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT provider_transaction_id FROM transactions
             WHERE account_id = ? AND provider_transaction_id IS NOT NULL",
        )?;
        let ids = stmt
            .query_map([account_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<duckdb::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    pub fn insert_transactions(&mut self, txs: &[Transaction]) -> Result<()> {
        for tx in txs {
            write_transaction(&self.conn, tx)?;
        }
        Ok(())
    }

    pub fn categories(&self, user_id: Uuid) -> Result<Vec<Category>> {
        select_categories(&self.conn, user_id)
    }

    pub fn save_connection_status(&mut self, connection: &BankConnection) -> Result<()> {
        write_connection_status(&self.conn, connection)
    }

    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        tracing::debug!(tx_id = self.id, "DuckDB transaction committed");
        Ok(())
    }
}

impl CategoryStore for UnitOfWork<'_> {
    fn insert_category(&mut self, category: &Category) -> Result<()> {
        write_category(&self.conn, category)
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => tracing::debug!(tx_id = self.id, "DuckDB transaction rolled back"),
            Err(e) => tracing::error!(tx_id = self.id, error = %e, "DuckDB rollback failed"),
        }
    }
}

// === Statements shared by the repository and the unit of work ===

fn write_connection_status(conn: &Connection, connection: &BankConnection) -> Result<()> {
    conn.execute(
        "UPDATE connections SET status = ?, last_sync_at = ?, last_error = ?, updated_at = ?
         WHERE id = ?",
        params![
            connection.status.as_str(),
            connection.last_sync_at.map(format_timestamp),
            connection.last_error,
            format_timestamp(connection.updated_at),
            connection.id.to_string(),
        ],
    )?;
    Ok(())
}

fn write_account(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (id, user_id, name, account_type, subtype, currency, balance,
                               available_balance, account_number, is_active,
                               color, meta, institution_name, is_external, provider_account_id,
                               provider_name, connection_id, created_at, updated_at, deleted_at)
         VALUES (?, ?, ?, ?, ?, ?, CAST(? AS DECIMAL(18, 4)), CAST(? AS DECIMAL(18, 4)), ?, ?,
                 ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            account.id.to_string(),
            account.user_id.to_string(),
            account.name,
            account.account_type.as_str(),
            account.subtype,
            account.currency,
            account.balance.to_string(),
            account.available_balance.map(|b| b.to_string()),
            account.account_number,
            account.is_active,
            account.color,
            account.meta.as_ref().map(|m| m.to_string()),
            account.institution_name,
            account.is_external,
            account.provider_account_id,
            account.provider_name,
            account.connection_id.map(|id| id.to_string()),
            format_timestamp(account.created_at),
            format_timestamp(account.updated_at),
            account.deleted_at.map(format_timestamp),
        ],
    )?;
    Ok(())
}

fn write_transaction(conn: &Connection, tx: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (id, user_id, account_id, amount, currency, type, description,
                                   category_id, transaction_date, destination_account_id,
                                   provider_transaction_id, merchant_name, pending, is_external,
                                   created_at, updated_at, deleted_at)
         VALUES (?, ?, ?, CAST(? AS DECIMAL(18, 4)), ?, ?, ?, ?, CAST(? AS DATE), ?, ?, ?, ?, ?,
                 ?, ?, ?)",
        params![
            tx.id.to_string(),
            tx.user_id.to_string(),
            tx.account_id.to_string(),
            tx.amount.to_string(),
            tx.currency,
            tx.transaction_type.as_str(),
            tx.description,
            tx.category_id.map(|id| id.to_string()),
            tx.transaction_date.to_string(),
            tx.destination_account_id.map(|id| id.to_string()),
            tx.provider_transaction_id,
            tx.merchant_name,
            tx.pending,
            tx.is_external,
            format_timestamp(tx.created_at),
            format_timestamp(tx.updated_at),
            tx.deleted_at.map(format_timestamp),
        ],
    )?;
    Ok(())
}

fn write_category(conn: &Connection, category: &Category) -> Result<()> {
    conn.execute(
        "INSERT INTO categories (id, user_id, name, is_default, created_at) VALUES (?, ?, ?, ?, ?)",
        params![
            category.id.to_string(),
            category.user_id.to_string(),
            category.name,
            category.is_default,
            format_timestamp(category.created_at),
        ],
    )?;
    Ok(())
}

fn select_accounts_by_connection(conn: &Connection, connection_id: Uuid) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM accounts WHERE connection_id = ? ORDER BY created_at, id",
        ACCOUNT_COLUMNS
    ))?;
    let accounts = stmt
        .query_map([connection_id.to_string()], row_to_account)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(accounts)
}

fn select_categories(conn: &Connection, user_id: Uuid) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, is_default, created_at::VARCHAR
         FROM categories WHERE user_id = ? ORDER BY name",
    )?;
    let categories = stmt
        .query_map([user_id.to_string()], |row| {
            Ok(Category {
                id: uuid_at(row, 0)?,
                user_id: uuid_at(row, 1)?,
                name: row.get(2)?,
                is_default: row.get(3)?,
                created_at: timestamp_at(row, 4)?,
            })
        })?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(categories)
}

// === Row mapping ===

fn row_to_connection(row: &Row) -> duckdb::Result<BankConnection> {
    let status: String = row.get(7)?;
    Ok(BankConnection {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        provider_name: row.get(2)?,
        credential_enc: row.get(3)?,
        item_id: row.get(4)?,
        institution_id: row.get(5)?,
        institution_name: row.get(6)?,
        status: ConnectionStatus::from_str(&status).map_err(|e| conversion_error(7, e))?,
        last_sync_at: optional_timestamp_at(row, 8)?,
        last_error: row.get(9)?,
        expires_at: optional_timestamp_at(row, 10)?,
        created_at: timestamp_at(row, 11)?,
        updated_at: timestamp_at(row, 12)?,
    })
}

fn row_to_account(row: &Row) -> duckdb::Result<Account> {
    let account_type: String = row.get(3)?;
    let meta: Option<String> = row.get(11)?;
    let connection_id: Option<String> = row.get(16)?;
    Ok(Account {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        account_type: account_type.parse().unwrap_or(AccountType::Other),
        subtype: row.get(4)?,
        currency: row.get(5)?,
        balance: decimal_at(row, 6)?,
        available_balance: optional_decimal_at(row, 7)?,
        account_number: row.get(8)?,
        is_active: row.get(9)?,
        color: row.get(10)?,
        meta: meta
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| conversion_error(11, e))?,
        institution_name: row.get(12)?,
        is_external: row.get(13)?,
        provider_account_id: row.get(14)?,
        provider_name: row.get(15)?,
        connection_id: connection_id
            .map(|id| Uuid::parse_str(&id))
            .transpose()
            .map_err(|e| conversion_error(16, e))?,
        created_at: timestamp_at(row, 17)?,
        updated_at: timestamp_at(row, 18)?,
        deleted_at: optional_timestamp_at(row, 19)?,
    })
}

fn row_to_transaction(row: &Row) -> duckdb::Result<Transaction> {
    let tx_type: String = row.get(5)?;
    let category_id: Option<String> = row.get(7)?;
    let date: String = row.get(8)?;
    let destination: Option<String> = row.get(9)?;
    Ok(Transaction {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        account_id: uuid_at(row, 2)?,
        amount: decimal_at(row, 3)?,
        currency: row.get(4)?,
        transaction_type: TransactionType::from_str(&tx_type).map_err(|e| conversion_error(5, e))?,
        description: row.get(6)?,
        category_id: category_id
            .map(|id| Uuid::parse_str(&id))
            .transpose()
            .map_err(|e| conversion_error(7, e))?,
        transaction_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| conversion_error(8, e))?,
        destination_account_id: destination
            .map(|id| Uuid::parse_str(&id))
            .transpose()
            .map_err(|e| conversion_error(9, e))?,
        provider_transaction_id: row.get(10)?,
        merchant_name: row.get(11)?,
        pending: row.get(12)?,
        is_external: row.get(13)?,
        created_at: timestamp_at(row, 14)?,
        updated_at: timestamp_at(row, 15)?,
        deleted_at: optional_timestamp_at(row, 16)?,
    })
}

// Helper functions

fn conversion_error<E>(idx: usize, err: E) -> duckdb::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row, idx: usize) -> duckdb::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn decimal_at(row: &Row, idx: usize) -> duckdb::Result<Decimal> {
    let s: String = row.get(idx)?;
    parse_money(&s).map_err(|e| conversion_error(idx, e))
}

fn optional_decimal_at(row: &Row, idx: usize) -> duckdb::Result<Option<Decimal>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_money(&s))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

/// Stored values carry four places; drop the padding but keep at least cents
fn parse_money(s: &str) -> std::result::Result<Decimal, rust_decimal::Error> {
    let mut value = Decimal::from_str(s)?.normalize();
    if value.scale() < 2 {
        value.rescale(2);
    }
    Ok(value)
}

fn timestamp_at(row: &Row, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_timestamp(&s).map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_at(row: &Row, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_timestamp(&s))
        .transpose()
        .map_err(|e| conversion_error(idx, e))
}

/// Timestamps are stored as naive UTC
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::domain::Institution;

    fn repo() -> DuckDbRepository {
        let repo = DuckDbRepository::in_memory().unwrap();
        repo.ensure_schema().unwrap();
        repo
    }

    #[test]
    fn test_timestamp_format_round_trip() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(dt)).unwrap(), dt);
        assert_eq!(parse_timestamp("2025-03-04 05:06:07").unwrap(), dt);
    }

    #[test]
    fn test_retryable_lock_messages() {
        assert!(is_retryable_error("IO Error: Could not set lock on file: Resource temporarily unavailable"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_connection_status_persists() {
        let repo = repo();
        let mut connection =
            BankConnection::new(Uuid::new_v4(), "mono", "enc", &Institution::default());
        repo.insert_connection(&connection).unwrap();

        connection.mark_failed("HTTP 500", Utc::now());
        repo.save_connection_status(&connection).unwrap();

        let loaded = repo.get_connection(connection.id).unwrap().unwrap();
        assert_eq!(loaded.status, ConnectionStatus::Error);
        assert_eq!(loaded.last_error.as_deref(), Some("HTTP 500"));
        assert!(loaded.last_sync_at.is_none());
    }

    #[test]
    fn test_unit_of_work_rolls_back_on_drop() {
        let repo = repo();
        let user = Uuid::new_v4();
        {
            let mut uow = repo.begin().unwrap();
            uow.insert_category(&Category::new(user, "groceries")).unwrap();
            // dropped without commit
        }
        assert!(repo.get_categories(user).unwrap().is_empty());

        let mut uow = repo.begin().unwrap();
        uow.insert_category(&Category::new(user, "groceries")).unwrap();
        uow.commit().unwrap();
        assert_eq!(repo.get_categories(user).unwrap().len(), 1);
    }

    #[test]
    fn test_money_keeps_cents_and_sub_cents() {
        assert_eq!(parse_money("12.5000").unwrap().to_string(), "12.50");
        assert_eq!(parse_money("-3.0125").unwrap().to_string(), "-3.0125");
        assert_eq!(parse_money("7").unwrap().to_string(), "7.00");
    }

    #[test]
    fn test_update_without_balance_keeps_stored_balance() {
        let repo = repo();
        let mut account = Account::new_internal(Uuid::new_v4(), "Card", AccountType::Credit, "USD");
        account.is_external = true;
        account.provider_account_id = Some("acc_1".to_string());
        account.balance = Decimal::new(-4250, 2);
        repo.insert_account(&account).unwrap();

        let mut uow = repo.begin().unwrap();
        uow.update_accounts(
            &[AccountUpdate {
                account_id: account.id,
                name: "Card (renamed)".to_string(),
                balance: None,
                available_balance: Some(Decimal::new(95750, 2)),
                is_active: false,
            }],
            Utc::now(),
        )
        .unwrap();
        uow.commit().unwrap();

        let loaded = repo.get_account(account.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Card (renamed)");
        assert_eq!(loaded.balance, Decimal::new(-4250, 2));
        assert_eq!(loaded.available_balance, Some(Decimal::new(95750, 2)));
        assert!(!loaded.is_active);
    }

    #[test]
    fn test_decimal_amounts_are_exact() {
        let repo = repo();
        let user = Uuid::new_v4();
        let account = Account::new_internal(user, "Wallet", AccountType::Cash, "USD");
        repo.insert_account(&account).unwrap();

        let mut tx = Transaction::new(
            user,
            account.id,
            Decimal::new(-1999, 2),
            "USD",
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        );
        tx.merchant_name = Some("Corner Shop".to_string());
        tx.pending = true;
        repo.insert_transaction(&tx).unwrap();
        let sub_cent = Transaction::new(
            user,
            account.id,
            Decimal::new(-125, 4),
            "USD",
            NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
        );
        repo.insert_transaction(&sub_cent).unwrap();

        let loaded = repo.get_transactions_by_account(account.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].amount, Decimal::new(-1999, 2));
        assert_eq!(loaded[0].transaction_type, TransactionType::Expense);
        assert_eq!(loaded[0].merchant_name.as_deref(), Some("Corner Shop"));
        assert!(loaded[0].pending);
        assert_eq!(loaded[1].amount, Decimal::new(-125, 4));
    }
}
