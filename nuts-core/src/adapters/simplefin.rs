//! SimpleFIN API client
//!
//! The credential is an access URL with basic auth userinfo. Linking starts
//! from a base64 setup token that is claimed once for that access URL.

use std::str::FromStr;

use base64::Engine;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use reqwest::blocking::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use super::http;
use crate::domain::canonical::normalize_currency;
use crate::domain::result::{Error, Result};
use crate::domain::{
    AccountType, CanonicalAccount, CanonicalTransaction, Institution, TransactionBatch,
    TransactionDirection, TransactionWindow,
};
use crate::ports::{BankDataProvider, Credential};

const PROVIDER: &str = "simplefin";

/// History requested on a full sync
const FULL_HISTORY_DAYS: i64 = 365;

/// History requested on an incremental sync, trimmed to the most recent N afterwards
const RECENT_HISTORY_DAYS: i64 = 90;

/// SimpleFIN API response for accounts
#[derive(Debug, Deserialize)]
struct AccountsResponse {
    accounts: Vec<SimpleFINAccount>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SimpleFINAccount {
    id: String,
    name: String,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    balance: Option<String>,
    #[serde(rename = "available-balance", default)]
    available_balance: Option<String>,
    #[serde(rename = "balance-date", default)]
    balance_date: Option<i64>,
    #[serde(default)]
    org: Option<SimpleFINOrg>,
    #[serde(default)]
    transactions: Vec<SimpleFINTransaction>,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Deserialize)]
struct SimpleFINOrg {
    name: Option<String>,
    domain: Option<String>,
    #[serde(rename = "sfin-url", default)]
    sfin_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimpleFINTransaction {
    id: String,
    /// Unix time; 0 while the transaction is still pending
    posted: i64,
    amount: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    payee: Option<String>,
    #[serde(default)]
    pending: bool,
    #[serde(default)]
    extra: Option<SimpleFINTransactionExtra>,
}

#[derive(Debug, Deserialize)]
struct SimpleFINTransactionExtra {
    category: Option<String>,
}

/// Parsed access URL
#[derive(Debug)]
struct AccessUrl {
    base_url: String,
    username: String,
    password: String,
}

impl AccessUrl {
    fn parse(access_url: &str) -> Result<Self> {
        let parsed = Url::parse(access_url.trim())
            .map_err(|e| Error::validation(format!("invalid SimpleFIN access URL: {}", e)))?;

        if parsed.scheme() != "https" {
            return Err(Error::validation("SimpleFIN access URL must use HTTPS"));
        }

        let host = parsed.host_str().unwrap_or("");
        if !host.ends_with("simplefin.org") {
            return Err(Error::validation(
                "SimpleFIN access URL must be from simplefin.org domain",
            ));
        }

        let username = parsed.username().to_string();
        let password = parsed.password().unwrap_or("").to_string();
        if username.is_empty() || password.is_empty() {
            return Err(Error::validation("SimpleFIN access URL must include credentials"));
        }

        Ok(Self {
            base_url: format!(
                "{}://{}{}",
                parsed.scheme(),
                host,
                parsed.path().trim_end_matches('/')
            ),
            username,
            password,
        })
    }
}

/// SimpleFIN data provider
#[derive(Debug, Default)]
pub struct SimpleFINProvider;

impl SimpleFINProvider {
    pub fn new() -> Self {
        Self
    }

    fn client(&self) -> Result<Client> {
        http::build(PROVIDER, http::builder())
    }

    fn fetch(&self, access: &AccessUrl, query: &[(&str, String)]) -> Result<AccountsResponse> {
        let response = self
            .client()?
            .get(format!("{}/accounts", access.base_url))
            .basic_auth(&access.username, Some(&access.password))
            .query(query)
            .send()
            .map_err(|e| http::map_request_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response, |_| None)?;
        let data: AccountsResponse = http::read_json(PROVIDER, response)?;
        for warning in &data.errors {
            tracing::warn!(provider = PROVIDER, warning = %warning, "SimpleFIN reported an error");
        }
        Ok(data)
    }
}

impl BankDataProvider for SimpleFINProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn get_accounts(&self, credential: &Credential) -> Result<Vec<CanonicalAccount>> {
        let access = AccessUrl::parse(credential.expose())?;
        let data = self.fetch(&access, &[("balances-only", "1".to_string())])?;
        Ok(data.accounts.iter().map(map_account).collect())
    }

    fn get_transactions(
        &self,
        credential: &Credential,
        provider_account_id: &str,
        window: TransactionWindow,
    ) -> Result<TransactionBatch> {
        let access = AccessUrl::parse(credential.expose())?;
        let days = match window {
            TransactionWindow::Full => FULL_HISTORY_DAYS,
            TransactionWindow::Recent(_) => RECENT_HISTORY_DAYS,
        };
        let start = (Utc::now() - Duration::days(days)).timestamp();
        let data = self.fetch(&access, &transactions_query(start, provider_account_id))?;
        Ok(collect_transactions(&data, provider_account_id, window))
    }

    fn uses_token_exchange(&self) -> bool {
        true
    }

    /// Claim a setup token for its access URL
    fn exchange_token(&self, setup_token: &str) -> Result<Credential> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(setup_token.trim())
            .map_err(|_| Error::validation("invalid SimpleFIN setup token format"))?;
        let claim_url = String::from_utf8(decoded)
            .map_err(|_| Error::validation("invalid SimpleFIN setup token encoding"))?;

        let response = self
            .client()?
            .post(claim_url.trim())
            .header("Content-Length", "0")
            .send()
            .map_err(|e| http::map_request_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response, |_| None)?;

        let access_url = response
            .text()
            .map_err(|e| Error::transient(PROVIDER, format!("failed to read claim response: {}", e)))?;
        let access_url = access_url.trim();
        if access_url.is_empty() {
            return Err(Error::transient(PROVIDER, "no access URL received"));
        }
        AccessUrl::parse(access_url)?;
        Ok(Credential::new(access_url))
    }
}

/// Posted transactions only. Pending rows carry no posted date and would be
/// stored under an id that never changes once they post.
fn transactions_query(start: i64, provider_account_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("start-date", start.to_string()),
        ("account", provider_account_id.to_string()),
    ]
}

fn collect_transactions(
    data: &AccountsResponse,
    provider_account_id: &str,
    window: TransactionWindow,
) -> TransactionBatch {
    let mut batch = TransactionBatch::default();
    for account in data.accounts.iter().filter(|a| a.id == provider_account_id) {
        for tx in &account.transactions {
            if tx.posted <= 0 {
                tracing::debug!(provider = PROVIDER, transaction_id = %tx.id, "deferring unposted transaction");
                continue;
            }
            batch.push_mapped(&tx.id, map_transaction(tx, account));
        }
    }

    if let Some(count) = window.count() {
        batch.transactions.sort_by(|a, b| b.date.cmp(&a.date));
        batch.transactions.truncate(count);
    }
    batch
}

fn parse_decimal(value: Option<&str>) -> Option<Decimal> {
    value.and_then(|v| Decimal::from_str(v.trim()).ok())
}

fn map_account(account: &SimpleFINAccount) -> CanonicalAccount {
    let balance = parse_decimal(account.balance.as_deref());
    let updated_at = account
        .balance_date
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now);
    let institution = account
        .org
        .as_ref()
        .map(|org| Institution {
            id: org.domain.clone().or_else(|| org.sfin_url.clone()),
            name: org.name.clone(),
        })
        .unwrap_or_default();

    CanonicalAccount {
        provider_account_id: account.id.clone(),
        name: account.name.clone(),
        // SimpleFIN does not report account types
        account_type: AccountType::Other,
        subtype: None,
        balance,
        available_balance: parse_decimal(account.available_balance.as_deref()),
        currency: normalize_currency(&account.currency),
        account_number: None,
        institution,
        is_active: true,
        updated_at,
    }
}

fn map_transaction(
    tx: &SimpleFINTransaction,
    account: &SimpleFINAccount,
) -> Result<CanonicalTransaction> {
    let amount = Decimal::from_str(tx.amount.trim())
        .map_err(|e| Error::validation(format!("transaction {}: bad amount: {}", tx.id, e)))?;
    if tx.posted <= 0 {
        return Err(Error::validation(format!("transaction {}: not posted yet", tx.id)));
    }
    let date: NaiveDate = Utc
        .timestamp_opt(tx.posted, 0)
        .single()
        .map(|dt| dt.date_naive())
        .ok_or_else(|| Error::validation(format!("transaction {}: bad posted time", tx.id)))?;

    Ok(CanonicalTransaction {
        provider_transaction_id: tx.id.clone(),
        provider_account_id: account.id.clone(),
        amount,
        currency: normalize_currency(&account.currency),
        description: tx.description.clone().unwrap_or_default(),
        category: tx
            .extra
            .as_ref()
            .and_then(|e| e.category.clone())
            .filter(|c| !c.is_empty()),
        date,
        direction: TransactionDirection::from_amount(amount),
        merchant_name: tx.payee.clone(),
        pending: tx.pending,
    })
}
