//! Teller API client
//!
//! Teller authenticates with the access token as the basic auth username and,
//! outside the sandbox, a client certificate. Amounts and balances come back
//! as decimal strings that are already positive for inflows.

use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use reqwest::blocking::Client;
use reqwest::Identity;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::http;
use crate::config::TellerConfig;
use crate::domain::result::{Error, Result};
use crate::domain::{
    AccountType, CanonicalAccount, CanonicalTransaction, Institution, TransactionBatch,
    TransactionDirection, TransactionWindow,
};
use crate::domain::canonical::{mask_account_number, normalize_currency};
use crate::ports::{BankDataProvider, Credential};

const PROVIDER: &str = "teller";

/// Teller reports transactions without a currency; it only serves US and Canadian banks
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize)]
struct TellerAccount {
    id: String,
    name: String,
    #[serde(rename = "type")]
    account_type: String,
    #[serde(default)]
    subtype: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    last_four: Option<String>,
    #[serde(default)]
    institution: Option<TellerInstitution>,
}

#[derive(Debug, Deserialize)]
struct TellerInstitution {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TellerBalance {
    #[serde(default)]
    available: Option<String>,
    #[serde(default)]
    ledger: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TellerTransaction {
    id: String,
    amount: String,
    date: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: TellerTransactionDetails,
}

#[derive(Debug, Default, Deserialize)]
struct TellerTransactionDetails {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    counterparty: Option<TellerCounterparty>,
}

#[derive(Debug, Deserialize)]
struct TellerCounterparty {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TellerErrorBody {
    error: TellerErrorDetail,
}

#[derive(Debug, Deserialize)]
struct TellerErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: TellerErrorBody = serde_json::from_str(body).ok()?;
    Some(format!("{} ({})", parsed.error.message, parsed.error.code))
}

/// Teller data provider
pub struct TellerProvider {
    base_url: String,
    /// Client certificate and key, PEM encoded
    identity_pem: Option<(Vec<u8>, Vec<u8>)>,
}

impl TellerProvider {
    /// Build the provider, loading the client certificate when configured
    ///
    /// Outside the sandbox environment the certificate is mandatory.
    pub fn new(config: &TellerConfig) -> Result<Self> {
        let identity_pem = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => {
                let cert = std::fs::read(cert).map_err(|e| {
                    Error::config(format!("teller: cannot read certificate {}: {}", cert.display(), e))
                })?;
                let key = std::fs::read(key).map_err(|e| {
                    Error::config(format!("teller: cannot read private key {}: {}", key.display(), e))
                })?;
                Identity::from_pkcs8_pem(&cert, &key)
                    .map_err(|e| Error::config(format!("teller: invalid client certificate: {}", e)))?;
                Some((cert, key))
            }
            _ if config.environment != "sandbox" => {
                return Err(Error::config(format!(
                    "teller: certPath and keyPath are required in the {} environment",
                    config.environment
                )));
            }
            _ => None,
        };

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            identity_pem,
        })
    }

    fn client(&self) -> Result<Client> {
        let mut builder = http::builder();
        if let Some((cert, key)) = &self.identity_pem {
            let identity = Identity::from_pkcs8_pem(cert, key)
                .map_err(|e| Error::config(format!("teller: invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }
        http::build(PROVIDER, builder)
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        client: &Client,
        credential: &Credential,
        path: &str,
    ) -> Result<T> {
        let response = client
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(credential.expose(), Some(""))
            .send()
            .map_err(|e| http::map_request_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response, error_detail)?;
        http::read_json(PROVIDER, response)
    }
}

impl BankDataProvider for TellerProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn get_accounts(&self, credential: &Credential) -> Result<Vec<CanonicalAccount>> {
        let client = self.client()?;
        let accounts: Vec<TellerAccount> = self.get(&client, credential, "/accounts")?;

        let mut mapped = Vec::with_capacity(accounts.len());
        for account in accounts {
            let path = format!("/accounts/{}/balances", account.id);
            match self.get::<TellerBalance>(&client, credential, &path) {
                Ok(balance) => mapped.push(map_account(account, balance)),
                // One bad account should not hide the rest of the enrollment
                Err(e) if !matches!(e, Error::ProviderAuth { .. }) => {
                    tracing::warn!(provider = PROVIDER, account_id = %account.id, error = %e, "skipping account without balance");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(mapped)
    }

    fn get_transactions(
        &self,
        credential: &Credential,
        provider_account_id: &str,
        window: TransactionWindow,
    ) -> Result<TransactionBatch> {
        let client = self.client()?;
        let mut path = format!("/accounts/{}/transactions", provider_account_id);
        if let Some(count) = window.count() {
            path.push_str(&format!("?count={}", count));
        }
        let transactions: Vec<TellerTransaction> = self.get(&client, credential, &path)?;
        Ok(map_transactions(transactions, provider_account_id))
    }
}

fn map_account_type(account_type: &str, subtype: &str) -> (AccountType, String) {
    let subtype = subtype.to_lowercase();
    match account_type.to_lowercase().as_str() {
        "depository" => match subtype.as_str() {
            "savings" => (AccountType::Cash, "savings".to_string()),
            _ => (AccountType::Cash, "checking".to_string()),
        },
        "credit" => (AccountType::Credit, "card".to_string()),
        "loan" => (AccountType::Loan, "loan".to_string()),
        "investment" => match subtype.as_str() {
            "checking" | "savings" => (AccountType::Cash, subtype),
            _ => (AccountType::Investment, "investment".to_string()),
        },
        _ => (AccountType::Other, subtype),
    }
}

fn parse_amount(value: Option<&str>) -> Option<Decimal> {
    value.and_then(|v| Decimal::from_str(v.trim()).ok())
}

fn map_account(account: TellerAccount, balance: TellerBalance) -> CanonicalAccount {
    let (account_type, subtype) = map_account_type(&account.account_type, &account.subtype);
    let currency = if account.currency.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        normalize_currency(&account.currency)
    };
    let institution = account
        .institution
        .map(|i| Institution { id: i.id, name: i.name })
        .unwrap_or_default();

    CanonicalAccount {
        provider_account_id: account.id,
        name: account.name,
        account_type,
        subtype: Some(subtype).filter(|s| !s.is_empty()),
        // The ledger balance is the account's balance; a missing one stays unknown
        balance: parse_amount(balance.ledger.as_deref()),
        available_balance: parse_amount(balance.available.as_deref()),
        currency,
        account_number: account.last_four.as_deref().and_then(mask_account_number),
        institution,
        is_active: account.status == "open",
        updated_at: Utc::now(),
    }
}

fn map_transactions(transactions: Vec<TellerTransaction>, provider_account_id: &str) -> TransactionBatch {
    let mut batch = TransactionBatch::default();
    for tx in transactions {
        let id = tx.id.clone();
        batch.push_mapped(&id, map_transaction(tx, provider_account_id));
    }
    batch
}

fn map_transaction(tx: TellerTransaction, provider_account_id: &str) -> Result<CanonicalTransaction> {
    let amount = Decimal::from_str(tx.amount.trim())
        .map_err(|e| Error::validation(format!("transaction {}: bad amount: {}", tx.id, e)))?;
    let date = NaiveDate::parse_from_str(&tx.date, "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("transaction {}: bad date: {}", tx.id, e)))?;

    Ok(CanonicalTransaction {
        provider_transaction_id: tx.id,
        provider_account_id: provider_account_id.to_string(),
        amount,
        currency: DEFAULT_CURRENCY.to_string(),
        description: tx.description.trim().to_string(),
        category: tx.details.category.filter(|c| !c.is_empty()),
        date,
        direction: TransactionDirection::from_amount(amount),
        merchant_name: tx.details.counterparty.and_then(|c| c.name),
        pending: tx.status.eq_ignore_ascii_case("pending"),
    })
}
