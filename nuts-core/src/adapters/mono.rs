//! Mono API client
//!
//! Mono links one bank account per connect flow. The connect widget hands
//! back a short-lived code which is exchanged for a permanent account id;
//! that account id is the credential. Amounts are in minor units (kobo).

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::http;
use crate::config::MonoConfig;
use crate::domain::canonical::{mask_account_number, normalize_currency};
use crate::domain::result::{Error, Result};
use crate::domain::{
    AccountType, CanonicalAccount, CanonicalTransaction, Institution, TransactionBatch,
    TransactionDirection, TransactionWindow,
};
use crate::ports::{BankDataProvider, Credential};

const PROVIDER: &str = "mono";

/// Mono's `status` field on a successful response
const STATUS_SUCCESSFUL: &str = "successful";

/// `meta.data_status` once Mono has finished pulling the account
const DATA_AVAILABLE: &str = "AVAILABLE";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    account: MonoAccount,
    meta: MonoAccountMeta,
}

#[derive(Debug, Deserialize)]
struct MonoAccount {
    id: String,
    name: String,
    #[serde(default)]
    currency: String,
    #[serde(rename = "type", default)]
    account_type: String,
    #[serde(default)]
    account_number: String,
    /// Minor units
    balance: Decimal,
    #[serde(default)]
    institution: Option<MonoInstitution>,
}

#[derive(Debug, Deserialize)]
struct MonoInstitution {
    name: Option<String>,
    bank_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MonoAccountMeta {
    #[serde(default)]
    data_status: String,
}

#[derive(Debug, Deserialize)]
struct MonoTransaction {
    id: String,
    #[serde(default)]
    narration: String,
    /// Minor units, unsigned
    amount: Decimal,
    #[serde(rename = "type")]
    tx_type: String,
    date: String,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MonoErrorBody {
    #[serde(default)]
    message: String,
}

fn error_detail(body: &str) -> Option<String> {
    serde_json::from_str::<MonoErrorBody>(body)
        .ok()
        .map(|b| b.message)
        .filter(|m| !m.is_empty())
}

/// Mono data provider
pub struct MonoProvider {
    base_url: String,
    secret_key: String,
}

impl MonoProvider {
    pub fn new(config: &MonoConfig) -> Result<Self> {
        let secret_key = config
            .secret_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::config("mono: secret key not set (providers.mono.secretKey or NUTS_MONO_SECRET_KEY)")
            })?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn client(&self) -> Result<Client> {
        http::build(PROVIDER, http::builder())
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .header("mono-sec-key", &self.secret_key)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| http::map_request_error(PROVIDER, e))?;
        let response = http::check_status(PROVIDER, response, error_detail)?;
        let envelope: Envelope<T> = http::read_json(PROVIDER, response)?;
        if envelope.status != STATUS_SUCCESSFUL {
            return Err(Error::transient(
                PROVIDER,
                format!("request not successful: {}", envelope.message),
            ));
        }
        envelope
            .data
            .ok_or_else(|| Error::transient(PROVIDER, "response carried no data"))
    }

    fn fetch_account(&self, client: &Client, account_id: &str) -> Result<AccountData> {
        let data: AccountData =
            self.send(client.get(format!("{}/accounts/{}", self.base_url, account_id)))?;
        check_data_status(&data.meta.data_status)?;
        Ok(data)
    }
}

/// Right after linking Mono is still pulling the statement; anything but
/// `AVAILABLE` is retryable
pub(crate) fn check_data_status(data_status: &str) -> Result<()> {
    if data_status == DATA_AVAILABLE {
        return Ok(());
    }
    Err(Error::data_unavailable(
        PROVIDER,
        format!("account data status is {}", data_status),
    ))
}

impl BankDataProvider for MonoProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn get_accounts(&self, credential: &Credential) -> Result<Vec<CanonicalAccount>> {
        let client = self.client()?;
        let data = self.fetch_account(&client, credential.expose())?;
        Ok(vec![map_account(data.account, credential.expose())])
    }

    fn get_transactions(
        &self,
        credential: &Credential,
        _provider_account_id: &str,
        window: TransactionWindow,
    ) -> Result<TransactionBatch> {
        let client = self.client()?;
        // The sign convention depends on the account type
        let data = self.fetch_account(&client, credential.expose())?;
        let account = map_account(data.account, credential.expose());

        let mut url = format!(
            "{}/accounts/{}/transactions?paginate=false",
            self.base_url,
            credential.expose()
        );
        if let Some(count) = window.count() {
            url.push_str(&format!("&limit={}", count));
        }
        let transactions: Vec<MonoTransaction> = self.send(client.get(url))?;

        let mut batch = TransactionBatch::default();
        for tx in transactions {
            let id = tx.id.clone();
            batch.push_mapped(&id, map_transaction(tx, &account));
        }
        Ok(batch)
    }

    fn uses_token_exchange(&self) -> bool {
        true
    }

    /// Exchange a connect code for the account id
    fn exchange_token(&self, code: &str) -> Result<Credential> {
        let client = self.client()?;
        let data: AuthData = self.send(
            client
                .post(format!("{}/accounts/auth", self.base_url))
                .json(&AuthRequest { code }),
        )?;
        Ok(Credential::new(data.id))
    }
}

fn map_account_type(mono_type: &str) -> (AccountType, &'static str) {
    match mono_type.to_uppercase().as_str() {
        "SAVINGS_ACCOUNT" | "DIGITAL SAVINGS ACCOUNT" => (AccountType::Cash, "savings"),
        "CURRENT_ACCOUNT" | "CHECKING_ACCOUNT" | "WALLET_ACCOUNT" | "CURRENT" => {
            (AccountType::Cash, "checking")
        }
        "BUSINESS_BANKING" | "BUSINESS_ACCOUNT" => (AccountType::Investment, "investment"),
        other => {
            tracing::debug!(provider = PROVIDER, account_type = other, "unknown account type");
            (AccountType::Other, "other")
        }
    }
}

fn minor_to_major(amount: Decimal) -> Decimal {
    amount / Decimal::ONE_HUNDRED
}

fn map_account(account: MonoAccount, credential_account_id: &str) -> CanonicalAccount {
    let (account_type, subtype) = map_account_type(&account.account_type);
    let institution = account
        .institution
        .map(|i| Institution {
            id: i.bank_code,
            name: i.name,
        })
        .unwrap_or_default();

    if account.id != credential_account_id {
        tracing::debug!(provider = PROVIDER, mono_id = %account.id, "account id differs from linked id");
    }
    CanonicalAccount {
        provider_account_id: credential_account_id.to_string(),
        name: account.name,
        account_type,
        subtype: Some(subtype.to_string()),
        balance: Some(minor_to_major(account.balance)),
        available_balance: None,
        currency: normalize_currency(&account.currency),
        account_number: mask_account_number(&account.account_number),
        institution,
        is_active: true,
        updated_at: Utc::now(),
    }
}

/// Debits leave the account. Credit and loan balances run the other way.
fn signed_amount(amount: Decimal, tx_type: &str, account_type: AccountType) -> Decimal {
    let major = minor_to_major(amount);
    let signed = if tx_type.eq_ignore_ascii_case("debit") {
        -major.abs()
    } else {
        major
    };
    if account_type.is_liability() {
        -signed
    } else {
        signed
    }
}

fn map_transaction(tx: MonoTransaction, account: &CanonicalAccount) -> Result<CanonicalTransaction> {
    let date = DateTime::parse_from_rfc3339(&tx.date)
        .map_err(|e| Error::validation(format!("transaction {}: bad date: {}", tx.id, e)))?
        .date_naive();
    let amount = signed_amount(tx.amount, &tx.tx_type, account.account_type);

    Ok(CanonicalTransaction {
        provider_transaction_id: tx.id,
        provider_account_id: account.provider_account_id.clone(),
        amount,
        currency: account.currency.clone(),
        description: tx.narration.trim().to_string(),
        category: tx.category.filter(|c| !c.trim().is_empty()),
        date,
        direction: if tx.tx_type.eq_ignore_ascii_case("debit") {
            TransactionDirection::Debit
        } else {
            TransactionDirection::Credit
        },
        merchant_name: None,
        pending: false,
    })
}
