//! Transaction domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::canonical::{normalize_currency, CanonicalTransaction};
use super::result::Error;

/// Ledger classification of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
}

impl TransactionType {
    /// Type of a synced transaction from its normalized amount: inflow is
    /// income, anything else (including zero) is an expense
    pub fn from_amount(amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            TransactionType::Income
        } else {
            TransactionType::Expense
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(Error::validation(format!("unknown transaction type: {}", other))),
        }
    }
}

/// A single financial transaction belonging to an account
///
/// Income and expense rows store a signed amount. Transfers store the
/// magnitude and are signed per leg by [`Transaction::signed_amount_for`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    pub transaction_date: NaiveDate,
    /// Receiving account for transfers
    pub destination_account_id: Option<Uuid>,
    /// Idempotency key for synced rows, unique per account
    pub provider_transaction_id: Option<String>,
    pub merchant_name: Option<String>,
    /// Not yet posted when it was fetched
    pub pending: bool,
    pub is_external: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a user-entered income or expense
    pub fn new(
        user_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
        currency: &str,
        transaction_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            account_id,
            amount,
            currency: normalize_currency(currency),
            transaction_type: TransactionType::from_amount(amount),
            description: None,
            category_id: None,
            transaction_date,
            destination_account_id: None,
            provider_transaction_id: None,
            merchant_name: None,
            pending: false,
            is_external: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Create a transfer between two of the user's accounts
    pub fn transfer(
        user_id: Uuid,
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: Decimal,
        currency: &str,
        transaction_date: NaiveDate,
    ) -> Self {
        let mut tx = Self::new(user_id, from_account_id, amount.abs(), currency, transaction_date);
        tx.transaction_type = TransactionType::Transfer;
        tx.destination_account_id = Some(to_account_id);
        tx
    }

    /// Create the local row for a transaction fetched from a provider
    pub fn from_canonical(
        user_id: Uuid,
        account_id: Uuid,
        fetched: &CanonicalTransaction,
        category_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            account_id,
            amount: fetched.amount,
            currency: normalize_currency(&fetched.currency),
            transaction_type: TransactionType::from_amount(fetched.amount),
            description: Some(fetched.description.clone()),
            category_id,
            transaction_date: fetched.date,
            destination_account_id: None,
            provider_transaction_id: Some(fetched.provider_transaction_id.clone()),
            merchant_name: fetched.merchant_name.clone(),
            pending: fetched.pending,
            is_external: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Amount this transaction contributes to `account_id`'s balance.
    ///
    /// Transfers leave the source as an outflow and arrive at the destination
    /// as an inflow. Returns `None` when the account is not a party to it.
    pub fn signed_amount_for(&self, account_id: Uuid) -> Option<Decimal> {
        match self.transaction_type {
            TransactionType::Transfer => {
                if self.account_id == account_id {
                    Some(-self.amount.abs())
                } else if self.destination_account_id == Some(account_id) {
                    Some(self.amount.abs())
                } else {
                    None
                }
            }
            _ if self.account_id == account_id => Some(self.amount),
            _ => None,
        }
    }
}
