//! Canonical provider model
//!
//! Every provider adapter maps its own JSON into these shapes. Amounts are in
//! major currency units and signed so that a positive value is money flowing
//! into the account. Nothing downstream of an adapter looks at provider JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Standardized account type shared by every provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Cash,
    Credit,
    Investment,
    Loan,
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Cash => "cash",
            AccountType::Credit => "credit",
            AccountType::Investment => "investment",
            AccountType::Loan => "loan",
            AccountType::Other => "other",
        }
    }

    /// Credit and loan balances are money owed
    pub fn is_liability(&self) -> bool {
        matches!(self, AccountType::Credit | AccountType::Loan)
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = std::convert::Infallible;

    /// Unknown values fall back to `Other`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "cash" => AccountType::Cash,
            "credit" => AccountType::Credit,
            "investment" => AccountType::Investment,
            "loan" => AccountType::Loan,
            _ => AccountType::Other,
        })
    }
}

/// Institution an account is held at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Provider-agnostic account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalAccount {
    /// Provider-scoped id, the idempotency key for account reconciliation
    pub provider_account_id: String,
    pub name: String,
    pub account_type: AccountType,
    pub subtype: Option<String>,
    /// Current balance; `None` when the provider did not report a usable one
    pub balance: Option<Decimal>,
    pub available_balance: Option<Decimal>,
    /// ISO 4217, uppercase
    pub currency: String,
    /// Masked, e.g. `****1234`
    pub account_number: Option<String>,
    pub institution: Institution,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Debit or credit as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Debit,
    Credit,
}

impl TransactionDirection {
    /// Direction implied by an already-normalized amount
    pub fn from_amount(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            TransactionDirection::Debit
        } else {
            TransactionDirection::Credit
        }
    }
}

/// Provider-agnostic transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    /// Idempotency key, unique per account
    pub provider_transaction_id: String,
    pub provider_account_id: String,
    /// Signed, positive = inflow
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub category: Option<String>,
    pub date: NaiveDate,
    pub direction: TransactionDirection,
    pub merchant_name: Option<String>,
    pub pending: bool,
}

/// A provider row that could not be mapped into a [`CanonicalTransaction`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTransaction {
    pub provider_transaction_id: String,
    pub reason: String,
}

/// Transactions fetched for one account, plus the rows that were rejected
#[derive(Debug, Clone, Default)]
pub struct TransactionBatch {
    pub transactions: Vec<CanonicalTransaction>,
    pub rejected: Vec<RejectedTransaction>,
}

impl TransactionBatch {
    pub fn new(transactions: Vec<CanonicalTransaction>) -> Self {
        Self {
            transactions,
            rejected: Vec::new(),
        }
    }

    /// Keep a mapped row, or record why it was rejected
    pub fn push_mapped<E: fmt::Display>(
        &mut self,
        provider_transaction_id: &str,
        mapped: Result<CanonicalTransaction, E>,
    ) {
        match mapped {
            Ok(tx) => self.transactions.push(tx),
            Err(e) => self.rejected.push(RejectedTransaction {
                provider_transaction_id: provider_transaction_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// How much transaction history to request from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionWindow {
    /// Everything the provider will return
    Full,
    /// Only the most recent `n` transactions
    Recent(usize),
}

impl TransactionWindow {
    /// Count to pass as a provider page size, if any
    pub fn count(&self) -> Option<usize> {
        match self {
            TransactionWindow::Full => None,
            TransactionWindow::Recent(n) => Some(*n),
        }
    }
}

/// Normalize a currency code to uppercase
pub fn normalize_currency(currency: &str) -> String {
    currency.trim().to_uppercase()
}

/// Mask an account number down to its last four characters
pub fn mask_account_number(number: &str) -> Option<String> {
    let trimmed = number.trim();
    if trimmed.is_empty() {
        return None;
    }
    let chars: Vec<char> = trimmed.chars().collect();
    let start = chars.len().saturating_sub(4);
    let last_four: String = chars[start..].iter().collect();
    Some(format!("****{}", last_four))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_parsing() {
        assert_eq!("Credit".parse::<AccountType>().unwrap(), AccountType::Credit);
        assert_eq!(" loan ".parse::<AccountType>().unwrap(), AccountType::Loan);
        assert_eq!("brokerage".parse::<AccountType>().unwrap(), AccountType::Other);
        assert!(AccountType::Loan.is_liability());
        assert!(!AccountType::Cash.is_liability());
    }

    #[test]
    fn test_direction_from_amount() {
        assert_eq!(
            TransactionDirection::from_amount(Decimal::new(-500, 2)),
            TransactionDirection::Debit
        );
        assert_eq!(
            TransactionDirection::from_amount(Decimal::new(500, 2)),
            TransactionDirection::Credit
        );
        assert_eq!(
            TransactionDirection::from_amount(Decimal::ZERO),
            TransactionDirection::Credit
        );
    }

    #[test]
    fn test_mask_account_number() {
        assert_eq!(mask_account_number("0123456789"), Some("****6789".to_string()));
        assert_eq!(mask_account_number("12"), Some("****12".to_string()));
        assert_eq!(mask_account_number("  "), None);
    }

    #[test]
    fn test_batch_keeps_rejected_rows() {
        let mut batch = TransactionBatch::default();
        batch.push_mapped::<String>("bad", Err("bad amount".to_string()));
        assert!(batch.transactions.is_empty());
        assert_eq!(
            batch.rejected,
            vec![RejectedTransaction {
                provider_transaction_id: "bad".to_string(),
                reason: "bad amount".to_string(),
            }]
        );
    }

    #[test]
    fn test_window_count() {
        assert_eq!(TransactionWindow::Full.count(), None);
        assert_eq!(TransactionWindow::Recent(100).count(), Some(100));
    }
}
