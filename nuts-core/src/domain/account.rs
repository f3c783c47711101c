//! Account domain model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::canonical::{normalize_currency, AccountType, CanonicalAccount};

/// A financial account owned by the user
///
/// `is_external` decides who owns the balance. External accounts take the
/// provider's reported balance as truth; internal accounts derive it from
/// their transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub subtype: Option<String>,
    /// ISO 4217 currency code, normalized to uppercase
    pub currency: String,
    pub balance: Decimal,
    /// Spendable balance as last reported by the provider
    pub available_balance: Option<Decimal>,
    /// Masked, e.g. `****1234`
    pub account_number: Option<String>,
    /// False once the provider reports the account closed
    pub is_active: bool,
    pub color: Option<String>,
    pub meta: Option<JsonValue>,
    pub institution_name: Option<String>,
    pub is_external: bool,

    // =========================================================================
    // Provider linkage (external accounts only)
    // =========================================================================
    pub provider_account_id: Option<String>,
    pub provider_name: Option<String>,
    /// Non-owning; cleared when the connection is deleted
    pub connection_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a user-managed account whose balance comes from its ledger
    pub fn new_internal(
        user_id: Uuid,
        name: impl Into<String>,
        account_type: AccountType,
        currency: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            account_type,
            subtype: None,
            currency: normalize_currency(currency),
            balance: Decimal::ZERO,
            available_balance: None,
            account_number: None,
            is_active: true,
            color: None,
            meta: None,
            institution_name: None,
            is_external: false,
            provider_account_id: None,
            provider_name: None,
            connection_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Create the local row for an account a provider reported for the first time
    ///
    /// Without a reported balance the account starts at zero.
    pub fn from_canonical(
        user_id: Uuid,
        connection_id: Uuid,
        provider_name: &str,
        fetched: &CanonicalAccount,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: fetched.name.clone(),
            account_type: fetched.account_type,
            subtype: fetched.subtype.clone(),
            currency: normalize_currency(&fetched.currency),
            balance: fetched.balance.unwrap_or_default(),
            available_balance: fetched.available_balance,
            account_number: fetched.account_number.clone(),
            is_active: fetched.is_active,
            color: None,
            meta: fetched
                .institution
                .id
                .as_ref()
                .map(|id| serde_json::json!({ "institution_id": id })),
            institution_name: fetched.institution.name.clone(),
            is_external: true,
            provider_account_id: Some(fetched.provider_account_id.clone()),
            provider_name: Some(provider_name.to_string()),
            connection_id: Some(connection_id),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Validate account data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("account name cannot be empty");
        }
        if self.currency.trim().is_empty() {
            return Err("currency cannot be empty");
        }
        if self.is_external && self.provider_account_id.is_none() {
            return Err("external account needs a provider account id");
        }
        Ok(())
    }
}

/// Refresh of an existing external account from a provider response
#[derive(Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    pub account_id: Uuid,
    pub name: String,
    /// `None` keeps the stored balance
    pub balance: Option<Decimal>,
    pub available_balance: Option<Decimal>,
    pub is_active: bool,
}

impl AccountUpdate {
    pub fn from_canonical(account_id: Uuid, fetched: &CanonicalAccount) -> Self {
        Self {
            account_id,
            name: fetched.name.clone(),
            balance: fetched.balance,
            available_balance: fetched.available_balance,
            is_active: fetched.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::canonical::Institution;

    #[test]
    fn test_internal_account_normalizes_currency() {
        let account = Account::new_internal(Uuid::new_v4(), "Cash", AccountType::Cash, " ngn ");
        assert_eq!(account.currency, "NGN");
        assert!(!account.is_external);
        assert!(account.validate().is_ok());
    }

    #[test]
    fn test_from_canonical_is_external() {
        let fetched = CanonicalAccount {
            provider_account_id: "acc_1".to_string(),
            name: "Checking".to_string(),
            account_type: AccountType::Cash,
            subtype: Some("checking".to_string()),
            balance: Some(Decimal::new(12345, 2)),
            available_balance: Some(Decimal::new(10000, 2)),
            currency: "usd".to_string(),
            account_number: Some("****1234".to_string()),
            institution: Institution {
                id: Some("chase".to_string()),
                name: Some("Chase".to_string()),
            },
            is_active: true,
            updated_at: Utc::now(),
        };
        let connection_id = Uuid::new_v4();
        let account =
            Account::from_canonical(Uuid::new_v4(), connection_id, "teller", &fetched, Utc::now());

        assert!(account.is_external);
        assert_eq!(account.connection_id, Some(connection_id));
        assert_eq!(account.provider_account_id.as_deref(), Some("acc_1"));
        assert_eq!(account.currency, "USD");
        assert_eq!(account.balance, Decimal::new(12345, 2));
        assert_eq!(account.available_balance, Some(Decimal::new(10000, 2)));
        assert_eq!(account.account_number.as_deref(), Some("****1234"));
        assert!(account.is_active);
        assert!(account.validate().is_ok());
    }

    #[test]
    fn test_update_without_balance_keeps_it_unset() {
        let fetched = CanonicalAccount {
            provider_account_id: "acc_1".to_string(),
            name: "Checking".to_string(),
            account_type: AccountType::Cash,
            subtype: None,
            balance: None,
            available_balance: None,
            currency: "USD".to_string(),
            account_number: None,
            institution: Institution::default(),
            is_active: false,
            updated_at: Utc::now(),
        };
        let update = AccountUpdate::from_canonical(Uuid::new_v4(), &fetched);
        assert_eq!(update.balance, None);
        assert!(!update.is_active);

        let created = Account::from_canonical(Uuid::new_v4(), Uuid::new_v4(), "simplefin", &fetched, Utc::now());
        assert_eq!(created.balance, Decimal::ZERO);
        assert!(created.meta.is_none());
    }

    #[test]
    fn test_account_validation() {
        let mut account = Account::new_internal(Uuid::new_v4(), "Test", AccountType::Cash, "USD");
        account.name = "".to_string();
        assert!(account.validate().is_err());

        let mut account = Account::new_internal(Uuid::new_v4(), "Test", AccountType::Cash, "USD");
        account.is_external = true;
        assert!(account.validate().is_err());
    }
}
