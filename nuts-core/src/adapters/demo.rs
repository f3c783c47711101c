//! Demo data provider
//!
//! Offline provider that behaves like a real aggregator:
//! - 6 accounts with fixed provider ids and balances
//! - 180 days of transactions with realistic patterns
//!
//! Transaction ids are derived from account, date and description, so
//! syncing the same day twice yields the same ids.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::{
    AccountType, CanonicalAccount, CanonicalTransaction, Institution, TransactionBatch,
    TransactionDirection, TransactionWindow,
};
use crate::ports::{BankDataProvider, Credential};

const PROVIDER: &str = "demo";

/// Days of generated history
pub const DEMO_HISTORY_DAYS: i64 = 180;

pub const CHECKING: &str = "demo-checking-001";
pub const SAVINGS: &str = "demo-savings-001";
pub const CREDIT_CHASE: &str = "demo-credit-001";
pub const CREDIT_CITI: &str = "demo-credit-002";
pub const BROKERAGE: &str = "demo-investment-001";
pub const RETIREMENT: &str = "demo-401k-001";

struct DemoAccount {
    id: &'static str,
    name: &'static str,
    account_type: AccountType,
    subtype: &'static str,
    /// Cents
    balance: i64,
    institution: (&'static str, &'static str),
    last_four: &'static str,
}

const ACCOUNTS: [DemoAccount; 6] = [
    DemoAccount {
        id: CHECKING,
        name: "Primary Checking",
        account_type: AccountType::Cash,
        subtype: "checking",
        balance: 482347,
        institution: ("chase.com", "Chase"),
        last_four: "4821",
    },
    DemoAccount {
        id: SAVINGS,
        name: "High-Yield Savings",
        account_type: AccountType::Cash,
        subtype: "savings",
        balance: 1875000,
        institution: ("marcus.com", "Marcus by Goldman Sachs"),
        last_four: "9034",
    },
    DemoAccount {
        id: CREDIT_CHASE,
        name: "Sapphire Reserve",
        account_type: AccountType::Credit,
        subtype: "card",
        balance: -284763,
        institution: ("chase.com", "Chase"),
        last_four: "1177",
    },
    DemoAccount {
        id: CREDIT_CITI,
        name: "Citi Double Cash",
        account_type: AccountType::Credit,
        subtype: "card",
        balance: -124589,
        institution: ("citi.com", "Citi"),
        last_four: "6610",
    },
    DemoAccount {
        id: BROKERAGE,
        name: "Individual Brokerage",
        account_type: AccountType::Investment,
        subtype: "brokerage",
        balance: 4782315,
        institution: ("fidelity.com", "Fidelity"),
        last_four: "2208",
    },
    DemoAccount {
        id: RETIREMENT,
        name: "401(k)",
        account_type: AccountType::Investment,
        subtype: "retirement",
        balance: 8943267,
        institution: ("fidelity.com", "Fidelity"),
        last_four: "5153",
    },
];

/// Deterministic demo provider
///
/// Any non-empty credential is accepted.
#[derive(Debug, Clone)]
pub struct DemoProvider {
    today: Option<NaiveDate>,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self { today: None }
    }

    /// Pin "today" so generated history does not move with the clock
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    fn check(credential: &Credential) -> Result<()> {
        if credential.expose().trim().is_empty() {
            return Err(Error::provider_auth(PROVIDER, "empty demo token"));
        }
        Ok(())
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BankDataProvider for DemoProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn get_accounts(&self, credential: &Credential) -> Result<Vec<CanonicalAccount>> {
        Self::check(credential)?;
        let now = Utc::now();
        Ok(ACCOUNTS
            .iter()
            .map(|a| CanonicalAccount {
                provider_account_id: a.id.to_string(),
                name: a.name.to_string(),
                account_type: a.account_type,
                subtype: Some(a.subtype.to_string()),
                balance: Some(Decimal::new(a.balance, 2)),
                available_balance: None,
                currency: "USD".to_string(),
                account_number: Some(format!("****{}", a.last_four)),
                institution: Institution {
                    id: Some(a.institution.0.to_string()),
                    name: Some(a.institution.1.to_string()),
                },
                is_active: true,
                updated_at: now,
            })
            .collect())
    }

    fn get_transactions(
        &self,
        credential: &Credential,
        provider_account_id: &str,
        window: TransactionWindow,
    ) -> Result<TransactionBatch> {
        Self::check(credential)?;
        if !ACCOUNTS.iter().any(|a| a.id == provider_account_id) {
            return Err(Error::not_found(format!("demo account {}", provider_account_id)));
        }

        let mut transactions: Vec<CanonicalTransaction> = generate_history(self.today())
            .into_iter()
            .filter(|tx| tx.provider_account_id == provider_account_id)
            .collect();
        // Newest first, like the real providers
        transactions.sort_by(|a, b| b.date.cmp(&a.date));
        if let Some(count) = window.count() {
            transactions.truncate(count);
        }
        Ok(TransactionBatch::new(transactions))
    }
}

/// Generate every demo transaction dated within the history window ending `today`
pub fn generate_history(today: NaiveDate) -> Vec<CanonicalTransaction> {
    let mut out = Vec::new();

    for days_ago in 0..DEMO_HISTORY_DAYS {
        let date = today - Duration::days(days_ago);
        let day = date.day();
        let n = days_ago as usize;
        let mut push = |account: &str, cents: i64, description: &str, category: &str| {
            out.push(demo_transaction(account, date, cents, description, category));
        };

        // Paycheck on 1st and 15th
        if day == 1 || day == 15 {
            push(CHECKING, 425000, "ACME CORP PAYROLL DIRECT DEPOSIT", "income");
        }
        if day == 5 {
            push(CHECKING, -225000, "APARTMENT RENT PAYMENT", "housing");
        }
        if day == 10 {
            push(CHECKING, -15000, "CITY UTILITIES - ELECTRIC", "utilities");
            push(CHECKING, -7500, "COMCAST INTERNET", "utilities");
        }
        if day == 16 {
            push(CHECKING, -75000, "TRANSFER TO SAVINGS", "transfer");
            push(SAVINGS, 75000, "TRANSFER FROM CHECKING", "transfer");
        }
        if day == 20 {
            push(CHECKING, -18500, "STATE FARM AUTO INSURANCE", "insurance");
            push(CHECKING, -100000, "CITI CREDIT CARD PAYMENT", "payment");
            push(CREDIT_CITI, 100000, "PAYMENT THANK YOU", "payment");
        }
        if day == 25 {
            push(CHECKING, -250000, "CHASE CREDIT CARD PAYMENT", "payment");
            push(CREDIT_CHASE, 250000, "PAYMENT THANK YOU", "payment");
        }
        if day == 28 {
            push(SAVINGS, 7812, "INTEREST PAYMENT", "income");
            push(BROKERAGE, 45000, "DIVIDEND REINVESTMENT", "investment");
        }
        if day == 1 || day == 15 {
            push(RETIREMENT, 62500, "401K CONTRIBUTION", "investment");
        }

        if days_ago % 3 == 0 {
            let amounts = [-8523i64, -6745, -9234, -7100, -5899, -10523];
            push(CREDIT_CHASE, amounts[n % amounts.len()], "WHOLE FOODS MARKET", "groceries");
        }
        if days_ago % 2 == 0 {
            push(CREDIT_CITI, -565, "STARBUCKS", "coffee");
        }
        if days_ago % 3 == 1 || days_ago % 7 == 0 {
            let restaurants = [
                ("CHIPOTLE MEXICAN GRILL", -1250i64),
                ("SWEETGREEN", -1450),
                ("THE CAPITAL GRILLE", -8500),
                ("PHO RESTAURANTS", -2200),
                ("SHAKE SHACK", -1875),
            ];
            let (name, cents) = restaurants[n % restaurants.len()];
            push(CREDIT_CHASE, cents, name, "dining");
        }
        if days_ago % 7 == 0 {
            push(CREDIT_CITI, -5500, "SHELL OIL", "transportation");
        }
        if day == 3 {
            push(CREDIT_CHASE, -1599, "NETFLIX", "entertainment");
        }
        if day == 7 {
            push(CREDIT_CHASE, -1099, "SPOTIFY PREMIUM", "entertainment");
        }
        if day == 12 {
            push(CREDIT_CITI, -999, "AMAZON PRIME", "subscription");
        }
        if day == 15 {
            push(CREDIT_CITI, -4999, "GYM MEMBERSHIP", "health");
        }
        if days_ago % 5 == 0 {
            let shops = [
                ("AMAZON.COM", -3299i64),
                ("TARGET", -7850),
                ("BEST BUY", -12999),
                ("NORDSTROM", -18500),
                ("HOME DEPOT", -8725),
            ];
            let (name, cents) = shops[n % shops.len()];
            push(CREDIT_CHASE, cents, name, "shopping");
        }
    }

    out
}

fn demo_transaction(
    account: &str,
    date: NaiveDate,
    cents: i64,
    description: &str,
    category: &str,
) -> CanonicalTransaction {
    let amount = Decimal::new(cents, 2);
    let slug: String = description
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(20)
        .collect::<String>()
        .to_lowercase();

    CanonicalTransaction {
        provider_transaction_id: format!("{}-{}-{}", account, date.format("%Y%m%d"), slug),
        provider_account_id: account.to_string(),
        amount,
        currency: "USD".to_string(),
        description: description.to_string(),
        category: Some(category.to_string()),
        date,
        direction: TransactionDirection::from_amount(amount),
        merchant_name: None,
        pending: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
    }

    #[test]
    fn test_accounts_are_stable() {
        let provider = DemoProvider::with_today(today());
        let token = Credential::new("demo");
        let accounts = provider.get_accounts(&token).unwrap();
        assert_eq!(accounts.len(), 6);
        assert_eq!(accounts[0].provider_account_id, CHECKING);
        assert_eq!(accounts[0].balance, Some(Decimal::new(482347, 2)));
        assert!(accounts[2].account_type.is_liability());
    }

    #[test]
    fn test_empty_token_is_auth_error() {
        let provider = DemoProvider::new();
        let result = provider.get_accounts(&Credential::new(""));
        assert!(matches!(result, Err(Error::ProviderAuth { .. })));
    }

    #[test]
    fn test_transaction_ids_are_unique_and_repeatable() {
        let first = generate_history(today());
        let ids: HashSet<_> = first.iter().map(|t| t.provider_transaction_id.clone()).collect();
        assert_eq!(ids.len(), first.len());

        let second = generate_history(today());
        assert_eq!(
            first.iter().map(|t| &t.provider_transaction_id).collect::<Vec<_>>(),
            second.iter().map(|t| &t.provider_transaction_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_recent_window_limits_count() {
        let provider = DemoProvider::with_today(today());
        let token = Credential::new("demo");
        let recent = provider
            .get_transactions(&token, CREDIT_CHASE, TransactionWindow::Recent(10))
            .unwrap()
            .transactions;
        assert_eq!(recent.len(), 10);
        assert!(recent.windows(2).all(|w| w[0].date >= w[1].date));

        let full = provider
            .get_transactions(&token, CREDIT_CHASE, TransactionWindow::Full)
            .unwrap()
            .transactions;
        assert!(full.len() > 10);
        assert!(full.iter().all(|t| t.date > today() - Duration::days(DEMO_HISTORY_DAYS)));
    }

    #[test]
    fn test_unknown_account() {
        let provider = DemoProvider::new();
        let result =
            provider.get_transactions(&Credential::new("demo"), "nope", TransactionWindow::Full);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
