//! Balance service - balance history and trend reconstruction
//!
//! Internal accounts are ledger-authoritative: their balance is the sum of
//! their transactions. External accounts trust the provider's current
//! balance and work backwards through the transactions in the window.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::result::Result;
use crate::domain::{Account, AccountWithTrend, BalancePoint, Transaction, TrendWindow};

/// Balance service for per-account trends
pub struct BalanceService {
    repository: Arc<DuckDbRepository>,
}

impl BalanceService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Every account of the user visible in the window, with its daily
    /// balance series and trend, ordered by name
    ///
    /// A missing end defaults to tomorrow, a missing start to one year
    /// before the end.
    pub fn get_accounts_trend(
        &self,
        user_id: Uuid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<AccountWithTrend>> {
        self.get_accounts_trend_at(user_id, start, end, Utc::now().date_naive())
    }

    /// Same as [`BalanceService::get_accounts_trend`] with an explicit "today"
    pub fn get_accounts_trend_at(
        &self,
        user_id: Uuid,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Vec<AccountWithTrend>> {
        let window = TrendWindow::resolve(start, end, today)?;
        let accounts = self.repository.get_accounts(user_id)?;
        let ledger = self.repository.get_ledger(user_id, window.end)?;

        let mut trends: Vec<AccountWithTrend> = accounts
            .iter()
            .filter_map(|account| reconstruct(account, &ledger, window))
            .collect();
        trends.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        tracing::debug!(
            accounts = trends.len(),
            start = %window.start,
            end = %window.end,
            "balance trends computed"
        );
        Ok(trends)
    }
}

/// Reconstruct one account's balance over the window
///
/// `ledger` may hold other accounts' transactions; only legs touching this
/// account count. Returns `None` when the account is not visible in the
/// window.
pub fn reconstruct(
    account: &Account,
    ledger: &[Transaction],
    window: TrendWindow,
) -> Option<AccountWithTrend> {
    if let Some(deleted_at) = account.deleted_at {
        if deleted_at.date_naive() < window.start {
            return None;
        }
    }

    let created = account.created_at.date_naive();
    let series_start = if account.is_external {
        window.start
    } else {
        if created > window.end {
            return None;
        }
        created.max(window.start)
    };

    let mut before = Decimal::ZERO;
    let mut daily: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for tx in ledger {
        let Some(amount) = tx.signed_amount_for(account.id) else {
            continue;
        };
        if tx.transaction_date < window.start {
            before += amount;
        } else if window.contains(tx.transaction_date) {
            *daily.entry(tx.transaction_date).or_default() += amount;
        }
    }
    let in_window: Decimal = daily.values().copied().sum();

    let (opening, closing) = if account.is_external {
        (account.balance - in_window, account.balance)
    } else {
        (before, before + in_window)
    };

    let mut running = opening;
    let mut changes = daily.into_iter().peekable();
    let mut series = Vec::new();
    for date in window.start.iter_days().take_while(|d| window.contains(*d)) {
        while let Some((_, amount)) = changes.next_if(|(day, _)| *day <= date) {
            running += amount;
        }
        if date >= series_start {
            series.push(BalancePoint {
                date,
                balance: running,
            });
        }
    }

    Some(AccountWithTrend {
        id: account.id,
        name: account.name.clone(),
        account_type: account.account_type,
        currency: account.currency.clone(),
        color: account.color.clone(),
        meta: account.meta.clone(),
        updated_at: account.updated_at,
        balance: closing,
        trend: trend_percent(opening, closing),
        balance_timeseries: series,
        is_external: account.is_external,
    })
}

/// Percentage change from opening to closing
///
/// A zero opening gives 0 when closing is also zero, otherwise plus or minus
/// 100 following the sign of closing.
pub fn trend_percent(opening: Decimal, closing: Decimal) -> Decimal {
    if opening.is_zero() {
        return if closing.is_zero() {
            Decimal::ZERO
        } else if closing.is_sign_positive() {
            Decimal::ONE_HUNDRED
        } else {
            -Decimal::ONE_HUNDRED
        };
    }
    (closing - opening) / opening.abs() * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountType;
    use chrono::{DateTime, TimeZone};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        Utc.from_utc_datetime(&date(s).and_hms_opt(12, 0, 0).unwrap())
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn window(start: &str, end: &str) -> TrendWindow {
        TrendWindow {
            start: date(start),
            end: date(end),
        }
    }

    fn internal(created: &str) -> Account {
        let mut account = Account::new_internal(Uuid::new_v4(), "Wallet", AccountType::Cash, "USD");
        account.created_at = at(created);
        account
    }

    fn external(balance: &str, created: &str) -> Account {
        let mut account = internal(created);
        account.is_external = true;
        account.provider_account_id = Some("acc_1".to_string());
        account.balance = dec(balance);
        account
    }

    fn tx(account: &Account, amount: &str, on: &str) -> Transaction {
        Transaction::new(account.user_id, account.id, dec(amount), "USD", date(on))
    }

    #[test]
    fn test_internal_account_from_empty_history() {
        let account = internal("2024-12-01");
        let ledger = vec![
            tx(&account, "1000", "2025-01-01"),
            tx(&account, "-200", "2025-01-06"),
        ];

        let trend = reconstruct(&account, &ledger, window("2025-01-01", "2025-01-10")).unwrap();
        assert_eq!(trend.balance, dec("800"));
        assert_eq!(trend.trend, dec("100"));
        assert_eq!(trend.balance_timeseries.len(), 10);
        assert_eq!(trend.balance_timeseries[0].balance, dec("1000"));
        assert_eq!(trend.balance_timeseries[4].balance, dec("1000"));
        assert_eq!(trend.balance_timeseries[5].balance, dec("800"));
        assert_eq!(trend.balance_timeseries[9].balance, dec("800"));
    }

    #[test]
    fn test_external_account_works_backwards() {
        let account = external("500", "2025-01-01");
        let ledger = vec![tx(&account, "-50", "2025-01-05")];

        let trend = reconstruct(&account, &ledger, window("2025-01-01", "2025-01-10")).unwrap();
        assert_eq!(trend.balance, dec("500"));
        assert_eq!(trend.balance_timeseries[0].balance, dec("550"));
        assert_eq!(trend.balance_timeseries[3].balance, dec("550"));
        assert_eq!(trend.balance_timeseries[4].balance, dec("500"));
        assert_eq!(trend.trend.round_dp(2), dec("-9.09"));
    }

    #[test]
    fn test_internal_account_without_activity_is_flat() {
        let account = internal("2024-01-01");
        let ledger = vec![tx(&account, "250", "2024-06-01")];

        let trend = reconstruct(&account, &ledger, window("2025-01-01", "2025-01-31")).unwrap();
        assert_eq!(trend.balance, dec("250"));
        assert_eq!(trend.trend, Decimal::ZERO);
        assert!(trend.balance_timeseries.iter().all(|p| p.balance == dec("250")));
    }

    #[test]
    fn test_external_account_without_transactions_is_flat() {
        let account = external("1234.56", "2025-01-20");

        let trend = reconstruct(&account, &[], window("2025-01-01", "2025-01-31")).unwrap();
        assert_eq!(trend.balance_timeseries.len(), 31);
        assert!(trend
            .balance_timeseries
            .iter()
            .all(|p| p.balance == dec("1234.56")));
        assert_eq!(trend.trend, Decimal::ZERO);
    }

    #[test]
    fn test_single_day_window_for_external_account() {
        let account = external("300", "2025-01-01");
        let ledger = vec![tx(&account, "75", "2025-02-01")];

        let trend = reconstruct(&account, &ledger, window("2025-02-01", "2025-02-01")).unwrap();
        assert_eq!(trend.balance_timeseries.len(), 1);
        assert_eq!(trend.balance, dec("300"));
        assert_eq!(trend.balance_timeseries[0].balance, dec("300"));
    }

    #[test]
    fn test_internal_series_starts_at_creation() {
        let account = internal("2025-01-05");

        let trend = reconstruct(&account, &[], window("2025-01-01", "2025-01-10")).unwrap();
        assert_eq!(trend.balance_timeseries.len(), 6);
        assert_eq!(trend.balance_timeseries[0].date, date("2025-01-05"));

        let later = internal("2025-02-01");
        assert!(reconstruct(&later, &[], window("2025-01-01", "2025-01-10")).is_none());
    }

    #[test]
    fn test_account_deleted_before_window_is_hidden() {
        let mut account = internal("2024-01-01");
        account.deleted_at = Some(at("2024-12-31"));
        assert!(reconstruct(&account, &[], window("2025-01-01", "2025-01-10")).is_none());

        account.deleted_at = Some(at("2025-01-03"));
        assert!(reconstruct(&account, &[], window("2025-01-01", "2025-01-10")).is_some());
    }

    #[test]
    fn test_transfer_legs_move_between_accounts() {
        let checking = internal("2024-01-01");
        let mut savings = internal("2024-01-01");
        savings.user_id = checking.user_id;
        let ledger = vec![
            tx(&checking, "1000", "2024-12-01"),
            Transaction::transfer(
                checking.user_id,
                checking.id,
                savings.id,
                dec("400"),
                "USD",
                date("2025-01-02"),
            ),
        ];
        let w = window("2025-01-01", "2025-01-10");

        let from = reconstruct(&checking, &ledger, w).unwrap();
        let to = reconstruct(&savings, &ledger, w).unwrap();
        assert_eq!(from.balance, dec("600"));
        assert_eq!(to.balance, dec("400"));
        assert_eq!(to.trend, dec("100"));
    }

    #[test]
    fn test_trend_with_zero_opening() {
        assert_eq!(trend_percent(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
        assert_eq!(trend_percent(Decimal::ZERO, dec("50")), dec("100"));
        assert_eq!(trend_percent(Decimal::ZERO, dec("-50")), dec("-100"));
        assert_eq!(trend_percent(dec("-200"), dec("-100")), dec("50"));
    }

    #[test]
    fn test_service_orders_by_name_and_defaults_window() {
        let repository = Arc::new(DuckDbRepository::in_memory().unwrap());
        let user = Uuid::new_v4();

        let mut zed = Account::new_internal(user, "Zed", AccountType::Cash, "USD");
        zed.created_at = at("2024-01-01");
        let mut alpha = Account::new_internal(user, "Alpha", AccountType::Cash, "USD");
        alpha.created_at = at("2024-01-01");
        repository.insert_account(&zed).unwrap();
        repository.insert_account(&alpha).unwrap();
        repository
            .insert_transaction(&Transaction::new(user, alpha.id, dec("10.50"), "USD", date("2025-06-01")))
            .unwrap();

        let service = BalanceService::new(repository);
        let trends = service
            .get_accounts_trend_at(user, None, None, date("2025-06-15"))
            .unwrap();

        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].name, "Alpha");
        assert_eq!(trends[0].balance, dec("10.50"));
        assert_eq!(trends[0].balance_timeseries.last().unwrap().date, date("2025-06-16"));
        assert_eq!(trends[1].name, "Zed");
    }
}
