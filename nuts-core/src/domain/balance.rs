//! Balance trend domain model

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::canonical::AccountType;
use super::result::{Error, Result};

/// End-of-day balance on one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancePoint {
    pub date: NaiveDate,
    pub balance: Decimal,
}

/// An account with its reconstructed balance history over a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountWithTrend {
    pub id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    pub color: Option<String>,
    pub meta: Option<JsonValue>,
    pub updated_at: DateTime<Utc>,
    /// Closing balance at the end of the window
    pub balance: Decimal,
    /// Percentage change from opening to closing
    pub trend: Decimal,
    pub balance_timeseries: Vec<BalancePoint>,
    pub is_external: bool,
}

/// Inclusive date window for trend queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TrendWindow {
    /// Build a window, filling gaps with the trailing-year default that ends
    /// tomorrow, so today's transactions are always inside it
    pub fn resolve(start: Option<NaiveDate>, end: Option<NaiveDate>, today: NaiveDate) -> Result<Self> {
        let end = end.unwrap_or(today + Duration::days(1));
        let start = match start {
            Some(s) => s,
            None => end
                .checked_sub_months(Months::new(12))
                .ok_or_else(|| Error::validation("window end is out of range"))?,
        };
        if start > end {
            return Err(Error::validation(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}
