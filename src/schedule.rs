//! Rebalance calendars.
//!
//! A schedule is the ordered set of calendar positions on which a strategy
//! may recompute its target weights. Month-ends are derived from the price
//! calendar itself, so every scheduled date is a trading date.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How often a strategy rebalances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// Every month-end.
    Monthly,
    /// Every third month-end, starting from the first.
    Quarterly,
}

impl Cadence {
    /// Keep one month-end out of this many.
    fn stride(self) -> usize {
        match self {
            Cadence::Monthly => 1,
            Cadence::Quarterly => 3,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Monthly => write!(f, "monthly"),
            Cadence::Quarterly => write!(f, "quarterly"),
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" | "m" => Ok(Cadence::Monthly),
            "quarterly" | "q" => Ok(Cadence::Quarterly),
            other => Err(format!("Unknown cadence: {}", other)),
        }
    }
}

/// Which date represents the end of a month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonthEndRule {
    /// The last trading date of each month present in the calendar.
    #[default]
    LastTradingDay,
    /// The calendar month's last day, kept only if it is itself a trading
    /// date. Every month between the first and last calendar month gets a
    /// label, and cadence striding happens before the trading-date filter.
    CalendarMonthEnd,
}

/// Ordered rebalance positions into a price calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceSchedule {
    indices: Vec<usize>,
    dates: Vec<NaiveDate>,
}

impl RebalanceSchedule {
    /// A schedule that never fires (buy-and-hold).
    pub fn empty() -> Self {
        Self::default()
    }

    fn from_indices(calendar: &[NaiveDate], indices: Vec<usize>) -> Self {
        let dates = indices.iter().map(|&i| calendar[i]).collect();
        Self { indices, dates }
    }

    /// Whether the calendar position is a rebalance date.
    pub fn contains(&self, index: usize) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Schedule with the default month-end rule.
pub fn schedule(calendar: &[NaiveDate], cadence: Cadence) -> RebalanceSchedule {
    schedule_with_rule(calendar, cadence, MonthEndRule::default())
}

/// Compute the rebalance schedule for a strictly increasing calendar.
pub fn schedule_with_rule(
    calendar: &[NaiveDate],
    cadence: Cadence,
    rule: MonthEndRule,
) -> RebalanceSchedule {
    let indices = match rule {
        MonthEndRule::LastTradingDay => last_trading_days(calendar)
            .into_iter()
            .step_by(cadence.stride())
            .collect(),
        MonthEndRule::CalendarMonthEnd => calendar_month_ends(calendar)
            .into_iter()
            .step_by(cadence.stride())
            .filter_map(|label| calendar.binary_search(&label).ok())
            .collect(),
    };
    RebalanceSchedule::from_indices(calendar, indices)
}

/// Position of the last date of each (year, month) run in the calendar.
pub fn last_trading_days(calendar: &[NaiveDate]) -> Vec<usize> {
    let month = |d: &NaiveDate| (d.year(), d.month());
    let mut ends = Vec::new();
    for i in 0..calendar.len() {
        let is_last = calendar
            .get(i + 1)
            .map_or(true, |next| month(next) != month(&calendar[i]));
        if is_last {
            ends.push(i);
        }
    }
    ends
}

/// Last calendar day of every month spanned by the calendar, traded or not.
fn calendar_month_ends(calendar: &[NaiveDate]) -> Vec<NaiveDate> {
    let (Some(first), Some(last)) = (calendar.first(), calendar.last()) else {
        return Vec::new();
    };

    let mut labels = Vec::new();
    let (mut year, mut month) = (first.year(), first.month());
    while (year, month) <= (last.year(), last.month()) {
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        if let Some(end) =
            NaiveDate::from_ymd_opt(next_year, next_month, 1).and_then(|d| d.pred_opt())
        {
            labels.push(end);
        }
        year = next_year;
        month = next_month;
    }
    labels
}
