//! Price data loading, alignment and the validated price/return feed.

use crate::error::{BacktestError, Result};
use crate::types::AssetBasket;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Weekday};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Aligned daily close prices for a fixed basket, with derived simple returns.
///
/// Construction validates the table: dates strictly increasing, one positive
/// finite price per asset per row. Returns are computed once; row 0 of the
/// return matrix is all zeros and only seeds the equity curve.
#[derive(Debug, Clone)]
pub struct PriceTable {
    basket: AssetBasket,
    dates: Vec<NaiveDate>,
    prices: Vec<Vec<f64>>,
    returns: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Build a validated price table. Malformed input is rejected, never repaired.
    pub fn new(basket: AssetBasket, dates: Vec<NaiveDate>, prices: Vec<Vec<f64>>) -> Result<Self> {
        if dates.is_empty() {
            return Err(BacktestError::NoData);
        }
        if dates.len() != prices.len() {
            return Err(BacktestError::InvalidInput(format!(
                "{} dates but {} price rows",
                dates.len(),
                prices.len()
            )));
        }

        for (row, window) in dates.windows(2).enumerate() {
            if window[1] <= window[0] {
                return Err(BacktestError::NonMonotonicDates {
                    row: row + 1,
                    previous: window[0],
                    current: window[1],
                });
            }
        }

        for (row, (date, values)) in dates.iter().zip(&prices).enumerate() {
            if values.len() != basket.len() {
                return Err(BacktestError::AssetMismatch {
                    row,
                    expected: basket.len(),
                    found: values.len(),
                });
            }
            for (asset, &price) in basket.iter().zip(values) {
                if !price.is_finite() || price <= 0.0 {
                    return Err(BacktestError::NonPositivePrice {
                        asset: asset.to_string(),
                        date: *date,
                        price,
                    });
                }
            }
        }

        let returns = simple_returns(&prices);
        Ok(Self {
            basket,
            dates,
            prices,
            returns,
        })
    }

    /// Build a table around a pre-computed return matrix, skipping validation.
    #[cfg(test)]
    pub(crate) fn from_parts_unchecked(
        basket: AssetBasket,
        dates: Vec<NaiveDate>,
        prices: Vec<Vec<f64>>,
        returns: Vec<Vec<f64>>,
    ) -> Self {
        Self {
            basket,
            dates,
            prices,
            returns,
        }
    }

    pub fn basket(&self) -> &AssetBasket {
        &self.basket
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of trading days.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn prices(&self) -> &[Vec<f64>] {
        &self.prices
    }

    pub fn returns(&self) -> &[Vec<f64>] {
        &self.returns
    }

    pub fn first_date(&self) -> NaiveDate {
        self.dates[0]
    }

    pub fn last_date(&self) -> NaiveDate {
        self.dates[self.dates.len() - 1]
    }

    /// Close prices of one asset over the whole calendar.
    pub fn column(&self, asset: usize) -> Vec<f64> {
        self.prices.iter().map(|row| row[asset]).collect()
    }

    /// Restrict the table to an inclusive date range.
    pub fn between(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        let keep: Vec<usize> = self
            .dates
            .iter()
            .enumerate()
            .filter(|(_, d)| start.map_or(true, |s| **d >= s) && end.map_or(true, |e| **d <= e))
            .map(|(i, _)| i)
            .collect();

        let dates = keep.iter().map(|&i| self.dates[i]).collect();
        let prices = keep.iter().map(|&i| self.prices[i].clone()).collect();
        Self::new(self.basket.clone(), dates, prices)
    }
}

/// Simple returns with a zero seed row.
fn simple_returns(prices: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut returns = Vec::with_capacity(prices.len());
    if let Some(first) = prices.first() {
        returns.push(vec![0.0; first.len()]);
    }
    for window in prices.windows(2) {
        returns.push(
            window[1]
                .iter()
                .zip(&window[0])
                .map(|(today, yesterday)| today / yesterday - 1.0)
                .collect(),
        );
    }
    returns
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d").
    pub date_format: Option<String>,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Drop rows with missing or unparseable values instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            delimiter: None,
            skip_invalid: true,
        }
    }
}

/// Detect the CSV delimiter from the first few lines of the file.
///
/// Picks the candidate giving a consistent column count of at least two
/// (a date plus one price).
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let delimiters = [b',', b'\t', b';', b'|'];
    let mut best_delimiter = b',';
    let mut best_score = 0;

    for &delim in &delimiters {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();

        let first_count = counts[0];
        let all_consistent = counts.iter().all(|&c| c == first_count);
        if all_consistent && first_count >= 2 && first_count > best_score {
            best_score = first_count;
            best_delimiter = delim;
        }
    }

    debug!(
        "Detected delimiter {:?} with {} fields",
        best_delimiter as char, best_score
    );
    Ok(best_delimiter)
}

/// Parse a date string with multiple format attempts.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%b-%Y",
        "%d %b %Y",
        "%b %d, %Y",
    ];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    // Unix timestamps in seconds or milliseconds.
    if let Ok(ts) = s.parse::<i64>() {
        let secs = if ts.abs() > 100_000_000_000 { ts / 1000 } else { ts };
        if let Some(dt) = DateTime::from_timestamp(secs, 0) {
            return Ok(dt.date_naive());
        }
    }

    Err(BacktestError::DataError(format!(
        "Could not parse date: '{}'",
        s
    )))
}

fn resolve_delimiter(path: &Path, config: &DataConfig) -> Result<u8> {
    match config.delimiter {
        Some(d) => Ok(d),
        None => detect_delimiter(path),
    }
}

/// Load a wide price table: a date column followed by one close column per asset.
///
/// Rows with a missing or unparseable value are dropped when
/// `skip_invalid` is set. Row order must already be chronological.
pub fn load_wide_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<PriceTable> {
    let path = path.as_ref();
    info!("Loading price table from: {}", path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(resolve_delimiter(path, config)?)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(BacktestError::DataError(
            "price table needs a date column and at least one asset column".to_string(),
        ));
    }
    let basket = AssetBasket::new(headers.iter().skip(1).map(|h| h.trim().to_string()))?;

    let mut dates = Vec::new();
    let mut prices = Vec::new();
    let mut skipped = 0;

    for (row_num, record) in reader.records().enumerate() {
        let record = record?;
        let parsed = parse_wide_row(&record, basket.len(), config);
        match parsed {
            Ok((date, row)) => {
                dates.push(date);
                prices.push(row);
            }
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} incomplete rows", skipped);
    }

    let table = PriceTable::new(basket, dates, prices)?;
    info!(
        "Loaded {} rows for {} from {} to {}",
        table.len(),
        table.basket(),
        table.first_date(),
        table.last_date()
    );
    Ok(table)
}

fn parse_wide_row(
    record: &csv::StringRecord,
    assets: usize,
    config: &DataConfig,
) -> Result<(NaiveDate, Vec<f64>)> {
    let date_field = record
        .get(0)
        .ok_or_else(|| BacktestError::DataError("empty row".to_string()))?;
    let date = parse_date(date_field, config.date_format.as_deref())?;

    let mut row = Vec::with_capacity(assets);
    for col in 1..=assets {
        let cell = record.get(col).map(str::trim).unwrap_or("");
        if cell.is_empty() {
            return Err(BacktestError::DataError(format!(
                "missing value in column {} on {}",
                col, date
            )));
        }
        let value: f64 = cell.parse().map_err(|_| {
            BacktestError::DataError(format!("invalid price '{}' on {}", cell, date))
        })?;
        row.push(value);
    }
    Ok((date, row))
}

/// Raw single-asset CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CloseRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Close", alias = "Adj Close", alias = "adj_close", alias = "c")]
    close: f64,
}

/// Load one asset's (date, close) history, sorted by date and deduplicated.
pub fn load_close_series(
    path: impl AsRef<Path>,
    config: &DataConfig,
) -> Result<Vec<(NaiveDate, f64)>> {
    let path = path.as_ref();
    info!("Loading closes from: {}", path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(resolve_delimiter(path, config)?)
        .flexible(true)
        .from_path(path)?;

    let mut series = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize::<CloseRow>().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(BacktestError::CsvError(e)),
        };

        match parse_date(&row.date, config.date_format.as_deref()) {
            Ok(date) => series.push((date, row.close)),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {} due to date parse error: {}", row_num + 1, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    series.sort_by_key(|(d, _)| *d);
    let original_len = series.len();
    series.dedup_by_key(|(d, _)| *d);
    if series.len() < original_len {
        warn!("Removed {} duplicate dates", original_len - series.len());
    }

    if series.is_empty() {
        return Err(BacktestError::NoData);
    }
    Ok(series)
}

/// Mode for aligning several single-asset histories into one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignMode {
    /// Only dates present in every series.
    Inner,
    /// Dates present in every series, then reindexed onto the Monday-to-Friday
    /// calendar between the first and last of them with forward fill.
    #[default]
    BusinessDayForwardFill,
}

/// Monday-to-Friday dates in `[start, end]`.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// Align single-asset histories into a validated price table.
///
/// Series keep their given order as the basket order.
pub fn align_series(series: &[(&str, Vec<(NaiveDate, f64)>)], mode: AlignMode) -> Result<PriceTable> {
    if series.is_empty() {
        return Err(BacktestError::NoData);
    }
    let basket = AssetBasket::new(series.iter().map(|(name, _)| name.to_string()))?;

    let lookups: Vec<HashMap<NaiveDate, f64>> = series
        .iter()
        .map(|(_, points)| points.iter().copied().collect())
        .collect();

    // Inner join on the first series' dates.
    let mut common: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (date, _) in &series[0].1 {
        let row: Option<Vec<f64>> = lookups.iter().map(|m| m.get(date).copied()).collect();
        if let Some(row) = row {
            common.insert(*date, row);
        }
    }

    if common.is_empty() {
        return Err(BacktestError::DataError(
            "series share no common dates".to_string(),
        ));
    }
    debug!("{} dates common to all {} series", common.len(), series.len());

    let table = PriceTable::new(
        basket,
        common.keys().copied().collect(),
        common.into_values().collect(),
    )?;

    match mode {
        AlignMode::Inner => Ok(table),
        AlignMode::BusinessDayForwardFill => reindex_business_days(&table),
    }
}

/// Reindex a table onto the business-day calendar spanning it, forward-filling gaps.
///
/// Weekend rows are dropped; weekdays without a row take the previous row's prices.
pub fn reindex_business_days(table: &PriceTable) -> Result<PriceTable> {
    let calendar = business_days(table.first_date(), table.last_date());
    let by_date: HashMap<NaiveDate, &Vec<f64>> =
        table.dates().iter().copied().zip(table.prices()).collect();

    let mut dates = Vec::with_capacity(calendar.len());
    let mut prices = Vec::with_capacity(calendar.len());
    let mut last: Option<&Vec<f64>> = None;
    let mut filled = 0;

    for day in calendar {
        match by_date.get(&day) {
            Some(row) => last = Some(*row),
            None => filled += 1,
        }
        // Leading weekdays before the first weekday observation have nothing to fill from.
        if let Some(row) = last {
            dates.push(day);
            prices.push(row.clone());
        }
    }

    if filled > 0 {
        info!("Forward-filled {} business days", filled);
    }

    PriceTable::new(table.basket().clone(), dates, prices)
}
