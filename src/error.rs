//! Error types for the backtester.

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for the backtester.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No data loaded")]
    NoData,

    #[error("Asset basket is empty")]
    EmptyBasket,

    #[error("Duplicate asset in basket: {0}")]
    DuplicateAsset(String),

    #[error("Dates are not strictly increasing at row {row}: {previous} followed by {current}")]
    NonMonotonicDates {
        row: usize,
        previous: NaiveDate,
        current: NaiveDate,
    },

    #[error("Asset mismatch at row {row}: expected {expected} prices, found {found}")]
    AssetMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Non-positive price for {asset} on {date}: {price}")]
    NonPositivePrice {
        asset: String,
        date: NaiveDate,
        price: f64,
    },

    #[error("Calendar has {days} days, more than the configured limit of {limit}")]
    CalendarTooLong { days: usize, limit: usize },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_input_messages() {
        let err = BacktestError::NonPositivePrice {
            asset: "GLD".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            price: -1.0,
        };
        assert_eq!(err.to_string(), "Non-positive price for GLD on 2024-03-01: -1");

        let err = BacktestError::AssetMismatch {
            row: 4,
            expected: 3,
            found: 2,
        };
        assert!(err.to_string().contains("expected 3 prices, found 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        fn open_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/definitely/not/here.csv")?)
        }
        assert!(matches!(open_missing(), Err(BacktestError::IoError(_))));
    }
}
