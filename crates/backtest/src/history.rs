//! Historical price store.
//!
//! Records arrive as `{timestamp, price, market_id}` with an optional
//! `liquidity`, either as a JSON array or as CSV with a header row.
//! Timestamps may be RFC 3339 or naive ISO-8601 (read as UTC). Rows that
//! cannot be parsed are counted in [`PriceHistoryStore::rejected_records`]
//! and dropped; range checks on prices are left to the engine.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// One observation of a market's YES price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub liquidity: Option<Decimal>,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV history: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed JSON history: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    timestamp: String,
    price: serde_json::Number,
    market_id: String,
    #[serde(default)]
    liquidity: Option<serde_json::Number>,
}

#[derive(Debug, Deserialize)]
struct CsvRecord {
    timestamp: String,
    price: String,
    market_id: String,
    #[serde(default)]
    liquidity: Option<String>,
}

/// Price series per market, owned by the caller of the backtest.
///
/// Markets iterate in key order; each series keeps insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceHistoryStore {
    series: BTreeMap<String, Vec<PricePoint>>,
    rejected_records: usize,
}

impl PriceHistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, market_id: impl Into<String>, point: PricePoint) {
        self.series.entry(market_id.into()).or_default().push(point);
    }

    /// Appends a series to a market.
    pub fn extend(&mut self, market_id: impl Into<String>, points: impl IntoIterator<Item = PricePoint>) {
        self.series.entry(market_id.into()).or_default().extend(points);
    }

    pub fn markets(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Points of one market, empty for an unknown market.
    #[must_use]
    pub fn series(&self, market_id: &str) -> &[PricePoint] {
        self.series.get(market_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PricePoint])> {
        self.series
            .iter()
            .map(|(market_id, points)| (market_id.as_str(), points.as_slice()))
    }

    #[must_use]
    pub fn market_count(&self) -> usize {
        self.series.len()
    }

    /// Total number of points across all markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.values().all(Vec::is_empty)
    }

    /// Records dropped while reading because they could not be parsed.
    #[must_use]
    pub fn rejected_records(&self) -> usize {
        self.rejected_records
    }

    /// Reads a JSON array of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a JSON array. Individual
    /// malformed records are counted, not returned as errors.
    pub fn from_json_str(json: &str) -> Result<Self, HistoryError> {
        let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
        Ok(Self::from_json_records(values))
    }

    /// Same as [`from_json_str`](Self::from_json_str) for any reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be read or is not a JSON array.
    pub fn from_json_reader(reader: impl Read) -> Result<Self, HistoryError> {
        let values: Vec<serde_json::Value> = serde_json::from_reader(reader)?;
        Ok(Self::from_json_records(values))
    }

    /// Builds a store from already-parsed JSON records.
    #[must_use]
    pub fn from_json_records(values: Vec<serde_json::Value>) -> Self {
        let mut store = Self::new();
        for value in values {
            let accepted = match serde_json::from_value::<JsonRecord>(value) {
                Ok(record) => store.push_raw(
                    &record.market_id,
                    &record.timestamp,
                    &record.price.to_string(),
                    record.liquidity.map(|l| l.to_string()).as_deref(),
                ),
                Err(err) => {
                    debug!(%err, "skipping malformed JSON record");
                    false
                }
            };
            if !accepted {
                store.rejected_records += 1;
            }
        }
        store.log_loaded("json");
        store
    }

    /// Reads CSV with a `timestamp,price,market_id[,liquidity]` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read. Individual malformed
    /// rows are counted, not returned as errors.
    pub fn from_csv_reader(reader: impl Read) -> Result<Self, HistoryError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        reader.headers()?;

        let mut store = Self::new();
        for row in reader.deserialize::<CsvRecord>() {
            let accepted = match row {
                Ok(record) => store.push_raw(
                    &record.market_id,
                    &record.timestamp,
                    &record.price,
                    record.liquidity.as_deref(),
                ),
                Err(err) => {
                    debug!(%err, "skipping malformed CSV row");
                    false
                }
            };
            if !accepted {
                store.rejected_records += 1;
            }
        }
        store.log_loaded("csv");
        Ok(store)
    }

    /// Opens and reads a CSV file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or has no header.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let file = File::open(path)?;
        Self::from_csv_reader(file)
    }

    fn push_raw(
        &mut self,
        market_id: &str,
        timestamp: &str,
        price: &str,
        liquidity: Option<&str>,
    ) -> bool {
        let market_id = market_id.trim();
        if market_id.is_empty() {
            return false;
        }
        let (Some(timestamp), Some(price)) = (parse_timestamp(timestamp), parse_decimal(price)) else {
            debug!(market_id, timestamp, price, "skipping unparseable record");
            return false;
        };
        let liquidity = match liquidity.map(str::trim).filter(|l| !l.is_empty()) {
            Some(raw) => match parse_decimal(raw) {
                Some(value) => Some(value),
                None => return false,
            },
            None => None,
        };

        self.push(
            market_id,
            PricePoint {
                timestamp,
                price,
                liquidity,
            },
        );
        true
    }

    fn log_loaded(&self, source: &str) {
        info!(
            source,
            markets = self.market_count(),
            points = self.len(),
            rejected = self.rejected_records,
            "price history loaded"
        );
    }
}

/// Parses an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC.
///
/// A bare date reads as midnight UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    // ===== Timestamps =====

    #[test]
    fn parses_rfc3339_and_naive_timestamps() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 15, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-15T14:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-15T09:30:00-05:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-15T14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-15 14:30:00.000"), Some(expected));
        assert_eq!(parse_timestamp("15/01/2026"), None);
    }

    #[test]
    fn date_only_timestamp_is_midnight_utc() {
        let midnight = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-15"), Some(midnight));
        assert_eq!(parse_timestamp(" 2026-01-15 "), Some(midnight));
        assert_eq!(parse_timestamp("2026-13-15"), None);
    }

    // ===== JSON =====

    #[test]
    fn json_records_group_by_market() {
        let json = r#"[
            {"timestamp": "2026-01-15T14:30:00Z", "price": 0.55, "market_id": "FED-DEC"},
            {"timestamp": "2026-01-15T14:31:00Z", "price": 0.57, "market_id": "FED-DEC", "liquidity": 1200.5},
            {"timestamp": "2026-01-15T14:30:00Z", "price": 0.20, "market_id": "CPI-JAN"}
        ]"#;
        let store = PriceHistoryStore::from_json_str(json).unwrap();

        assert_eq!(store.market_count(), 2);
        assert_eq!(store.len(), 3);
        assert_eq!(store.markets().collect::<Vec<_>>(), vec!["CPI-JAN", "FED-DEC"]);

        let fed = store.series("FED-DEC");
        assert_eq!(fed[0].price, dec!(0.55));
        assert_eq!(fed[1].liquidity, Some(dec!(1200.5)));
        assert_eq!(store.rejected_records(), 0);
    }

    #[test]
    fn malformed_json_records_are_counted() {
        let json = r#"[
            {"timestamp": "2026-01-15T14:30:00Z", "price": 0.55, "market_id": "FED-DEC"},
            {"timestamp": "not a time", "price": 0.55, "market_id": "FED-DEC"},
            {"timestamp": "2026-01-15T14:31:00Z", "price": "high", "market_id": "FED-DEC"},
            {"timestamp": "2026-01-15T14:32:00Z", "price": 0.55, "market_id": ""},
            {"price": 0.55}
        ]"#;
        let store = PriceHistoryStore::from_json_str(json).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.rejected_records(), 4);
    }

    #[test]
    fn non_array_json_is_an_error() {
        assert!(matches!(
            PriceHistoryStore::from_json_str(r#"{"FED-DEC": []}"#),
            Err(HistoryError::Json(_))
        ));
    }

    // ===== CSV =====

    #[test]
    fn csv_rows_with_optional_liquidity() {
        let csv = "timestamp,price,market_id,liquidity\n\
                   2026-01-15T14:30:00Z,0.55,FED-DEC,900\n\
                   2026-01-15 14:31:00,0.61,FED-DEC,\n\
                   2026-01-15T14:32:00Z,oops,FED-DEC,900\n";
        let store = PriceHistoryStore::from_csv_reader(csv.as_bytes()).unwrap();

        let fed = store.series("FED-DEC");
        assert_eq!(fed.len(), 2);
        assert_eq!(fed[0].liquidity, Some(dec!(900)));
        assert_eq!(fed[1].liquidity, None);
        assert_eq!(fed[1].price, dec!(0.61));
        assert_eq!(store.rejected_records(), 1);
    }

    #[test]
    fn csv_without_liquidity_column() {
        let csv = "timestamp,price,market_id\n2026-01-15T14:30:00Z,0.55,FED-DEC\n";
        let store = PriceHistoryStore::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(store.series("FED-DEC")[0].liquidity, None);
    }

    #[test]
    fn unknown_market_has_empty_series() {
        let store = PriceHistoryStore::new();
        assert!(store.series("NOPE").is_empty());
        assert!(store.is_empty());
    }
}
