use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar, optionally carrying the stock-to-flow model price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time, epoch milliseconds
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub stf: Option<f64>,
}

impl Bar {
    pub fn datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp as i64)
            .single()
            .unwrap_or_default()
    }

    pub fn date(&self) -> NaiveDate {
        self.datetime().date_naive()
    }
}
