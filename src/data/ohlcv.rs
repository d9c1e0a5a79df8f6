//! CSV parsing for OHLCV and stock-to-flow series

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::data::types::Bar;
use crate::util::parse_vendor_timestamp;

pub const OHLCV_FIELDS: &str = "timestamp,open,high,low,close,volume";

fn parse_f64(raw: &str, column: &str, line: usize) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("Invalid {} value '{}' on line {}", column, raw, line))
}

/// Parse concatenated `raw_csv` OHLCV chunks.
///
/// Every chunk may repeat the header row and may end with blank lines; both
/// are skipped. Rows are returned sorted by timestamp with duplicates removed.
pub fn parse_ohlcv_csv(text: &str) -> Result<Vec<Bar>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut bars: BTreeMap<u64, Bar> = BTreeMap::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.context("Failed to read OHLCV row")?;
        let line = idx + 1;
        let first = record.get(0).unwrap_or_default();
        if first.is_empty() || first.eq_ignore_ascii_case("timestamp") {
            continue;
        }
        if record.len() < 6 {
            anyhow::bail!("Expected 6 OHLCV columns on line {}, got {}", line, record.len());
        }

        let timestamp = parse_vendor_timestamp(first)
            .with_context(|| format!("Invalid timestamp '{}' on line {}", first, line))?;
        let bar = Bar {
            timestamp: timestamp.timestamp_millis().max(0) as u64,
            open: parse_f64(&record[1], "open", line)?,
            high: parse_f64(&record[2], "high", line)?,
            low: parse_f64(&record[3], "low", line)?,
            close: parse_f64(&record[4], "close", line)?,
            volume: parse_f64(&record[5], "volume", line)?,
            stf: None,
        };
        bars.insert(bar.timestamp, bar);
    }

    Ok(bars.into_values().collect())
}

/// Parse a stock-to-flow CSV and return `column` keyed by calendar day
pub fn parse_stf_csv(text: &str, column: &str) -> Result<BTreeMap<NaiveDate, f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().context("Stock-to-flow CSV has no header")?.clone();
    let ts_idx = headers
        .iter()
        .position(|h| h == "timestamp")
        .context("Stock-to-flow CSV has no timestamp column")?;
    let value_idx = headers
        .iter()
        .position(|h| h == column)
        .with_context(|| format!("Stock-to-flow CSV has no '{}' column", column))?;

    let mut series = BTreeMap::new();
    for record in reader.records() {
        let record = record.context("Failed to read stock-to-flow row")?;
        let (Some(ts), Some(value)) = (record.get(ts_idx), record.get(value_idx)) else {
            continue;
        };
        let Some(ts) = parse_vendor_timestamp(ts) else {
            continue;
        };
        // Missing model values are left out rather than treated as zero
        if let Ok(value) = value.parse::<f64>() {
            series.insert(ts.date_naive(), value);
        }
    }
    Ok(series)
}

/// Attach stock-to-flow values to bars of the same calendar day
pub fn join_stf(bars: &mut [Bar], stf: &BTreeMap<NaiveDate, f64>) -> usize {
    let lookup: HashMap<&NaiveDate, &f64> = stf.iter().collect();
    let mut matched = 0;
    for bar in bars.iter_mut() {
        bar.stf = lookup.get(&bar.date()).map(|v| **v);
        if bar.stf.is_some() {
            matched += 1;
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    const OHLCV: &str = "timestamp,open,high,low,close,volume
2020-01-02T00:00:00.000Z,7200,7250,6900,6950,1000

timestamp,open,high,low,close,volume
2020-01-01T00:00:00.000Z,7000,7300,6950,7200,1200
2020-01-02T00:00:00.000Z,7200,7250,6900,6950,1000
";

    #[test]
    fn test_parse_ohlcv_skips_repeated_headers() {
        let bars = parse_ohlcv_csv(OHLCV).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[0].close, 7200.0);
        assert_eq!(bars[1].low, 6900.0);
    }

    #[test]
    fn test_parse_ohlcv_bad_number() {
        let err = parse_ohlcv_csv("2020-01-01,1,2,x,4,5\n").unwrap_err();
        assert!(err.to_string().contains("low"));
    }

    #[test]
    fn test_stf_join() {
        let stf_csv = "timestamp,price,ratio\n2020-01-01,55000.5,50\n2020-01-03,,51\n";
        let stf = parse_stf_csv(stf_csv, "price").unwrap();
        assert_eq!(stf.len(), 1);

        let mut bars = parse_ohlcv_csv(OHLCV).unwrap();
        let matched = join_stf(&mut bars, &stf);
        assert_eq!(matched, 1);
        assert_eq!(bars[0].stf, Some(55000.5));
        assert_eq!(bars[1].stf, None);
    }

    #[test]
    fn test_stf_missing_column() {
        assert!(parse_stf_csv("timestamp,price\n", "stockToFlow_price").is_err());
    }
}
