//! Futures funding-rate and open-interest history

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::client::{fetch_with_retry, query, ApiClient, Query, RetryPolicy};
use crate::data::{date_windows, write_json_rows_csv, WindowStep};
use crate::util::{format_query_time, parse_vendor_timestamp};

pub const EXCHANGE_INFO_PATH: &str = "/market/futures/exchanges/information";

pub const FUNDING_WINDOW: WindowStep = WindowStep::Days(10);
pub const OPEN_INTEREST_WINDOW: WindowStep = WindowStep::Days(31);

/// Marker written for windows that could not be fetched
pub const NO_DATA: &str = "NO DATA";

fn info_query(exchange: Option<&str>, instrument: &str) -> Query {
    let mut params = query(&[
        ("instrument", instrument),
        ("includeDates", "true"),
        ("includeInactive", "true"),
        ("timeFormat", "hr"),
    ]);
    if let Some(exchange) = exchange {
        params.insert(0, ("exchange".to_string(), exchange.to_string()));
    }
    params
}

fn parse_start_date(raw: &Value) -> Option<NaiveDateTime> {
    raw.as_str()
        .and_then(parse_vendor_timestamp)
        .map(|dt| dt.naive_utc())
}

/// First funding-rate timestamp for `instrument` on `exchange`
pub async fn funding_rate_start(
    client: &ApiClient,
    exchange: &str,
    instrument: &str,
) -> Result<NaiveDateTime> {
    let payload = client
        .get_payload(EXCHANGE_INFO_PATH, &info_query(Some(exchange), instrument))
        .await
        .context("Failed to fetch start date for funding rate data")?;

    let raw = &payload["data"][exchange][instrument]["funding_rate"]["startDate"];
    parse_start_date(raw).with_context(|| {
        format!("No funding rate start date for {} on {}", instrument, exchange)
    })
}

/// Funding rates over one window, or a single `NO DATA` row once retries run out
pub async fn fetch_funding_window(
    client: &ApiClient,
    exchange: &str,
    instrument: &str,
    from: NaiveDateTime,
    to: NaiveDateTime,
    policy: RetryPolicy,
) -> Vec<Value> {
    let path = format!("/market/futures/funding-rates/{}/historical", instrument);
    let start_date = from.format("%Y-%m-%d").to_string();
    let end_date = to.format("%Y-%m-%d").to_string();
    let params = query(&[
        ("exchange", exchange),
        ("startDate", start_date.as_str()),
        ("endDate", end_date.as_str()),
        ("timeInterval", "hours"),
        ("timeFormat", "hr"),
    ]);

    match fetch_with_retry(client, &path, &params, policy).await {
        Some(body) => body["payload"]["data"].as_array().cloned().unwrap_or_default(),
        None => {
            warn!(
                "Failed to fetch data for period {} to {} after {} retries",
                from, to, policy.max_retries
            );
            vec![json!({
                "timestamp": from.format("%Y-%m-%d %H:%M:%S").to_string(),
                "fundingRate": NO_DATA,
            })]
        }
    }
}

/// Full hourly funding-rate history, from the listing date until `end`
pub async fn fetch_funding_rates(
    client: &ApiClient,
    exchange: &str,
    instrument: &str,
    end: Option<NaiveDateTime>,
    policy: RetryPolicy,
) -> Result<Vec<Value>> {
    let start = funding_rate_start(client, exchange, instrument).await?;
    let end = end.unwrap_or_else(|| Utc::now().naive_utc());

    let mut rows = Vec::new();
    for (from, to) in date_windows(start, end, FUNDING_WINDOW) {
        info!("Fetching data from {} to {}", from, to);
        rows.extend(fetch_funding_window(client, exchange, instrument, from, to, policy).await);
    }
    Ok(rows)
}

pub fn funding_rates_file_name(exchange: &str, instrument: &str) -> String {
    format!("{}_{}_hourly.csv", instrument, exchange)
}

pub fn write_funding_rates(rows: &[Value], path: impl AsRef<Path>) -> Result<usize> {
    write_json_rows_csv(rows, path)
}

/// Oldest open-interest start date across every exchange listing `instrument`.
///
/// Falls back to `now` when no exchange reports one.
pub async fn oldest_open_interest_start(
    client: &ApiClient,
    instrument: &str,
    now: NaiveDateTime,
) -> Result<NaiveDateTime> {
    let payload = client
        .get_payload(EXCHANGE_INFO_PATH, &info_query(None, instrument))
        .await
        .context("Failed to fetch start date for open interest data")?;

    let oldest = payload["data"]
        .as_object()
        .into_iter()
        .flat_map(|exchanges| exchanges.values())
        .filter_map(|exchange| parse_start_date(&exchange[instrument]["open_interest"]["startDate"]))
        .fold(now, |oldest, start| oldest.min(start));
    Ok(oldest)
}

/// Hourly open interest over one window; failures are logged and yield nothing
pub async fn fetch_open_interest_window(
    client: &ApiClient,
    instrument: &str,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<Value> {
    let path = format!("/market/futures/open-interest/{}/historical", instrument);
    let start_date = format_query_time(&from);
    let end_date = format_query_time(&to);
    let params = query(&[
        ("startDate", start_date.as_str()),
        ("endDate", end_date.as_str()),
        ("timeInterval", "hours"),
        ("timeFormat", "hr"),
    ]);

    match client.get_payload(&path, &params).await {
        Ok(payload) => payload["data"].as_array().cloned().unwrap_or_default(),
        Err(e) => {
            warn!("Failed to fetch data for range {} to {}: {}", from, to, e);
            Vec::new()
        }
    }
}

pub async fn fetch_open_interest(
    client: &ApiClient,
    instrument: &str,
    end: Option<NaiveDateTime>,
) -> Result<Vec<Value>> {
    let end = end.unwrap_or_else(|| Utc::now().naive_utc());
    let start = oldest_open_interest_start(client, instrument, end).await?;

    let mut rows = Vec::new();
    for (from, to) in date_windows(start, end, OPEN_INTEREST_WINDOW) {
        info!("Fetching open interest from {} to {}", from, to);
        rows.extend(fetch_open_interest_window(client, instrument, from, to).await);
    }
    Ok(rows)
}

pub fn open_interest_file_name(instrument: &str) -> String {
    format!("{}_open_interest.csv", instrument)
}

/// Write open interest with the fixed `exchange,timestamp,value,type` layout
pub fn write_open_interest(rows: &[Value], path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    wtr.write_record(["exchange", "timestamp", "value", "type"])?;

    let columns = ["exchange", "timestamp", "value", "type"];
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| crate::data::csv_rows::cell(row.get(*c)))
            .collect();
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    const BASE: &str = "https://api.example.com";

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn funding_url(start: &str, end: &str) -> String {
        format!(
            "{BASE}/market/futures/funding-rates/BTCUSDT/historical?exchange=binance&startDate={start}&endDate={end}&timeInterval=hours&timeFormat=hr"
        )
    }

    #[tokio::test]
    async fn test_funding_rates_fill_failed_window_with_marker() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            &format!("{BASE}{EXCHANGE_INFO_PATH}?exchange=binance&instrument=BTCUSDT&includeDates=true&includeInactive=true&timeFormat=hr"),
            200,
            r#"{"status":200,"payload":{"data":{"binance":{"BTCUSDT":{"funding_rate":{"startDate":"2021-01-01 00:00:00 000"}}}}}}"#,
        );
        transport.respond(
            &funding_url("2021-01-01", "2021-01-11"),
            200,
            r#"{"status":200,"payload":{"data":[{"timestamp":"2021-01-01 00:00:00 000","fundingRate":0.0001}]}}"#,
        );
        transport.respond(&funding_url("2021-01-11", "2021-01-15"), 500, "oops");
        let client = ApiClient::with_transport(transport.clone(), "key", BASE);

        let policy = RetryPolicy::new(2, Duration::ZERO);
        let rows = fetch_funding_rates(&client, "binance", "BTCUSDT", Some(dt(2021, 1, 15)), policy)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["fundingRate"], NO_DATA);
        assert_eq!(rows[1]["timestamp"], "2021-01-11 00:00:00");
        assert_eq!(transport.request_count(&funding_url("2021-01-11", "2021-01-15")), 3);

        let dir = tempdir().unwrap();
        let path = dir.path().join(funding_rates_file_name("binance", "BTCUSDT"));
        assert_eq!(write_funding_rates(&rows, &path).unwrap(), 2);
        assert!(path.ends_with("BTCUSDT_binance_hourly.csv"));
    }

    #[tokio::test]
    async fn test_missing_funding_start_is_an_error() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            &format!("{BASE}{EXCHANGE_INFO_PATH}?exchange=binance&instrument=BTCUSDT&includeDates=true&includeInactive=true&timeFormat=hr"),
            200,
            r#"{"status":200,"payload":{"data":{}}}"#,
        );
        let client = ApiClient::with_transport(transport, "key", BASE);

        assert!(funding_rate_start(&client, "binance", "BTCUSDT").await.is_err());
    }

    #[tokio::test]
    async fn test_oldest_open_interest_start_across_exchanges() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            &format!("{BASE}{EXCHANGE_INFO_PATH}?instrument=BTCUSDT&includeDates=true&includeInactive=true&timeFormat=hr"),
            200,
            r#"{"status":200,"payload":{"data":{
                "binance":{"BTCUSDT":{"open_interest":{"startDate":"2020-06-01 00:00:00 000"}}},
                "bybit":{"BTCUSDT":{"open_interest":{"startDate":"2019-11-01 00:00:00 000"}}},
                "okex":{"BTCUSDT":{}}}}}"#,
        );
        let client = ApiClient::with_transport(transport, "key", BASE);

        let oldest = oldest_open_interest_start(&client, "BTCUSDT", dt(2024, 1, 1)).await.unwrap();
        assert_eq!(oldest, dt(2019, 11, 1));
    }

    #[tokio::test]
    async fn test_open_interest_window_failure_yields_nothing() {
        let transport = Arc::new(MockTransport::new());
        let client = ApiClient::with_transport(transport, "key", BASE);

        let rows = fetch_open_interest_window(&client, "BTCUSDT", dt(2021, 1, 1), dt(2021, 2, 1)).await;
        assert!(rows.is_empty());
    }

    #[test]
    fn test_write_open_interest_fixed_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(open_interest_file_name("BTCUSDT"));
        let rows = vec![serde_json::json!({
            "value": 12.5, "exchange": "binance", "timestamp": "2021-01-01 00:00:00 000", "type": "futures", "extra": 1
        })];

        write_open_interest(&rows, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "exchange,timestamp,value,type");
        assert_eq!(lines[1], "binance,2021-01-01 00:00:00 000,12.5,futures");
    }
}
