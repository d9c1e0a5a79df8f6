//! Spot market series: reference rates, exchange volumes, OHLCV and stock-to-flow

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

use crate::client::{query, ApiClient};
use crate::data::{
    date_windows, full_windows, join_stf, parse_ohlcv_csv, parse_stf_csv, write_records, Bar,
    WindowStep, OHLCV_FIELDS,
};
use crate::util::{format_query_time, parse_vendor_timestamp, value_as_f64};

pub const REFERENCE_RATE_WINDOW: WindowStep = WindowStep::Days(730);
pub const EXCHANGE_VOLUME_WINDOW: WindowStep = WindowStep::Days(30);
pub const OHLCV_WINDOW: WindowStep = WindowStep::Months(12);

pub const EXCHANGE_VOLUME_PATH: &str = "/market/metrics/exchanges/volumes/historical";

pub const DEFAULT_OHLCV_EXCHANGE: &str = "gdax";

/// Earliest date the reference-rate history is requested from
pub fn reference_rate_origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2010, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Earliest date the exchange-volume history is requested from
pub fn exchange_volume_origin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRate {
    #[serde(with = "crate::util::csv_datetime")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "unitPrice")]
    pub unit_price: f64,
}

/// Rows of `payload.data.referenceRates`; entries without a usable timestamp or price are skipped
pub fn parse_reference_rates(payload: &Value) -> Vec<ReferenceRate> {
    payload["data"]["referenceRates"]
        .as_array()
        .map(|rates| {
            rates
                .iter()
                .filter_map(|rate| {
                    let timestamp = rate["timestamp"].as_str().and_then(parse_vendor_timestamp)?;
                    let unit_price = value_as_f64(&rate["unitPrice"])?;
                    Some(ReferenceRate {
                        timestamp: timestamp.naive_utc(),
                        unit_price,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Hourly reference rates for `asset` between `start` and `end`, sorted by timestamp
pub async fn fetch_reference_rates(
    client: &ApiClient,
    asset: &str,
    start: NaiveDateTime,
    end: Option<NaiveDateTime>,
) -> Result<Vec<ReferenceRate>> {
    let end = end.unwrap_or_else(|| Utc::now().naive_utc());
    let path = format!("/markets/spot/reference-rates/{}", asset);

    let mut rates = Vec::new();
    for (from, to) in date_windows(start, end, REFERENCE_RATE_WINDOW) {
        let start_date = from.format("%Y-%m-%d").to_string();
        let end_date = to.format("%Y-%m-%d").to_string();
        let params = query(&[
            ("startDate", start_date.as_str()),
            ("endDate", end_date.as_str()),
            ("timeFormat", "hr"),
            ("timeInterval", "hours"),
        ]);

        info!("Fetching {} reference rates from {} to {}", asset, start_date, end_date);
        let payload = client
            .get_payload(&path, &params)
            .await
            .with_context(|| format!("Failed to fetch reference rates from {} to {}", start_date, end_date))?;
        rates.extend(parse_reference_rates(&payload));
    }

    rates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(rates)
}

pub fn write_reference_rates(rates: &[ReferenceRate], path: impl AsRef<Path>) -> Result<usize> {
    write_records(rates, path)
}

/// Exchange volume rows for one window; errors are logged and yield nothing
pub async fn fetch_exchange_volume_window(
    client: &ApiClient,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<Value> {
    let start_date = format_query_time(&from);
    let end_date = format_query_time(&to);
    let params = query(&[
        ("direction", "desc"),
        ("timeFormat", "hr"),
        ("startDate", start_date.as_str()),
        ("endDate", end_date.as_str()),
    ]);

    match client.get_payload(EXCHANGE_VOLUME_PATH, &params).await {
        Ok(payload) => match payload["data"].as_array() {
            Some(rows) => rows.clone(),
            None => {
                warn!("Error getting data for date range {} to {}: no data", from, to);
                Vec::new()
            }
        },
        Err(e) => {
            warn!("Error getting data for date range {} to {}: {}", from, to, e);
            Vec::new()
        }
    }
}

/// Daily volume per exchange in consecutive 30-day windows from `start` until `now`
pub async fn fetch_exchange_volumes(
    client: &ApiClient,
    start: NaiveDateTime,
    now: Option<NaiveDateTime>,
) -> Vec<Value> {
    let now = now.unwrap_or_else(|| Utc::now().naive_utc());
    let mut rows = Vec::new();
    for (from, to) in full_windows(start, now, EXCHANGE_VOLUME_WINDOW) {
        info!("Fetching exchange volumes from {} to {}", from, to);
        rows.extend(fetch_exchange_volume_window(client, from, to).await);
    }
    rows
}

/// Concatenated `raw_csv` OHLCV text over yearly windows, led by one header row
pub async fn fetch_ohlcv_csv(
    client: &ApiClient,
    exchange: &str,
    symbol: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<String> {
    let path = format!("/market/ohlcv/{}/historical", symbol);
    let mut text = String::from(OHLCV_FIELDS);

    for (from, to) in date_windows(start, end, OHLCV_WINDOW) {
        info!("Retrieving OHLCV between {} and {}", from, to);
        let start_date = format_query_time(&from);
        let end_date = format_query_time(&to);
        let params = query(&[
            ("exchange", exchange),
            ("timeInterval", "days"),
            ("timeFormat", "iso"),
            ("format", "raw_csv"),
            ("fields", OHLCV_FIELDS),
            ("startDate", start_date.as_str()),
            ("endDate", end_date.as_str()),
        ]);
        let chunk = client
            .get_text(&path, &params)
            .await
            .with_context(|| format!("Failed to fetch OHLCV for {} between {} and {}", symbol, from, to))?;
        text.push('\n');
        text.push_str(&chunk);
    }
    Ok(text)
}

/// Which stock-to-flow series to join onto the bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StfSource {
    /// `/historical/stock-to-flow`, model price in `price`
    #[default]
    StockToFlow,
    /// `/valuations/historical`, model price in `stockToFlow_price`
    Valuations,
}

impl StfSource {
    pub fn path(&self, asset: &str) -> String {
        match self {
            StfSource::StockToFlow => format!("/market/metrics/{}/historical/stock-to-flow", asset),
            StfSource::Valuations => format!("/market/metrics/{}/valuations/historical", asset),
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            StfSource::StockToFlow => "price",
            StfSource::Valuations => "stockToFlow_price",
        }
    }
}

pub async fn fetch_stf_csv(
    client: &ApiClient,
    asset: &str,
    source: StfSource,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<String> {
    info!("Retrieving STF between {} and {}", start, end);
    let start_date = start.format("%Y-%m-%d").to_string();
    let end_date = end.format("%Y-%m-%d").to_string();
    let params = query(&[
        ("format", "csv"),
        ("timeFrame", "day"),
        ("startDate", start_date.as_str()),
        ("endDate", end_date.as_str()),
    ]);
    client
        .get_text(&source.path(asset), &params)
        .await
        .with_context(|| format!("Failed to fetch stock-to-flow for {}", asset))
}

/// Parameters of the daily series a backtest runs on
#[derive(Debug, Clone)]
pub struct BarRequest {
    pub exchange: String,
    /// Market pair, e.g. `btc_usd`
    pub symbol: String,
    /// Asset of the stock-to-flow model, e.g. `btc`
    pub asset: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub stf: Option<StfSource>,
}

/// Daily bars with the stock-to-flow price joined on where requested
pub async fn load_backtest_bars(client: &ApiClient, request: &BarRequest) -> Result<Vec<Bar>> {
    let start = request.start.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = request.end.and_hms_opt(0, 0, 0).unwrap_or_default();

    let text = fetch_ohlcv_csv(client, &request.exchange, &request.symbol, start, end).await?;
    let mut bars = parse_ohlcv_csv(&text)?;
    info!("Loaded {} bars for {}", bars.len(), request.symbol);

    if let Some(source) = request.stf {
        let text = fetch_stf_csv(client, &request.asset, source, request.start, request.end).await?;
        let series = parse_stf_csv(&text, source.column())?;
        let matched = join_stf(&mut bars, &series);
        info!("Joined stock-to-flow onto {}/{} bars", matched, bars.len());
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use serde_json::json;
    use std::sync::Arc;

    const BASE: &str = "https://api.example.com";

    fn dt(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_reference_rates_skips_bad_rows() {
        let payload = json!({"data": {"referenceRates": [
            {"timestamp": "2021-01-01 01:00:00 000", "unitPrice": "730.5"},
            {"timestamp": "2021-01-01 00:00:00 000", "unitPrice": 729.0},
            {"timestamp": "garbage", "unitPrice": 1.0},
            {"timestamp": "2021-01-01 02:00:00 000"}
        ]}});

        let rates = parse_reference_rates(&payload);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].unit_price, 730.5);
        assert_eq!(rates[1].timestamp, dt(2021, 1, 1));
    }

    #[tokio::test]
    async fn test_fetch_reference_rates_sorted_across_windows() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            &format!("{BASE}/markets/spot/reference-rates/eth?startDate=2020-01-01&endDate=2021-12-31&timeFormat=hr&timeInterval=hours"),
            200,
            r#"{"status":200,"payload":{"data":{"referenceRates":[
                {"timestamp":"2021-06-01 00:00:00 000","unitPrice":2000},
                {"timestamp":"2020-06-01 00:00:00 000","unitPrice":200}]}}}"#,
        );
        transport.respond(
            &format!("{BASE}/markets/spot/reference-rates/eth?startDate=2021-12-31&endDate=2022-01-10&timeFormat=hr&timeInterval=hours"),
            200,
            r#"{"status":200,"payload":{"data":{"referenceRates":[
                {"timestamp":"2022-01-05 00:00:00 000","unitPrice":3000}]}}}"#,
        );
        let client = ApiClient::with_transport(transport.clone(), "key", BASE);

        let rates = fetch_reference_rates(&client, "eth", dt(2020, 1, 1), Some(dt(2022, 1, 10)))
            .await
            .unwrap();

        let prices: Vec<f64> = rates.iter().map(|r| r.unit_price).collect();
        assert_eq!(prices, vec![200.0, 2000.0, 3000.0]);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_exchange_volume_window_failure_is_empty() {
        let transport = Arc::new(MockTransport::new());
        let client = ApiClient::with_transport(transport.clone(), "key", BASE);

        let rows = fetch_exchange_volume_window(&client, dt(2021, 1, 1), dt(2021, 1, 31)).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_volumes_only_full_windows() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            &format!("{BASE}{EXCHANGE_VOLUME_PATH}?direction=desc&timeFormat=hr&startDate=2021-01-01T00%3A00%3A00&endDate=2021-01-31T00%3A00%3A00"),
            200,
            r#"{"status":200,"payload":{"data":[{"exchange":"gdax","timestamp":"2021-01-01 00:00:00 000","volumeUSD":"10"}]}}"#,
        );
        let client = ApiClient::with_transport(transport.clone(), "key", BASE);

        let rows = fetch_exchange_volumes(&client, dt(2021, 1, 1), Some(dt(2021, 2, 20))).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_load_backtest_bars_joins_stf() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            &format!("{BASE}/market/ohlcv/btc_usd/historical?exchange=gdax&timeInterval=days&timeFormat=iso&format=raw_csv&fields=timestamp%2Copen%2Chigh%2Clow%2Cclose%2Cvolume&startDate=2020-01-01T00%3A00%3A00&endDate=2020-01-03T00%3A00%3A00"),
            200,
            "2020-01-01T00:00:00.000Z,7200,7250,6900,6950,1000\n2020-01-02T00:00:00.000Z,6950,7100,6900,7050,900\n",
        );
        transport.respond(
            &format!("{BASE}/market/metrics/btc/historical/stock-to-flow?format=csv&timeFrame=day&startDate=2020-01-01&endDate=2020-01-03"),
            200,
            "timestamp,price\n2020-01-02T00:00:00.000Z,55000\n",
        );
        let client = ApiClient::with_transport(transport, "key", BASE);

        let request = BarRequest {
            exchange: DEFAULT_OHLCV_EXCHANGE.to_string(),
            symbol: "btc_usd".to_string(),
            asset: "btc".to_string(),
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2020, 1, 3).unwrap(),
            stf: Some(StfSource::StockToFlow),
        };
        let bars = load_backtest_bars(&client, &request).await.unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].stf, None);
        assert_eq!(bars[1].stf, Some(55000.0));
    }

    #[test]
    fn test_stf_source_columns() {
        assert_eq!(StfSource::Valuations.column(), "stockToFlow_price");
        assert_eq!(
            StfSource::StockToFlow.path("btc"),
            "/market/metrics/btc/historical/stock-to-flow"
        );
    }
}
