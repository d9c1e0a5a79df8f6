//! Aave v2 liquidation calls with their gas costs and the ETH price tape

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::client::{query, ApiClient, FanOut, Query};
use crate::data::{date_windows, write_records, WindowStep};
use crate::util::{format_query_time, from_epoch_millis, value_as_f64};

pub const LIQUIDATIONS_PATH: &str = "/defi/lending/aavev2/assets/WETH";
pub const ETH_PRICE_PATH: &str = "/market/spot/prices/assets/eth/historical/";

pub const LIQUIDATION_WINDOW: WindowStep = WindowStep::Hours(6);
pub const ETH_PRICE_WINDOW: WindowStep = WindowStep::Hours(24);

/// Largest page the lending endpoint serves
pub const LIQUIDATION_PAGE_SIZE: &str = "990";

pub const LIQUIDATIONS_FILE: &str = "liquidations.csv";
pub const TRANSACTION_FEES_FILE: &str = "transaction_fees.csv";
pub const ETHER_PRICE_FILE: &str = "ether_price.csv";

/// Default study period, 2021-01-01 until 2024-01-01
pub fn default_period() -> (NaiveDateTime, NaiveDateTime) {
    let at = |y| {
        NaiveDate::from_ymd_opt(y, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    };
    (at(2021), at(2024))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub transaction_hash: String,
    #[serde(with = "crate::util::csv_datetime")]
    pub timestamp: NaiveDateTime,
    pub debt_asset: String,
    pub debt_to_cover: f64,
    pub collateral_asset: String,
    pub liquidated_collateral_amount: f64,
    pub liquidator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFee {
    pub hash: String,
    #[serde(rename = "gasUsed")]
    pub gas_used: f64,
    #[serde(rename = "gasPrice")]
    pub gas_price: f64,
}

impl TransactionFee {
    /// Fee paid in ETH
    pub fn fee_eth(&self) -> f64 {
        self.gas_used * self.gas_price / 1e18
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthPrice {
    #[serde(with = "crate::util::csv_datetime")]
    pub timestamp: NaiveDateTime,
    pub price: f64,
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn epoch_ms(value: &Value) -> Option<NaiveDateTime> {
    value_as_f64(value).and_then(|ms| from_epoch_millis(ms as i64))
}

fn window_requests(
    path: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: WindowStep,
    extra: &[(&str, &str)],
) -> Vec<(String, Query)> {
    date_windows(start, end, step)
        .into_iter()
        .map(|(from, to)| {
            let start_date = format_query_time(&from);
            let end_date = format_query_time(&to);
            let mut params = query(&[("startDate", start_date.as_str()), ("endDate", end_date.as_str())]);
            params.extend(query(extra));
            (path.to_string(), params)
        })
        .collect()
}

/// One request per 6-hour window of liquidation calls
pub fn liquidation_requests(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(String, Query)> {
    window_requests(
        LIQUIDATIONS_PATH,
        start,
        end,
        LIQUIDATION_WINDOW,
        &[
            ("timeFormat", "ms"),
            ("action", "LiquidationCall"),
            ("size", LIQUIDATION_PAGE_SIZE),
        ],
    )
}

/// Map one record of the lending endpoint; records missing a field are skipped
pub fn parse_liquidation(record: &Value) -> Option<Liquidation> {
    Some(Liquidation {
        transaction_hash: text(&record["transactionHash"])?,
        timestamp: epoch_ms(&record["timestamp"])?,
        debt_asset: text(&record["principalAssetSymbol"])?,
        debt_to_cover: value_as_f64(&record["principalAmountNative"])?,
        collateral_asset: text(&record["collateralAssetId"])?,
        liquidated_collateral_amount: value_as_f64(&record["collateralAmountNative"])?,
        liquidator: text(&record["liquidator"])?,
    })
}

fn data_rows(payloads: &[Value]) -> impl Iterator<Item = &Value> {
    payloads
        .iter()
        .filter_map(|p| p["data"].as_array())
        .flatten()
}

pub async fn fetch_liquidations(
    client: &ApiClient,
    start: NaiveDateTime,
    end: NaiveDateTime,
    fan_out: &FanOut,
) -> Vec<Liquidation> {
    info!("collecting liquidation data");
    let payloads = fan_out.run(client, liquidation_requests(start, end)).await;

    let mut skipped = 0usize;
    let liquidations: Vec<Liquidation> = data_rows(&payloads)
        .filter_map(|record| {
            let parsed = parse_liquidation(record);
            if parsed.is_none() {
                skipped += 1;
            }
            parsed
        })
        .collect();
    if skipped > 0 {
        warn!("Skipped {} malformed liquidation records", skipped);
    }
    liquidations
}

/// Transaction hashes in first-seen order, duplicates removed
pub fn distinct_hashes(liquidations: &[Liquidation]) -> Vec<String> {
    let mut seen = HashSet::new();
    liquidations
        .iter()
        .filter(|l| seen.insert(l.transaction_hash.as_str()))
        .map(|l| l.transaction_hash.clone())
        .collect()
}

pub fn parse_transaction_fee(payload: &Value) -> Option<TransactionFee> {
    Some(TransactionFee {
        hash: text(&payload["hash"])?,
        gas_used: value_as_f64(&payload["gasUsed"])?,
        gas_price: value_as_f64(&payload["gasPrice"])?,
    })
}

pub async fn fetch_transaction_fees(
    client: &ApiClient,
    hashes: &[String],
    fan_out: &FanOut,
) -> Vec<TransactionFee> {
    info!("collecting transaction fee data");
    let requests = hashes
        .iter()
        .map(|hash| (format!("/blockchains/transactions/{}", hash), Query::new()))
        .collect();
    let payloads = fan_out.run(client, requests).await;
    payloads.iter().filter_map(parse_transaction_fee).collect()
}

/// One request per day of minutely ETH prices
pub fn eth_price_requests(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(String, Query)> {
    window_requests(
        ETH_PRICE_PATH,
        start,
        end,
        ETH_PRICE_WINDOW,
        &[("timeFormat", "ms"), ("timeInterval", "minute")],
    )
}

pub async fn fetch_eth_prices(
    client: &ApiClient,
    start: NaiveDateTime,
    end: NaiveDateTime,
    fan_out: &FanOut,
) -> Vec<EthPrice> {
    info!("collecting ethereum price data");
    let payloads = fan_out.run(client, eth_price_requests(start, end)).await;
    data_rows(&payloads)
        .filter_map(|row| {
            Some(EthPrice {
                timestamp: epoch_ms(&row["timestamp"])?,
                price: value_as_f64(&row["price"])?,
            })
        })
        .collect()
}

/// Row counts of one full liquidation dataset download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSummary {
    pub liquidations: usize,
    pub transaction_fees: usize,
    pub eth_prices: usize,
}

/// Download all three liquidation-study inputs into `dir`
pub async fn download_liquidation_dataset(
    client: &ApiClient,
    start: NaiveDateTime,
    end: NaiveDateTime,
    fan_out: &FanOut,
    dir: impl AsRef<Path>,
) -> Result<DatasetSummary> {
    let dir = dir.as_ref();

    let liquidations = fetch_liquidations(client, start, end, fan_out).await;
    write_records(&liquidations, dir.join(LIQUIDATIONS_FILE))?;

    let fees = fetch_transaction_fees(client, &distinct_hashes(&liquidations), fan_out).await;
    write_records(&fees, dir.join(TRANSACTION_FEES_FILE))?;

    let prices = fetch_eth_prices(client, start, end, fan_out).await;
    write_records(&prices, dir.join(ETHER_PRICE_FILE))?;

    Ok(DatasetSummary {
        liquidations: liquidations.len(),
        transaction_fees: fees.len(),
        eth_prices: prices.len(),
    })
}
