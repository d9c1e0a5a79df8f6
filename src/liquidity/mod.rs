//! Order-book depth aggregation
//!
//! A snapshot's levels are grouped into fixed-width price buckets stepping
//! away from the mid price, one ladder for asks (upward) and one for bids
//! (downward). Each bucket reports native and USD liquidity plus running
//! totals from the mid outward.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Bucket width used when none is given: 100 bps = 1%
pub const DEFAULT_STEP_BPS: f64 = 100.0;

/// Upper bound on buckets per side; levels past it fold into the last bucket
const MAX_BUCKETS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub volume: f64,
}

/// One order-book snapshot as returned by the vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: Value,
    pub exchange: String,
    pub instrument: String,
    #[serde(default)]
    pub ask: Vec<Level>,
    #[serde(default)]
    pub bid: Vec<Level>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub basis_points_from_mid: f64,
    pub liquidity: f64,
    pub liquidity_usd: f64,
    pub cumulative_liquidity: f64,
    pub cumulative_liquidity_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityRow {
    pub basis_points_from_mid: f64,
    pub ask_liquidity_native: Option<f64>,
    pub ask_liquidity_fiat: Option<f64>,
    pub ask_liquidity_cumulative_native: Option<f64>,
    pub ask_liquidity_cumulative_fiat: Option<f64>,
    pub bid_liquidity_native: Option<f64>,
    pub bid_liquidity_fiat: Option<f64>,
    pub bid_liquidity_cumulative_native: Option<f64>,
    pub bid_liquidity_cumulative_fiat: Option<f64>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityProfile {
    pub exchange: String,
    pub instrument: String,
    pub timestamp: Value,
    pub liquidity: Vec<LiquidityRow>,
}

/// Chart-ready bar: asks at `+bps`, bids at `-bps`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBar {
    pub x: f64,
    pub y: f64,
    pub side: &'static str,
}

/// Liquidity summed across exchanges at one distance from mid
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRow {
    pub basis_points_from_mid: f64,
    pub ask_liquidity_native: f64,
    pub ask_liquidity_fiat: f64,
    pub bid_liquidity_native: f64,
    pub bid_liquidity_fiat: f64,
    pub exchanges: usize,
}

/// Mean of best ask and best bid
pub fn mid_price(asks: &[Level], bids: &[Level]) -> Option<f64> {
    let best_ask = asks.first()?.price;
    let best_bid = bids.first()?.price;
    Some((best_ask + best_bid) / 2.0)
}

fn basis_points(start: f64, mid: f64) -> f64 {
    ((start - mid) / mid * 10_000.0).round().abs()
}

/// Running totals from the mid outward.
///
/// Each cumulative figure is the sum of every bucket up to and including this
/// one. Tables built with a "this bucket plus the previous one" rule agree on
/// the first two buckets only.
fn accumulate(mut buckets: Vec<Bucket>) -> Vec<Bucket> {
    let mut native = 0.0;
    let mut usd = 0.0;
    for bucket in buckets.iter_mut() {
        native += bucket.liquidity;
        usd += bucket.liquidity_usd;
        bucket.cumulative_liquidity = native;
        bucket.cumulative_liquidity_usd = usd;
    }
    buckets
}

fn bucket(levels: impl Iterator<Item = Level>, start: f64, mid: f64) -> Bucket {
    let (liquidity, liquidity_usd) = levels.fold((0.0, 0.0), |(native, usd), level| {
        (native + level.volume, usd + level.price * level.volume)
    });
    Bucket {
        basis_points_from_mid: basis_points(start, mid),
        liquidity,
        liquidity_usd,
        cumulative_liquidity: 0.0,
        cumulative_liquidity_usd: 0.0,
    }
}

/// Ask ladder: buckets `(start - inc, start]` for `start = mid + k*inc`,
/// up to one increment past the furthest ask
pub fn ask_buckets(asks: &[Level], mid: f64, increment: f64) -> Vec<Bucket> {
    if asks.is_empty() || increment.is_nan() || increment <= 0.0 || !mid.is_finite() {
        return Vec::new();
    }
    let end = asks.iter().map(|l| l.price).fold(f64::MIN, f64::max) + increment;

    let mut buckets = Vec::new();
    for k in 1..=MAX_BUCKETS {
        let start = mid + increment * k as f64;
        if start > end {
            break;
        }
        let capped = k == MAX_BUCKETS && start + increment <= end;
        if capped {
            warn!(mid, increment, "Ask ladder hit {} buckets, folding the rest into the last one", MAX_BUCKETS);
        }
        let levels = asks
            .iter()
            .filter(|l| l.price > start - increment && (capped || l.price <= start))
            .cloned();
        buckets.push(bucket(levels, start, mid));
    }
    accumulate(buckets)
}

/// Bid ladder: buckets `[start, start + inc)` for `start = mid - k*inc`,
/// down to one increment past the furthest bid
pub fn bid_buckets(bids: &[Level], mid: f64, increment: f64) -> Vec<Bucket> {
    if bids.is_empty() || increment.is_nan() || increment <= 0.0 || !mid.is_finite() {
        return Vec::new();
    }
    let end = bids.iter().map(|l| l.price).fold(f64::MAX, f64::min) - increment;

    let mut buckets = Vec::new();
    for k in 1..=MAX_BUCKETS {
        let start = mid - increment * k as f64;
        if start < end {
            break;
        }
        let capped = k == MAX_BUCKETS && start - increment >= end;
        if capped {
            warn!(mid, increment, "Bid ladder hit {} buckets, folding the rest into the last one", MAX_BUCKETS);
        }
        let levels = bids
            .iter()
            .filter(|l| l.price < start + increment && (capped || l.price >= start))
            .cloned();
        buckets.push(bucket(levels, start, mid));
    }
    accumulate(buckets)
}

/// Pair ask and bid buckets by position; the longer side pads the shorter with empty columns
pub fn format_profile(
    asks: &[Bucket],
    bids: &[Bucket],
    instrument: &str,
    timestamp: Value,
    exchange: &str,
) -> LiquidityProfile {
    let rows = (0..asks.len().max(bids.len()))
        .map(|i| {
            let ask = asks.get(i);
            let bid = bids.get(i);
            LiquidityRow {
                basis_points_from_mid: ask
                    .or(bid)
                    .map(|b| b.basis_points_from_mid)
                    .unwrap_or_default(),
                ask_liquidity_native: ask.map(|b| b.liquidity),
                ask_liquidity_fiat: ask.map(|b| b.liquidity_usd),
                ask_liquidity_cumulative_native: ask.map(|b| b.cumulative_liquidity),
                ask_liquidity_cumulative_fiat: ask.map(|b| b.cumulative_liquidity_usd),
                bid_liquidity_native: bid.map(|b| b.liquidity),
                bid_liquidity_fiat: bid.map(|b| b.liquidity_usd),
                bid_liquidity_cumulative_native: bid.map(|b| b.cumulative_liquidity),
                bid_liquidity_cumulative_fiat: bid.map(|b| b.cumulative_liquidity_usd),
                currency: "USD".to_string(),
            }
        })
        .collect();

    LiquidityProfile {
        exchange: exchange.to_string(),
        instrument: instrument.to_string(),
        timestamp,
        liquidity: rows,
    }
}

/// Depth profile of one snapshot; `None` when either side of the book is empty
pub fn profile_snapshot(snapshot: &Snapshot, step_bps: f64) -> Option<LiquidityProfile> {
    let mid = mid_price(&snapshot.ask, &snapshot.bid)?;
    let increment = mid * step_bps / 10_000.0;
    let asks = ask_buckets(&snapshot.ask, mid, increment);
    let bids = bid_buckets(&snapshot.bid, mid, increment);
    Some(format_profile(
        &asks,
        &bids,
        &snapshot.instrument,
        snapshot.timestamp.clone(),
        &snapshot.exchange,
    ))
}

/// Profile many snapshots in parallel, preserving input order
pub fn aggregate_snapshots(snapshots: &[Snapshot], step_bps: f64) -> Vec<LiquidityProfile> {
    snapshots
        .par_iter()
        .filter_map(|s| profile_snapshot(s, step_bps))
        .collect()
}

/// Parse the snapshots out of one page's `payload.data`
pub fn snapshots_from_page(page: &Value) -> serde_json::Result<Vec<Snapshot>> {
    match page.get("payload").and_then(|p| p.get("data")) {
        Some(data) if !data.is_null() => serde_json::from_value(data.clone()),
        _ => Ok(Vec::new()),
    }
}

pub fn histogram_bars(profile: &LiquidityProfile) -> Vec<HistogramBar> {
    let mut bars = Vec::with_capacity(profile.liquidity.len() * 2);
    for row in &profile.liquidity {
        if let Some(y) = row.ask_liquidity_fiat {
            bars.push(HistogramBar {
                x: row.basis_points_from_mid,
                y,
                side: "Ask",
            });
        }
        if let Some(y) = row.bid_liquidity_fiat {
            bars.push(HistogramBar {
                x: -row.basis_points_from_mid,
                y,
                side: "Bid",
            });
        }
    }
    bars
}

/// Sum ask/bid liquidity per distance from mid across exchange profiles of the same instrument
pub fn merge_across_exchanges(profiles: &[LiquidityProfile]) -> Vec<MergedRow> {
    // Keyed by bps in hundredths so float keys compare exactly
    let mut merged: BTreeMap<i64, MergedRow> = BTreeMap::new();
    for profile in profiles {
        for row in &profile.liquidity {
            let key = (row.basis_points_from_mid * 100.0).round() as i64;
            let entry = merged.entry(key).or_insert_with(|| MergedRow {
                basis_points_from_mid: row.basis_points_from_mid,
                ask_liquidity_native: 0.0,
                ask_liquidity_fiat: 0.0,
                bid_liquidity_native: 0.0,
                bid_liquidity_fiat: 0.0,
                exchanges: 0,
            });
            entry.ask_liquidity_native += row.ask_liquidity_native.unwrap_or(0.0);
            entry.ask_liquidity_fiat += row.ask_liquidity_fiat.unwrap_or(0.0);
            entry.bid_liquidity_native += row.bid_liquidity_native.unwrap_or(0.0);
            entry.bid_liquidity_fiat += row.bid_liquidity_fiat.unwrap_or(0.0);
            entry.exchanges += 1;
        }
    }
    merged.into_values().collect()
}
