//! Profitability of Aave v2 liquidations repaid in stablecoins
//!
//! Each liquidation is priced at the ETH minute close of its block: the
//! liquidator repays `debt_covered` stablecoins and receives
//! `collat_received` ETH, less the gas it paid. Only stablecoin debt is
//! studied, and only returns inside the `(-3%, 10%)` band count towards the
//! liquidator statistics.

use anyhow::{Context, Result};
use chrono::{DurationRound, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::analysis::stats::{normalize, quantile, round_to, share_between, Describe};
use crate::data::{read_records, write_records};
use crate::datasets::defi::{
    EthPrice, Liquidation, TransactionFee, ETHER_PRICE_FILE, LIQUIDATIONS_FILE,
    TRANSACTION_FEES_FILE,
};

pub const STABLECOINS: [&str; 8] = ["USDT", "DAI", "USDC", "BUSD", "TUSD", "sUSD", "GUSD", "PAX"];

/// Returns outside this open interval are treated as bad prints
pub const RETURN_BAND: (f64, f64) = (-0.03, 0.1);

/// Liquidators need more trades than this to count as regulars
pub const MIN_LIQUIDATIONS: usize = 10;

/// `0x1234…abcd`
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

fn floor_minute(ts: NaiveDateTime) -> NaiveDateTime {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

/// ETH minute prices with one-tick outliers and out-of-period rows removed.
///
/// A tick is an outlier when its percent change is not strictly inside the
/// 1%/99% quantiles of all percent changes. The period bounds are exclusive.
pub fn filter_eth_prices(
    prices: &[EthPrice],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> BTreeMap<NaiveDateTime, f64> {
    let mut sorted: Vec<&EthPrice> = prices.iter().collect();
    sorted.sort_by_key(|p| p.timestamp);

    let changes: Vec<f64> = sorted
        .iter()
        .enumerate()
        .map(|(i, p)| match i {
            0 => f64::NAN,
            _ => p.price / sorted[i - 1].price - 1.0,
        })
        .collect();

    let (Some(low), Some(high)) = (quantile(&changes, 0.01), quantile(&changes, 0.99)) else {
        return BTreeMap::new();
    };

    let mut filtered = BTreeMap::new();
    for (price, change) in sorted.iter().zip(&changes) {
        if low < *change && *change < high && start < price.timestamp && price.timestamp < end {
            filtered.entry(floor_minute(price.timestamp)).or_insert(price.price);
        }
    }
    filtered
}

/// Gas cost in ETH per transaction hash; the first record of a hash wins
pub fn fees_by_hash(fees: &[TransactionFee]) -> HashMap<&str, f64> {
    let mut by_hash = HashMap::new();
    for fee in fees {
        by_hash.entry(fee.hash.as_str()).or_insert_with(|| fee.fee_eth());
    }
    by_hash
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidationOutcome {
    #[serde(with = "crate::util::csv_datetime")]
    pub timestamp: NaiveDateTime,
    pub liquidator: String,
    pub eth_price: f64,
    pub debt_asset: String,
    pub debt_covered: f64,
    pub collat_received: f64,
    pub fees_usd: f64,
    pub collat_value_usd: f64,
    pub raw_profit_usd: f64,
    pub raw_return_pct: f64,
    pub raw_effective_eth_price: f64,
    pub profit_usd: f64,
    pub return_pct: f64,
    pub effective_eth_price: f64,
}

impl LiquidationOutcome {
    /// Price one liquidation; `fee_eth` is the gas paid by its transaction
    pub fn price(liq: &Liquidation, eth_price: f64, fee_eth: f64) -> Self {
        let fees_usd = fee_eth * eth_price;
        let debt = liq.debt_to_cover;
        let collat = liq.liquidated_collateral_amount;
        let collat_value_usd = collat * eth_price;
        let raw_profit_usd = collat_value_usd - debt;

        Self {
            timestamp: liq.timestamp,
            liquidator: shorten_address(&liq.liquidator),
            eth_price,
            debt_asset: liq.debt_asset.clone(),
            debt_covered: debt,
            collat_received: collat,
            fees_usd,
            collat_value_usd,
            raw_profit_usd,
            raw_return_pct: round_to(collat_value_usd / debt - 1.0, 4),
            raw_effective_eth_price: debt / collat,
            profit_usd: raw_profit_usd - fees_usd,
            return_pct: round_to((collat_value_usd - fees_usd) / debt - 1.0, 4),
            effective_eth_price: debt / (collat_value_usd - fees_usd) * eth_price,
        }
    }

    fn is_complete(&self) -> bool {
        [
            self.eth_price,
            self.debt_covered,
            self.collat_received,
            self.fees_usd,
            self.collat_value_usd,
            self.raw_profit_usd,
            self.raw_return_pct,
            self.raw_effective_eth_price,
            self.profit_usd,
            self.return_pct,
            self.effective_eth_price,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Price every stablecoin liquidation that has both an ETH price and a fee.
///
/// Liquidations sharing a transaction hash keep only the first. Rows with any
/// missing or non-finite figure are dropped. The result is time-ordered.
pub fn price_liquidations(
    liquidations: &[Liquidation],
    eth: &BTreeMap<NaiveDateTime, f64>,
    fees: &HashMap<&str, f64>,
) -> Vec<LiquidationOutcome> {
    let mut seen = HashSet::new();
    let mut outcomes: Vec<LiquidationOutcome> = liquidations
        .iter()
        .filter(|l| seen.insert(l.transaction_hash.as_str()))
        .filter_map(|l| {
            let eth_price = *eth.get(&floor_minute(l.timestamp))?;
            let fee_eth = *fees.get(l.transaction_hash.as_str())?;
            Some(LiquidationOutcome::price(l, eth_price, fee_eth))
        })
        .filter(LiquidationOutcome::is_complete)
        .collect();

    outcomes.sort_by_key(|o| o.timestamp);
    outcomes.retain(|o| STABLECOINS.contains(&o.debt_asset.as_str()));
    outcomes
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidatorStats {
    pub liquidator: String,
    pub num_liqs: usize,
    pub avg_return_pct: f64,
    pub total_profit: f64,
    pub profit_per_liq: f64,
}

/// Per-liquidator totals, ordered by label
pub fn liquidator_stats(outcomes: &[LiquidationOutcome]) -> Vec<LiquidatorStats> {
    let mut groups: BTreeMap<&str, (usize, f64, f64)> = BTreeMap::new();
    for o in outcomes {
        let entry = groups.entry(o.liquidator.as_str()).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += o.return_pct;
        entry.2 += o.profit_usd;
    }

    groups
        .into_iter()
        .map(|(liquidator, (num_liqs, return_sum, total_profit))| LiquidatorStats {
            liquidator: liquidator.to_string(),
            num_liqs,
            avg_return_pct: return_sum / num_liqs as f64,
            total_profit,
            profit_per_liq: total_profit / num_liqs as f64,
        })
        .collect()
}

fn by_desc(key: impl Fn(&LiquidatorStats) -> f64) -> impl Fn(&LiquidatorStats, &LiquidatorStats) -> Ordering {
    move |a, b| key(b).total_cmp(&key(a))
}

/// Liquidators whose total profit is above the 90th percentile, most profitable first
pub fn top_decile(stats: &[LiquidatorStats]) -> Vec<LiquidatorStats> {
    let profits: Vec<f64> = stats.iter().map(|s| s.total_profit).collect();
    let Some(threshold) = quantile(&profits, 0.9) else {
        return Vec::new();
    };
    let mut top: Vec<LiquidatorStats> = stats
        .iter()
        .filter(|s| s.total_profit > threshold)
        .cloned()
        .collect();
    top.sort_by(by_desc(|s| s.total_profit));
    top
}

/// Profitable liquidators with more than [`MIN_LIQUIDATIONS`] trades, best profit per trade first
pub fn regular_profitable(stats: &[LiquidatorStats]) -> Vec<LiquidatorStats> {
    let mut regulars: Vec<LiquidatorStats> = stats
        .iter()
        .filter(|s| s.num_liqs > MIN_LIQUIDATIONS && s.total_profit > 0.0)
        .cloned()
        .collect();
    regulars.sort_by(by_desc(|s| s.profit_per_liq));
    regulars
}

/// Min-max normalised pairs, chart-ready for a scatter of two columns
pub fn normalized_pairs(x: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
    normalize(x).into_iter().zip(normalize(y)).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidationStudy {
    /// Liquidations inside the return band
    pub outcomes: Vec<LiquidationOutcome>,
    /// Share of stablecoin liquidations that lost money
    pub loss_share: f64,
    pub share_0_to_10: f64,
    pub share_3_to_7: f64,
    pub profit: Describe,
    pub profit_sum: f64,
    pub returns: Describe,
    pub top_decile: Vec<LiquidatorStats>,
    pub top_decile_profit_share: f64,
    pub regulars: Vec<LiquidatorStats>,
}

pub struct StudyInputs {
    pub liquidations: Vec<Liquidation>,
    pub fees: Vec<TransactionFee>,
    pub eth_prices: Vec<EthPrice>,
}

/// Read the three CSVs written by the dataset download
pub fn load_inputs(dir: impl AsRef<Path>) -> Result<StudyInputs> {
    let dir = dir.as_ref();
    Ok(StudyInputs {
        liquidations: read_records(dir.join(LIQUIDATIONS_FILE))?,
        fees: read_records(dir.join(TRANSACTION_FEES_FILE))?,
        eth_prices: read_records(dir.join(ETHER_PRICE_FILE))?,
    })
}

pub fn run_study(inputs: &StudyInputs, start: NaiveDateTime, end: NaiveDateTime) -> Result<LiquidationStudy> {
    let eth = filter_eth_prices(&inputs.eth_prices, start, end);
    let fees = fees_by_hash(&inputs.fees);
    info!(
        "{} ETH prices and {} fees after filtering",
        eth.len(),
        fees.len()
    );

    let priced = price_liquidations(&inputs.liquidations, &eth, &fees);
    if priced.is_empty() {
        anyhow::bail!("No stablecoin liquidations could be priced between {} and {}", start, end);
    }

    let returns: Vec<f64> = priced.iter().map(|o| o.return_pct).collect();
    let loss_share = returns.iter().filter(|r| **r < 0.0).count() as f64 / returns.len() as f64;
    let share_0_to_10 = share_between(&returns, 0.0, 0.1);
    let share_3_to_7 = share_between(&returns, 0.03, 0.07);

    let outcomes: Vec<LiquidationOutcome> = priced
        .into_iter()
        .filter(|o| RETURN_BAND.0 < o.return_pct && o.return_pct < RETURN_BAND.1)
        .collect();
    if outcomes.is_empty() {
        anyhow::bail!("No liquidation returns inside {:?}", RETURN_BAND);
    }

    let profits: Vec<f64> = outcomes.iter().map(|o| o.profit_usd).collect();
    let band_returns: Vec<f64> = outcomes.iter().map(|o| o.return_pct).collect();
    let profit_sum: f64 = profits.iter().sum();

    let stats = liquidator_stats(&outcomes);
    let top_decile = top_decile(&stats);
    let top_profit: f64 = top_decile.iter().map(|s| s.total_profit).sum();
    let regulars = regular_profitable(&stats);
    if regulars.is_empty() {
        warn!("No liquidator has more than {} profitable trades", MIN_LIQUIDATIONS);
    }

    Ok(LiquidationStudy {
        profit: Describe::of(&profits).context("Empty profit column")?,
        returns: Describe::of(&band_returns).context("Empty return column")?,
        outcomes,
        loss_share,
        share_0_to_10,
        share_3_to_7,
        profit_sum,
        top_decile_profit_share: top_profit / profit_sum,
        top_decile,
        regulars,
    })
}

fn render_stats_table(stats: &[LiquidatorStats]) -> String {
    let mut out = format!(
        "  {:<14} {:>9} {:>15} {:>16} {:>15}\n",
        "liquidator", "num_liqs", "avg_return_pct", "total_profit", "profit_per_liq"
    );
    for s in stats {
        out.push_str(&format!(
            "  {:<14} {:>9} {:>15.6} {:>16.2} {:>15.2}\n",
            s.liquidator, s.num_liqs, s.avg_return_pct, s.total_profit, s.profit_per_liq
        ));
    }
    out
}

impl LiquidationStudy {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("pct of loans that loss: {:.6}\n", self.loss_share));
        out.push_str(&format!("pct of loans between 0 and 0.1: {:.6}\n", self.share_0_to_10));
        out.push_str(&format!("pct of loans between 0.03 and 0.07: {:.6}\n", self.share_3_to_7));
        out.push_str(&format!("liquidator profit description:\n{}\n", self.profit.render()));
        out.push_str(&format!("profit sum: {:.2}\n", self.profit_sum));
        out.push_str(&format!("profit sum/3: {:.2}\n", self.profit_sum / 3.0));
        out.push_str(&format!("return desc:\n{}\n", self.returns.render()));
        out.push_str(&format!("top 10% liqs by profit:\n{}", render_stats_table(&self.top_decile)));
        out.push_str(&format!(
            "top10liqs by profit % of total profit: {:.6}\n",
            self.top_decile_profit_share
        ));
        out.push_str(&format!(
            "profitable liqs more than {} trades:\n{}",
            MIN_LIQUIDATIONS,
            render_stats_table(&self.regulars)
        ));
        out
    }

    /// Write the priced liquidations, liquidator tables and a normalised debt/return scatter
    pub fn write_outputs(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        write_records(&self.outcomes, dir.join("liquidation_returns.csv"))?;
        write_records(&self.top_decile, dir.join("top_liquidators.csv"))?;
        write_records(&self.regulars, dir.join("regular_liquidators.csv"))?;

        let debt: Vec<f64> = self.outcomes.iter().map(|o| o.debt_covered).collect();
        let returns: Vec<f64> = self.outcomes.iter().map(|o| o.return_pct).collect();
        let points: Vec<ScatterPoint> = normalized_pairs(&debt, &returns)
            .into_iter()
            .map(|(x, y)| ScatterPoint { x, y })
            .collect();
        write_records(&points, dir.join("debt_vs_return.csv"))?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ScatterPoint {
    x: f64,
    y: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    fn liq(hash: &str, minute: u32, debt_asset: &str, debt: f64, collat: f64, liquidator: &str) -> Liquidation {
        Liquidation {
            transaction_hash: hash.to_string(),
            timestamp: at(minute) + chrono::Duration::seconds(17),
            debt_asset: debt_asset.to_string(),
            debt_to_cover: debt,
            collateral_asset: "WETH".to_string(),
            liquidated_collateral_amount: collat,
            liquidator: liquidator.to_string(),
        }
    }

    #[test]
    fn test_shorten_address() {
        assert_eq!(
            shorten_address("0x1234567890abcdef1234567890abcdef12345678"),
            "0x1234…5678"
        );
        assert_eq!(shorten_address("0x12"), "0x12");
    }

    #[test]
    fn test_price_liquidation() {
        let l = liq("0xa", 0, "DAI", 1000.0, 0.5, "0xliquidator0001");
        let o = LiquidationOutcome::price(&l, 2200.0, 0.01);

        assert_eq!(o.collat_value_usd, 1100.0);
        assert_eq!(o.raw_profit_usd, 100.0);
        assert_eq!(o.raw_return_pct, 0.1);
        assert!((o.fees_usd - 22.0).abs() < 1e-9);
        assert!((o.profit_usd - 78.0).abs() < 1e-9);
        assert_eq!(o.return_pct, 0.078);
        assert_eq!(o.raw_effective_eth_price, 2000.0);
        assert!((o.effective_eth_price - 1000.0 / 1078.0 * 2200.0).abs() < 1e-9);
        assert_eq!(o.liquidator, "0xliqu…0001");
    }

    #[test]
    fn test_filter_eth_prices_drops_spikes_and_bounds() {
        let mut prices: Vec<EthPrice> = (0..50)
            .map(|m| EthPrice {
                timestamp: at(m),
                price: 2000.0 + m as f64,
            })
            .collect();
        prices[25].price = 5000.0;

        let filtered = filter_eth_prices(&prices, at(0), at(49));
        assert!(!filtered.contains_key(&at(25)));
        assert!(!filtered.contains_key(&at(26)));
        assert!(!filtered.contains_key(&at(0)));
        assert!(!filtered.contains_key(&at(49)));
        assert_eq!(filtered.get(&at(10)), Some(&2010.0));
    }

    #[test]
    fn test_price_liquidations_filters_and_dedups() {
        let eth: BTreeMap<NaiveDateTime, f64> = [(at(0), 2000.0), (at(1), 2000.0)].into_iter().collect();
        let fees = vec![
            TransactionFee { hash: "0xa".into(), gas_used: 1.0, gas_price: 0.0 },
            TransactionFee { hash: "0xc".into(), gas_used: 1.0, gas_price: 0.0 },
            TransactionFee { hash: "0xd".into(), gas_used: 1.0, gas_price: 0.0 },
        ];
        let fee_map = fees_by_hash(&fees);
        let liquidations = vec![
            liq("0xa", 1, "USDC", 1000.0, 0.525, "0xliquidator0001"),
            liq("0xa", 1, "USDC", 5000.0, 0.525, "0xliquidator0001"),
            liq("0xb", 0, "USDC", 1000.0, 0.525, "0xliquidator0001"),
            liq("0xc", 0, "WBTC", 1000.0, 0.525, "0xliquidator0001"),
            liq("0xd", 0, "DAI", 1000.0, 0.52, "0xliquidator0002"),
        ];

        let outcomes = price_liquidations(&liquidations, &eth, &fee_map);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].debt_asset, "DAI");
        assert_eq!(outcomes[1].debt_covered, 1000.0);
        assert_eq!(outcomes[1].return_pct, 0.05);
    }

    #[test]
    fn test_liquidator_rankings() {
        let stat = |name: &str, num_liqs: usize, total_profit: f64| LiquidatorStats {
            liquidator: name.to_string(),
            num_liqs,
            avg_return_pct: 0.05,
            total_profit,
            profit_per_liq: total_profit / num_liqs as f64,
        };
        let stats: Vec<LiquidatorStats> = (0..10)
            .map(|i| stat(&format!("l{i}"), 11 + i, 100.0 * (i as f64 + 1.0)))
            .chain([stat("small", 3, 50_000.0), stat("loser", 20, -10.0)])
            .collect();

        let top = top_decile(&stats);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].liquidator, "small");
        assert_eq!(top[1].liquidator, "l9");

        let regulars = regular_profitable(&stats);
        assert_eq!(regulars.len(), 10);
        assert_eq!(regulars[0].liquidator, "l9");
        assert!(regulars.iter().all(|s| s.liquidator != "small" && s.liquidator != "loser"));
    }

    #[test]
    fn test_run_study_end_to_end() {
        // Strictly growing changes, so only the first and last ticks are outliers
        let eth_prices: Vec<EthPrice> = (0..30)
            .map(|m| EthPrice {
                timestamp: at(m),
                price: 2000.0 + 0.01 * (m * m) as f64,
            })
            .collect();
        let mut liquidations = Vec::new();
        let mut fees = Vec::new();
        for i in 0..24u32 {
            let hash = format!("0x{i:02}");
            let collat = if i % 6 == 0 { 0.49 } else { 0.52 };
            liquidations.push(liq(&hash, 2 + i, "USDT", 1000.0, collat, "0xliquidator0001"));
            fees.push(TransactionFee {
                hash,
                gas_used: 100_000.0,
                gas_price: 20e9,
            });
        }

        let inputs = StudyInputs {
            liquidations,
            fees,
            eth_prices,
        };
        let study = run_study(&inputs, at(0), at(29)).unwrap();

        // 0.49 ETH at ~$2000 covers ~$980 of $1000 debt
        assert!((study.loss_share - 4.0 / 24.0).abs() < 1e-12);
        assert_eq!(study.outcomes.len(), 24);
        assert_eq!(study.regulars.len(), 1);
        assert_eq!(study.regulars[0].num_liqs, 24);
        assert!(study.render().contains("profit sum:"));
    }
}
