//! Liquidation study over a dataset written to disk

use amberdata_toolkit::analysis::{load_inputs, run_study};
use amberdata_toolkit::data::write_records;
use amberdata_toolkit::datasets::defi::{ETHER_PRICE_FILE, LIQUIDATIONS_FILE, TRANSACTION_FEES_FILE};
use amberdata_toolkit::datasets::{EthPrice, Liquidation, TransactionFee};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;

fn at(minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2022, 3, 1)
        .unwrap()
        .and_hms_opt(8, minute, 0)
        .unwrap()
}

fn write_dataset(dir: &Path) {
    let prices: Vec<EthPrice> = (0..40)
        .map(|m| EthPrice {
            timestamp: at(m),
            price: 3000.0 + 0.02 * (m * m) as f64,
        })
        .collect();

    let mut liquidations = Vec::new();
    let mut fees = Vec::new();
    for i in 0..30u32 {
        let hash = format!("0x{:04x}", i);
        // Two liquidators; the second one is always a little more generous
        let (liquidator, collateral) = if i % 3 == 0 {
            ("0x9999999999999999999999999999999999999999", 0.36)
        } else {
            ("0x1111111111111111111111111111111111111111", 0.35)
        };
        liquidations.push(Liquidation {
            transaction_hash: hash.clone(),
            timestamp: at(2 + i) + chrono::Duration::seconds(41),
            debt_asset: "DAI".to_string(),
            debt_to_cover: 1000.0,
            collateral_asset: "WETH".to_string(),
            liquidated_collateral_amount: collateral,
            liquidator: liquidator.to_string(),
        });
        fees.push(TransactionFee {
            hash,
            gas_used: 250_000.0,
            gas_price: 30e9,
        });
    }
    // Non-stablecoin debt is left out of the study
    liquidations.push(Liquidation {
        transaction_hash: "0xffff".to_string(),
        timestamp: at(5),
        debt_asset: "WBTC".to_string(),
        debt_to_cover: 0.1,
        collateral_asset: "WETH".to_string(),
        liquidated_collateral_amount: 2.0,
        liquidator: "0x1111111111111111111111111111111111111111".to_string(),
    });

    write_records(&liquidations, dir.join(LIQUIDATIONS_FILE)).unwrap();
    write_records(&fees, dir.join(TRANSACTION_FEES_FILE)).unwrap();
    write_records(&prices, dir.join(ETHER_PRICE_FILE)).unwrap();
}

#[test]
fn test_study_from_files() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());

    let inputs = load_inputs(dir.path()).unwrap();
    assert_eq!(inputs.liquidations.len(), 31);
    assert_eq!(inputs.fees.len(), 30);
    assert_eq!(inputs.eth_prices.len(), 40);

    let study = run_study(&inputs, at(0), at(39)).unwrap();
    assert_eq!(study.outcomes.len(), 30);
    assert!(study.outcomes.iter().all(|o| o.return_pct > -0.03 && o.return_pct < 0.1));
    assert_eq!(study.loss_share, 0.0);
    assert!(study.profit_sum > 0.0);
    assert_eq!(study.returns.count, 30);
    assert!(study.top_decile_profit_share > 0.0 && study.top_decile_profit_share <= 1.0);

    let out = dir.path().join("charts");
    std::fs::create_dir_all(&out).unwrap();
    study.write_outputs(&out).unwrap();
    for name in [
        "liquidation_returns.csv",
        "top_liquidators.csv",
        "regular_liquidators.csv",
        "debt_vs_return.csv",
    ] {
        assert!(out.join(name).exists(), "missing {}", name);
    }
}

#[test]
fn test_study_outside_the_period_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let inputs = load_inputs(dir.path()).unwrap();

    let later = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let much_later = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    assert!(run_study(&inputs, later, much_later).is_err());
}

#[test]
fn test_missing_dataset_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_inputs(dir.path()).is_err());
}
