//! Integration tests for the backtesting engine

use amberdata_toolkit::backtest::{
    simulate, BuyAndHold, OrderRequest, SimConfig, Strategy, StrategyState,
};
use amberdata_toolkit::data::types::Bar;
use amberdata_toolkit::report::{render_analysis, write_results};

const DAY_MS: u64 = 86_400_000;

fn bar(day: u64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: 1_577_836_800_000 + day * DAY_MS,
        open,
        high,
        low,
        close,
        volume: 10.0,
        stf: None,
    }
}

fn rising_bars(count: u64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let price = 100.0 + i as f64;
            bar(i, price, price + 1.0, price - 1.0, price)
        })
        .collect()
}

/// Buys once, then protects the position with a trailing stop
struct EnterThenTrail {
    entered: bool,
    trail_percent: f64,
}

impl Strategy for EnterThenTrail {
    fn name(&self) -> &str {
        "enter_then_trail"
    }

    fn warmup(&self) -> usize {
        1
    }

    fn on_bar(&mut self, _bar: &Bar, state: &StrategyState) -> anyhow::Result<Option<OrderRequest>> {
        if state.has_pending_order {
            return Ok(None);
        }
        if state.is_flat() {
            if self.entered {
                return Ok(None);
            }
            self.entered = true;
            return Ok(Some(OrderRequest::market_buy()));
        }
        Ok(Some(OrderRequest::trailing_stop_sell(self.trail_percent)))
    }
}

#[test]
fn test_buy_and_hold_fills_next_open_capped_at_cash() {
    let bars = rising_bars(10);
    let result = simulate(&bars, &mut BuyAndHold, &SimConfig::default()).unwrap();

    assert_eq!(result.num_trades, 1);
    let buy = &result.trades[0];
    assert_eq!(buy.side, "BUY");
    assert_eq!(buy.timestamp, bars[1].timestamp);
    assert_eq!(buy.price, 101.0);
    // Sized at the signal close (100) but only 100_000 / 101 is affordable
    assert!((buy.size - 100_000.0 / 101.0).abs() < 1e-9);

    let last = result.equity_curve.last().unwrap();
    assert!(last.cash.abs() < 1e-6);
    assert!((result.final_equity - buy.size * 109.0).abs() < 1e-6);
    assert_eq!(result.equity_curve.len(), bars.len());
    assert_eq!(result.trade_analysis.total_open, 1);
    assert_eq!(result.trade_analysis.total_closed, 0);
}

#[test]
fn test_trailing_stop_ratchets_then_fills_at_stop() {
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(1, 100.0, 100.0, 100.0, 100.0),
        // Stop starts at 90, ratchets to 108 on this close
        bar(2, 110.0, 121.0, 118.0, 120.0),
        // Low breaches 108; open is above the stop so the fill is at the stop
        bar(3, 115.0, 116.0, 100.0, 105.0),
        bar(4, 130.0, 131.0, 129.0, 130.0),
    ];
    let mut strategy = EnterThenTrail {
        entered: false,
        trail_percent: 0.10,
    };
    let result = simulate(&bars, &mut strategy, &SimConfig::default()).unwrap();

    assert_eq!(result.num_trades, 2);
    let sell = &result.trades[1];
    assert_eq!(sell.side, "SELL");
    assert_eq!(sell.timestamp, bars[3].timestamp);
    assert!((sell.price - 108.0).abs() < 1e-9);
    assert!((sell.size - 1000.0).abs() < 1e-9);

    assert!((result.final_equity - 108_000.0).abs() < 1e-6);
    assert_eq!(result.trade_analysis.total_closed, 1);
    assert_eq!(result.trade_analysis.won, 1);
    assert!((result.trade_analysis.pnl_net_total - 8_000.0).abs() < 1e-6);
}

#[test]
fn test_stop_gap_fills_at_open() {
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(1, 100.0, 100.0, 100.0, 100.0),
        // Gaps straight through the 90 stop
        bar(2, 80.0, 82.0, 75.0, 78.0),
    ];
    let mut strategy = EnterThenTrail {
        entered: false,
        trail_percent: 0.10,
    };
    let result = simulate(&bars, &mut strategy, &SimConfig::default()).unwrap();

    assert_eq!(result.num_trades, 2);
    assert_eq!(result.trades[1].price, 80.0);
    assert_eq!(result.trade_analysis.lost, 1);
}

#[test]
fn test_commission_reduces_equity() {
    let bars = rising_bars(5);
    let free = simulate(&bars, &mut BuyAndHold, &SimConfig::default()).unwrap();
    let config = SimConfig {
        commission_bps: 10,
        ..SimConfig::default()
    };
    let charged = simulate(&bars, &mut BuyAndHold, &config).unwrap();

    assert!(charged.trades[0].fee > 0.0);
    assert!(charged.final_equity < free.final_equity);
}

#[test]
fn test_percent_size_leaves_cash() {
    let bars = rising_bars(5);
    let config = SimConfig {
        percent_size: 50.0,
        ..SimConfig::default()
    };
    let result = simulate(&bars, &mut BuyAndHold, &config).unwrap();

    // 50% of cash at the signal close of 100
    assert!((result.trades[0].size - 500.0).abs() < 1e-9);
    let last = result.equity_curve.last().unwrap();
    assert!((last.cash - (100_000.0 - 500.0 * 101.0)).abs() < 1e-6);
}

#[test]
fn test_rejects_bad_config() {
    let bars = rising_bars(5);
    let zero_capital = SimConfig {
        initial_capital: 0.0,
        ..SimConfig::default()
    };
    assert!(simulate(&bars, &mut BuyAndHold, &zero_capital).is_err());

    let oversized = SimConfig {
        percent_size: 150.0,
        ..SimConfig::default()
    };
    assert!(simulate(&bars, &mut BuyAndHold, &oversized).is_err());
    assert!(simulate(&[], &mut BuyAndHold, &SimConfig::default()).is_err());
}

#[test]
fn test_reports_written_next_to_results() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run").join("results.json");
    let result = simulate(&rising_bars(10), &mut BuyAndHold, &SimConfig::default()).unwrap();

    write_results(&result, &out).unwrap();
    for name in [
        "results.json",
        "results_trades.csv",
        "results_equity.csv",
        "results_transactions.csv",
    ] {
        assert!(dir.path().join("run").join(name).exists(), "missing {}", name);
    }

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(json["strategy"], "buy_and_hold");
    assert_eq!(json["num_trades"], 1);

    let summary = render_analysis(&result);
    assert!(summary.contains("buy_and_hold"));
}
