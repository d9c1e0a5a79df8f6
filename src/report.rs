use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::backtest::types::SimResult;

const NA: &str = "-";

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "  {:<24} : {:<24}", label, value);
}

fn money(value: f64) -> String {
    format!("${:.2}", value)
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| NA.to_string())
}

fn format_ms(ms: u64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|dt| dt.format("%Y/%m/%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Fixed-width summary of a backtest run
pub fn render_analysis(result: &SimResult) -> String {
    let ta = &result.trade_analysis;
    let mut out = String::new();

    let _ = writeln!(out, "Backtesting Results ({} on {})", result.strategy, result.symbol);
    row(&mut out, "Open Positions", ta.total_open);
    row(&mut out, "Closed Trades", ta.total_closed);
    row(&mut out, "Winning Trades", ta.won);
    row(&mut out, "Losing Trades", ta.lost);
    out.push('\n');

    row(&mut out, "Longest Winning Streak", ta.longest_win_streak);
    row(&mut out, "Longest Losing Streak", ta.longest_loss_streak);
    row(
        &mut out,
        "Strike Rate (Win/closed)",
        opt(ta.strike_rate.map(|r| format!("{:.2}", r))),
    );
    out.push('\n');

    row(&mut out, "Initial Portfolio Value", money(result.initial_capital));
    row(&mut out, "Final Portfolio Value", money(result.final_equity));
    row(
        &mut out,
        "Net P/L",
        if ta.total_closed > 0 { money(ta.pnl_net_total) } else { NA.to_string() },
    );
    row(&mut out, "P/L Average per trade", opt(ta.pnl_net_average.map(money)));
    out.push('\n');

    row(&mut out, "Drawdown", format!("{:.2}%", result.drawdown.drawdown_pct));
    row(&mut out, "Max Drawdown", format!("{:.2}%", result.drawdown.max_drawdown_pct));
    row(&mut out, "Sharpe Ratio", opt(result.sharpe_ratio.map(|s| format!("{:.4}", s))));
    row(&mut out, "Sortino Ratio", opt(result.sortino_ratio.map(|s| format!("{:.4}", s))));
    row(&mut out, "SQN", opt(result.sqn.map(|s| format!("{:.2}", s))));
    out.push('\n');

    let _ = writeln!(out, "Transactions");
    let _ = writeln!(
        out,
        "  {:<24} {:<24} {:<16} {:<8} {:<8} {:<16}",
        "Date", "Amount", "Price", "SID", "Symbol", "Value"
    );
    for trade in &result.trades {
        let _ = writeln!(
            out,
            "  {:<24} {:<24.8} {:<16.2} {:<8} {:<8} {:<16.2}",
            format_ms(trade.timestamp),
            trade.amount(),
            trade.price,
            0,
            trade.symbol,
            trade.value()
        );
    }

    out
}

fn sibling(out_path: &Path, suffix: &str) -> PathBuf {
    let base_path = out_path.parent().unwrap_or(Path::new("."));
    let base_name = out_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    base_path.join(format!("{}_{}.csv", base_name, suffix))
}

pub fn write_results(result: &SimResult, out_path: &Path) -> Result<()> {
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let json_str = serde_json::to_string_pretty(result)?;
    std::fs::write(out_path, json_str)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;

    let mut wtr = csv::Writer::from_path(sibling(out_path, "trades"))?;
    wtr.write_record(["timestamp", "symbol", "side", "size", "price", "fee", "order_id"])?;
    for trade in &result.trades {
        wtr.write_record(&[
            trade.timestamp.to_string(),
            trade.symbol.clone(),
            trade.side.clone(),
            trade.size.to_string(),
            trade.price.to_string(),
            trade.fee.to_string(),
            trade.order_id.to_string(),
        ])?;
    }
    wtr.flush()?;

    let mut wtr = csv::Writer::from_path(sibling(out_path, "equity"))?;
    wtr.write_record(["timestamp", "equity", "cash", "position_value"])?;
    for point in &result.equity_curve {
        wtr.write_record(&[
            point.timestamp.to_string(),
            point.equity.to_string(),
            point.cash.to_string(),
            point.position_value.to_string(),
        ])?;
    }
    wtr.flush()?;

    let mut wtr = csv::Writer::from_path(sibling(out_path, "transactions"))?;
    wtr.write_record(["date", "amount", "price", "sid", "symbol", "value"])?;
    for trade in &result.trades {
        wtr.write_record(&[
            format_ms(trade.timestamp),
            trade.amount().to_string(),
            trade.price.to_string(),
            "0".to_string(),
            trade.symbol.clone(),
            trade.value().to_string(),
        ])?;
    }
    wtr.flush()?;

    Ok(())
}
