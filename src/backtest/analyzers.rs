//! Post-run statistics over fills, round trips and the equity curve

use crate::backtest::types::{DrawdownStats, EquityPoint, RoundTrip, TradeAnalysis};

const TRADING_DAYS: f64 = 252.0;

pub fn analyze_trades(round_trips: &[RoundTrip]) -> TradeAnalysis {
    let mut analysis = TradeAnalysis::default();
    let mut win_streak = 0;
    let mut loss_streak = 0;

    for trip in round_trips {
        if !trip.is_closed() {
            analysis.total_open += 1;
            continue;
        }

        analysis.total_closed += 1;
        analysis.pnl_net_total += trip.pnl_net;
        if trip.pnl_net >= 0.0 {
            analysis.won += 1;
            win_streak += 1;
            loss_streak = 0;
        } else {
            analysis.lost += 1;
            loss_streak += 1;
            win_streak = 0;
        }
        analysis.longest_win_streak = analysis.longest_win_streak.max(win_streak);
        analysis.longest_loss_streak = analysis.longest_loss_streak.max(loss_streak);
    }

    if analysis.total_closed > 0 {
        analysis.strike_rate = Some(analysis.won as f64 / analysis.total_closed as f64 * 100.0);
        analysis.pnl_net_average = Some(analysis.pnl_net_total / analysis.total_closed as f64);
    }
    analysis
}

pub fn calculate_drawdown(equity_curve: &[EquityPoint], initial_capital: f64) -> DrawdownStats {
    let mut stats = DrawdownStats::default();
    if equity_curve.is_empty() {
        return stats;
    }

    let mut max_equity = initial_capital;
    let mut len = 0;

    for point in equity_curve {
        if point.equity >= max_equity {
            max_equity = point.equity;
            len = 0;
        } else {
            len += 1;
        }

        let drawdown = max_equity - point.equity;
        stats.moneydown = drawdown;
        stats.drawdown_pct = if max_equity > 0.0 { drawdown / max_equity * 100.0 } else { 0.0 };
        stats.max_drawdown_len = stats.max_drawdown_len.max(len);
        // Money and percent maxima can come from different drawdowns
        stats.max_drawdown = stats.max_drawdown.max(drawdown);
        stats.max_drawdown_pct = stats.max_drawdown_pct.max(stats.drawdown_pct);
    }

    stats
}

fn returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0].equity != 0.0)
        .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
        .collect()
}

/// Annualized Sharpe ratio of daily returns, risk-free rate 0
pub fn calculate_sharpe_ratio(equity_curve: &[EquityPoint]) -> Option<f64> {
    let returns = returns(equity_curve);
    if returns.is_empty() {
        return None;
    }

    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean_return).powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return None;
    }

    Some(mean_return / std_dev * TRADING_DAYS.sqrt())
}

pub fn calculate_sortino_ratio(equity_curve: &[EquityPoint]) -> Option<f64> {
    let returns = returns(equity_curve);
    if returns.is_empty() {
        return None;
    }

    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside_variance = returns
        .iter()
        .filter(|r| **r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let downside_std = downside_variance.sqrt();

    if downside_std == 0.0 {
        return None;
    }

    Some(mean_return / downside_std * TRADING_DAYS.sqrt())
}

/// System Quality Number over closed round trips: `sqrt(n) * mean(pnl) / std(pnl)`
pub fn calculate_sqn(round_trips: &[RoundTrip]) -> Option<f64> {
    let pnl: Vec<f64> = round_trips
        .iter()
        .filter(|t| t.is_closed())
        .map(|t| t.pnl_net)
        .collect();
    if pnl.len() < 2 {
        return None;
    }

    let n = pnl.len() as f64;
    let mean = pnl.iter().sum::<f64>() / n;
    let std_dev = (pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std_dev == 0.0 {
        return None;
    }
    Some(n.sqrt() * mean / std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: u64, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp,
            equity,
            cash: equity,
            position_value: 0.0,
        }
    }

    fn closed(pnl_net: f64) -> RoundTrip {
        RoundTrip {
            opened_at: 0,
            closed_at: Some(1),
            size: 1.0,
            entry_price: 100.0,
            exit_price: Some(100.0 + pnl_net),
            pnl: pnl_net,
            pnl_net,
            commission: 0.0,
            bars: 1,
        }
    }

    #[test]
    fn test_trade_analysis_streaks() {
        let mut trips = vec![closed(10.0), closed(5.0), closed(-3.0), closed(-1.0), closed(-2.0), closed(4.0)];
        let mut open = closed(0.0);
        open.closed_at = None;
        trips.push(open);

        let analysis = analyze_trades(&trips);
        assert_eq!(analysis.total_open, 1);
        assert_eq!(analysis.total_closed, 6);
        assert_eq!(analysis.won, 3);
        assert_eq!(analysis.lost, 3);
        assert_eq!(analysis.longest_win_streak, 2);
        assert_eq!(analysis.longest_loss_streak, 3);
        assert_eq!(analysis.strike_rate, Some(50.0));
        assert!((analysis.pnl_net_total - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_analysis_empty() {
        let analysis = analyze_trades(&[]);
        assert_eq!(analysis.total_closed, 0);
        assert!(analysis.strike_rate.is_none());
        assert!(analysis.pnl_net_average.is_none());
    }

    #[test]
    fn test_drawdown() {
        let curve = vec![point(0, 100.0), point(1, 120.0), point(2, 90.0), point(3, 108.0)];
        let stats = calculate_drawdown(&curve, 100.0);
        assert!((stats.max_drawdown - 30.0).abs() < 1e-9);
        assert!((stats.max_drawdown_pct - 25.0).abs() < 1e-9);
        assert!((stats.moneydown - 12.0).abs() < 1e-9);
        assert!((stats.drawdown_pct - 10.0).abs() < 1e-9);
        assert_eq!(stats.max_drawdown_len, 2);
    }

    #[test]
    fn test_max_drawdown_pct_from_deepest_drawdown() {
        // 100 -> 50 is -50%; 1000 -> 900 loses more money but only 10%
        let curve = vec![
            point(0, 100.0),
            point(1, 50.0),
            point(2, 1000.0),
            point(3, 900.0),
            point(4, 1000.0),
        ];
        let stats = calculate_drawdown(&curve, 100.0);
        assert!((stats.max_drawdown - 100.0).abs() < 1e-9);
        assert!((stats.max_drawdown_pct - 50.0).abs() < 1e-9);
        assert_eq!(stats.drawdown_pct, 0.0);
    }

    #[test]
    fn test_sharpe_flat_curve_is_undefined() {
        let curve = vec![point(0, 100.0), point(1, 100.0), point(2, 100.0)];
        assert!(calculate_sharpe_ratio(&curve).is_none());
        assert!(calculate_sortino_ratio(&curve).is_none());
    }

    #[test]
    fn test_sharpe_sign() {
        let curve = vec![point(0, 100.0), point(1, 102.0), point(2, 101.0), point(3, 104.0)];
        assert!(calculate_sharpe_ratio(&curve).unwrap() > 0.0);
        assert!(calculate_sortino_ratio(&curve).unwrap() > 0.0);
    }

    #[test]
    fn test_sqn() {
        assert!(calculate_sqn(&[closed(1.0)]).is_none());
        let sqn = calculate_sqn(&[closed(1.0), closed(3.0)]).unwrap();
        // mean 2, population std 1
        assert!((sqn - 2.0 * 2f64.sqrt()).abs() < 1e-9);
    }
}
