use anyhow::Result;
use tracing::{debug, info};

use crate::backtest::analyzers::{
    analyze_trades, calculate_drawdown, calculate_sharpe_ratio, calculate_sortino_ratio,
    calculate_sqn,
};
use crate::backtest::fills::process_order_fill;
use crate::backtest::strategy::{Strategy, StrategyState};
use crate::backtest::types::{
    EquityPoint, Order, OrderKind, OrderRequest, OrderStatus, Side, SimConfig, SimResult, Trade,
};
use crate::data::types::Bar;
use crate::fees::FeeCalculator;
use crate::portfolio::Portfolio;

/// Run `strategy` over daily bars.
///
/// Each bar first settles the pending order against its prices, then lets the
/// strategy react to the bar's close, then marks the portfolio to the close.
/// Orders placed on a bar are therefore executed from the next bar onward.
pub fn simulate(bars: &[Bar], strategy: &mut dyn Strategy, config: &SimConfig) -> Result<SimResult> {
    if config.initial_capital <= 0.0 {
        anyhow::bail!("Initial capital must be positive");
    }
    if config.percent_size <= 0.0 || config.percent_size > 100.0 {
        anyhow::bail!("Percent size must be in (0, 100], got {}", config.percent_size);
    }

    let warmup = strategy.warmup();
    if bars.len() < warmup {
        anyhow::bail!(
            "Not enough bars: need at least {}, got {}",
            warmup,
            bars.len()
        );
    }

    let fee_calc = FeeCalculator::new(config.commission_bps, config.slippage_bps);
    let mut portfolio = Portfolio::new(config.initial_capital);
    let symbol = config.symbol.as_str();

    let mut pending: Option<Order> = None;
    let mut next_order_id = 1u64;
    let mut trades = Vec::new();
    let mut equity_curve = Vec::with_capacity(bars.len());

    for (idx, bar) in bars.iter().enumerate() {
        portfolio.tick();

        if let Some(order) = pending.as_mut() {
            let position = portfolio.get_position(symbol);
            if let Some(fill) = process_order_fill(order, bar, portfolio.cash, position, &fee_calc) {
                if fill.order_status == OrderStatus::Filled {
                    let fee = fee_calc.calculate_fee(fill.filled_sz * fill.fill_price);
                    let trade = Trade {
                        timestamp: bar.timestamp,
                        symbol: symbol.to_string(),
                        side: order.side.as_str().to_string(),
                        size: fill.filled_sz,
                        price: fill.fill_price,
                        fee,
                        order_id: order.id,
                    };
                    debug!(order_id = order.id, side = %trade.side, size = trade.size, price = trade.price, "Order filled");
                    portfolio.execute_trade(&trade);
                    trades.push(trade);
                } else {
                    debug!(order_id = order.id, "Order canceled");
                }
                order.status = fill.order_status;
                pending = None;
            }
        }

        let state = StrategyState {
            bar_index: idx,
            position_size: portfolio.get_position(symbol),
            cash: portfolio.cash,
            has_pending_order: pending.is_some(),
        };
        if let Some(request) = strategy.on_bar(bar, &state)? {
            if pending.is_none() {
                pending = create_order(&request, bar, &portfolio, config, next_order_id);
                if pending.is_some() {
                    next_order_id += 1;
                }
            }
        }

        equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: portfolio.total_equity(symbol, bar.close),
            cash: portfolio.cash,
            position_value: portfolio.get_position_value(symbol, bar.close),
        });
    }

    let last_close = bars.last().map(|b| b.close).unwrap_or(0.0);
    let round_trips = portfolio.round_trips(last_close);

    let final_equity = equity_curve
        .last()
        .map(|e| e.equity)
        .unwrap_or(config.initial_capital);
    let total_return = final_equity - config.initial_capital;
    let total_return_pct = (total_return / config.initial_capital) * 100.0;

    let trade_analysis = analyze_trades(&round_trips);
    let drawdown = calculate_drawdown(&equity_curve, config.initial_capital);
    let sharpe_ratio = calculate_sharpe_ratio(&equity_curve);
    let sortino_ratio = calculate_sortino_ratio(&equity_curve);
    let sqn = calculate_sqn(&round_trips);

    info!(
        strategy = strategy.name(),
        bars = bars.len(),
        fills = trades.len(),
        final_equity,
        "Backtest finished"
    );

    let num_trades = trades.len();
    Ok(SimResult {
        strategy: strategy.name().to_string(),
        symbol: symbol.to_string(),
        trades,
        round_trips,
        equity_curve,
        initial_capital: config.initial_capital,
        final_equity,
        total_return,
        total_return_pct,
        num_trades,
        trade_analysis,
        drawdown,
        sharpe_ratio,
        sortino_ratio,
        sqn,
    })
}

fn create_order(
    request: &OrderRequest,
    bar: &Bar,
    portfolio: &Portfolio,
    config: &SimConfig,
    order_id: u64,
) -> Option<Order> {
    let position = portfolio.get_position(&config.symbol);

    let size = match (request.side, request.size) {
        (_, Some(size)) => size,
        // Percent sizer, valued at the signal bar's close
        (Side::Buy, None) => portfolio.cash * config.percent_size / 100.0 / bar.close,
        (Side::Sell, None) => position,
    };
    if size.is_nan() || size <= 0.0 {
        return None;
    }

    let stop_price = match request.kind {
        OrderKind::Market => None,
        OrderKind::StopTrail { trail_percent } => Some(bar.close * (1.0 - trail_percent)),
    };

    Some(Order {
        id: order_id,
        side: request.side,
        kind: request.kind,
        size,
        created_at: bar.timestamp,
        stop_price,
        status: OrderStatus::Pending,
    })
}
