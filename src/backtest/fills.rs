use crate::backtest::types::{Order, OrderKind, OrderStatus, Side};
use crate::data::types::Bar;
use crate::fees::FeeCalculator;

pub struct FillResult {
    pub filled_sz: f64,
    pub fill_price: f64,
    pub order_status: OrderStatus,
}

/// Largest size affordable at `price` once commission is included
pub fn affordable_size(cash: f64, price: f64, fee_calc: &FeeCalculator) -> f64 {
    if price <= 0.0 || cash <= 0.0 {
        return 0.0;
    }
    let unit_cost = price * (1.0 + fee_calc.commission_rate().max(0.0));
    cash / unit_cost
}

/// Try to execute `order` against `bar`.
///
/// Market orders fill at the open. Buys are capped at what the cash can pay
/// for; sells are capped at the open position. A trailing stop fills once the
/// bar's low reaches the stop, at the open when the bar gaps through it.
/// An untouched stop ratchets up with the close and stays pending (`None`).
pub fn process_order_fill(
    order: &mut Order,
    bar: &Bar,
    cash: f64,
    position: f64,
    fee_calc: &FeeCalculator,
) -> Option<FillResult> {
    match order.kind {
        OrderKind::Market => {
            let fill_price = fee_calc.apply_slippage(bar.open, order.side == Side::Buy);
            let filled_sz = match order.side {
                Side::Buy => order.size.min(affordable_size(cash, fill_price, fee_calc)),
                Side::Sell => order.size.min(position),
            };

            if filled_sz <= 0.0 {
                return Some(FillResult {
                    filled_sz: 0.0,
                    fill_price,
                    order_status: OrderStatus::Canceled,
                });
            }

            Some(FillResult {
                filled_sz,
                fill_price,
                order_status: OrderStatus::Filled,
            })
        }
        OrderKind::StopTrail { trail_percent } => {
            if position <= 0.0 {
                return Some(FillResult {
                    filled_sz: 0.0,
                    fill_price: bar.open,
                    order_status: OrderStatus::Canceled,
                });
            }

            let stop = order.stop_price.unwrap_or(bar.close * (1.0 - trail_percent));
            if bar.low <= stop {
                let trigger_price = bar.open.min(stop);
                return Some(FillResult {
                    filled_sz: order.size.min(position),
                    fill_price: fee_calc.apply_slippage(trigger_price, false),
                    order_status: OrderStatus::Filled,
                });
            }

            let ratcheted = bar.close * (1.0 - trail_percent);
            order.stop_price = Some(stop.max(ratcheted));
            None
        }
    }
}
