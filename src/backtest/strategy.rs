use anyhow::Result;

use crate::backtest::types::OrderRequest;
use crate::data::types::Bar;
use crate::indicators::{IndicatorEvaluator, MacdIndicator, RingBuffer, SmaIndicator};

/// What a strategy sees of the broker on each bar
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyState {
    pub bar_index: usize,
    pub position_size: f64,
    pub cash: f64,
    pub has_pending_order: bool,
}

impl StrategyState {
    pub fn is_flat(&self) -> bool {
        self.position_size.abs() < 1e-10
    }
}

pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Bars needed before the strategy can signal
    fn warmup(&self) -> usize;

    /// Called once per bar, after pending orders have been processed
    fn on_bar(&mut self, bar: &Bar, state: &StrategyState) -> Result<Option<OrderRequest>>;
}

/// Enter once with the sizer and hold
#[derive(Debug, Default)]
pub struct BuyAndHold;

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn warmup(&self) -> usize {
        1
    }

    fn on_bar(&mut self, _bar: &Bar, state: &StrategyState) -> Result<Option<OrderRequest>> {
        if state.is_flat() && !state.has_pending_order {
            return Ok(Some(OrderRequest::market_buy()));
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct MacdSmaStfParams {
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub trail_percent: f64,
    pub sma_period: usize,
    /// Lag over which the SMA slope is measured
    pub dir_period: usize,
}

impl Default for MacdSmaStfParams {
    fn default() -> Self {
        Self {
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            trail_percent: 0.40,
            sma_period: 30,
            dir_period: 10,
        }
    }
}

/// Long-only: buy on a MACD cross-up while the SMA is falling and price is
/// below the stock-to-flow model, then protect the position with a trailing stop.
pub struct MacdSmaStf {
    params: MacdSmaStfParams,
    macd: MacdIndicator,
    sma: SmaIndicator,
    sma_history: RingBuffer,
    prev_diff: Option<f64>,
}

impl MacdSmaStf {
    pub fn new(params: MacdSmaStfParams) -> Result<Self> {
        if !(0.0..1.0).contains(&params.trail_percent) {
            anyhow::bail!("Trailing percent must be in [0, 1), got {}", params.trail_percent);
        }
        Ok(Self {
            macd: MacdIndicator::new(params.macd_fast, params.macd_slow, params.macd_signal, "close")?,
            sma: SmaIndicator::new(params.sma_period, "close")?,
            sma_history: RingBuffer::new(params.dir_period + 1),
            prev_diff: None,
            params,
        })
    }

    /// SMA now minus SMA `dir_period` bars ago
    fn sma_direction(&self) -> Option<f64> {
        if !self.sma_history.is_full() {
            return None;
        }
        Some(self.sma_history.get(0)? - self.sma_history.get(self.params.dir_period)?)
    }
}

impl Strategy for MacdSmaStf {
    fn name(&self) -> &str {
        "macd_sma_stf"
    }

    fn warmup(&self) -> usize {
        self.macd.warmup().max(self.params.sma_period + self.params.dir_period)
    }

    fn on_bar(&mut self, bar: &Bar, state: &StrategyState) -> Result<Option<OrderRequest>> {
        self.macd.update(bar)?;
        self.sma.update(bar)?;
        if let Some(sma) = self.sma.current() {
            self.sma_history.push(sma);
        }

        let cross_up = if self.macd.is_ready() {
            let diff = self.macd.macd() - self.macd.signal();
            let crossed = matches!(self.prev_diff, Some(prev) if prev < 0.0 && diff > 0.0);
            self.prev_diff = Some(diff);
            crossed
        } else {
            false
        };

        if state.has_pending_order {
            return Ok(None);
        }

        if state.is_flat() {
            let Some(sma_dir) = self.sma_direction() else {
                return Ok(None);
            };
            let below_model = bar.stf.is_some_and(|stf| bar.close < stf);
            if cross_up && sma_dir < 0.0 && below_model {
                return Ok(Some(OrderRequest::market_buy()));
            }
            return Ok(None);
        }

        Ok(Some(OrderRequest::trailing_stop_sell(self.params.trail_percent)))
    }
}
