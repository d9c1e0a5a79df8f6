pub mod impls;
pub mod utils;

#[cfg(test)]
mod tests;

use anyhow::Result;

use crate::data::types::Bar;

pub use impls::{EmaIndicator, MacdIndicator, SmaIndicator};
pub use utils::RingBuffer;

pub trait IndicatorEvaluator: Send + Sync {
    /// Bars consumed before the first valid value
    fn warmup(&self) -> usize;
    fn update(&mut self, bar: &Bar) -> Result<()>;
    fn is_ready(&self) -> bool;
    fn value(&self, output: &str) -> Result<f64>;
    fn reset(&mut self);
}
