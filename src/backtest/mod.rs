pub mod analyzers;
pub mod engine;
pub mod fills;
pub mod strategy;
pub mod types;

pub use engine::simulate;
pub use strategy::{BuyAndHold, MacdSmaStf, MacdSmaStfParams, Strategy, StrategyState};
pub use types::{
    EquityPoint, OrderKind, OrderRequest, RoundTrip, Side, SimConfig, SimResult, Trade,
    TradeAnalysis,
};
