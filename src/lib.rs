pub mod analysis;
pub mod backtest;
pub mod cli;
pub mod client;
pub mod config;
pub mod data;
pub mod datasets;
pub mod error;
pub mod fees;
pub mod indicators;
pub mod liquidity;
pub mod notify;
pub mod portfolio;
pub mod report;
pub mod util;
pub mod whale;
