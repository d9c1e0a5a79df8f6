//! Fetchers for the vendor datasets the studies and backtests run on

pub mod defi;
pub mod derivatives;
pub mod market;
pub mod orderbook;

pub use defi::{download_liquidation_dataset, EthPrice, Liquidation, TransactionFee};
pub use derivatives::{fetch_funding_rates, fetch_open_interest};
pub use market::{
    fetch_exchange_volumes, fetch_reference_rates, load_backtest_bars, BarRequest, ReferenceRate,
    StfSource,
};
pub use orderbook::{collect_liquidity, SnapshotQuery};
