pub mod csv_rows;
pub mod ohlcv;
pub mod parquet;
pub mod types;
pub mod windows;

pub use csv_rows::{read_records, write_json_rows_csv, write_records};
pub use ohlcv::{join_stf, parse_ohlcv_csv, parse_stf_csv, OHLCV_FIELDS};
pub use parquet::{
    export_bars_to_parquet, export_equity_to_parquet, export_trades_to_parquet,
    read_bars_from_parquet,
};
pub use types::Bar;
pub use windows::{date_windows, full_windows, WindowStep};
