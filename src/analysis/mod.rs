pub mod liquidations;
pub mod stats;
pub mod volume;

pub use liquidations::{load_inputs, run_study, LiquidationStudy};
pub use stats::Describe;
pub use volume::{monthly_volumes, top_exchanges_with_others, write_monthly_volume_csv, MonthlyVolume};
