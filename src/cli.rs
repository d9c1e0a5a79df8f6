use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::volume::TOP_EXCHANGES;
use crate::analysis::{load_inputs, monthly_volumes, run_study, top_exchanges_with_others, write_monthly_volume_csv};
use crate::backtest::{simulate, BuyAndHold, MacdSmaStf, MacdSmaStfParams, SimConfig, Strategy};
use crate::client::{ApiClient, FanOut, RetryPolicy};
use crate::config::Settings;
use crate::data::{export_bars_to_parquet, export_equity_to_parquet, export_trades_to_parquet};
use crate::datasets::defi::default_period;
use crate::datasets::derivatives::{
    funding_rates_file_name, open_interest_file_name, write_funding_rates, write_open_interest,
};
use crate::datasets::market::{exchange_volume_origin, reference_rate_origin, write_reference_rates};
use crate::datasets::{
    collect_liquidity, download_liquidation_dataset, fetch_exchange_volumes, fetch_funding_rates,
    fetch_open_interest, fetch_reference_rates, load_backtest_bars, BarRequest, SnapshotQuery, StfSource,
};
use crate::liquidity::{merge_across_exchanges, DEFAULT_STEP_BPS};
use crate::notify::{notifier_from_settings, Notifier};
use crate::report::{render_analysis, write_results};
use crate::whale::{stream_url, WhaleWatcher, DAI_CONTRACT, DEFAULT_THRESHOLD};

/// Validate that a symbol is safe to use in a URL path and file name
fn validate_symbol(symbol: &str) -> Result<()> {
    if symbol.contains("..") || symbol.contains('/') || symbol.contains('\\') {
        anyhow::bail!("Invalid symbol: contains path traversal characters");
    }

    if symbol.is_empty() || symbol.len() > 40 {
        anyhow::bail!("Invalid symbol: must be 1-40 characters");
    }

    if !symbol.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        anyhow::bail!("Invalid symbol: only alphanumeric characters, '_' and '-' allowed");
    }

    Ok(())
}

fn parse_date(raw: &str, what: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("Invalid {} date format (use YYYY-MM-DD)", what))
}

fn parse_datetime(raw: &str, what: &str) -> Result<NaiveDateTime> {
    Ok(parse_date(raw, what)?.and_time(chrono::NaiveTime::MIN))
}

fn optional_datetime(raw: Option<&str>, what: &str) -> Result<Option<NaiveDateTime>> {
    raw.map(|r| parse_datetime(r, what)).transpose()
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))
}

#[derive(Parser)]
#[command(name = "amberdata-toolkit")]
#[command(about = "Amberdata market data downloader, research studies and backtester")]
pub struct Cli {
    /// Optional TOML settings file (AMBERDATA_* environment variables override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    BuyAndHold,
    MacdSmaStf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download hourly funding rates for one futures instrument
    FundingRates {
        /// Futures exchange (e.g., binance, bitmex)
        #[arg(long)]
        exchange: String,
        /// Instrument symbol (e.g., BTCUSDT)
        #[arg(long)]
        instrument: String,
        /// End date (YYYY-MM-DD), defaults to now
        #[arg(long)]
        end: Option<String>,
        /// Output directory
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Download open interest across all exchanges listing an instrument
    OpenInterest {
        #[arg(long)]
        instrument: String,
        /// End date (YYYY-MM-DD), defaults to now
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Download hourly spot reference rates
    ReferenceRates {
        /// Asset symbol (e.g., btc, eth)
        #[arg(long)]
        asset: String,
        /// Start date (YYYY-MM-DD), defaults to 2010-01-01
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Output CSV path
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Monthly centralised-exchange volume, top exchanges plus the rest
    ExchangeVolume {
        /// Start date (YYYY-MM-DD), defaults to 2021-01-01
        #[arg(long)]
        start: Option<String>,
        #[arg(long, default_value_t = TOP_EXCHANGES)]
        top: usize,
        #[arg(long, default_value = "exchange_volume.csv")]
        out: PathBuf,
    },
    /// Order-book depth profile per snapshot
    Liquidity {
        /// Spot pair (e.g., btc_usd)
        #[arg(long)]
        instrument: String,
        #[arg(long, default_value = "gdax")]
        exchange: String,
        /// Start time as the vendor accepts it (e.g., 2021-06-01T00:00:00)
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<usize>,
        /// Bucket width in basis points of the mid price
        #[arg(long, default_value_t = DEFAULT_STEP_BPS)]
        step_bps: f64,
        /// Sum the profiles of each minute into one row set
        #[arg(long)]
        merge: bool,
        /// Output JSON path
        #[arg(long, default_value = "liquidity.json")]
        out: PathBuf,
    },
    /// Aave v2 liquidation profitability
    Aave {
        #[command(subcommand)]
        subcommand: AaveSubcommand,
    },
    /// Run a backtest on daily bars
    Backtest {
        #[arg(long, value_enum, default_value = "macd-sma-stf")]
        strategy: StrategyKind,
        /// OHLCV exchange
        #[arg(long, default_value = "gdax")]
        exchange: String,
        /// Market pair (e.g., btc_usd)
        #[arg(long, default_value = "btc_usd")]
        symbol: String,
        /// Asset of the stock-to-flow model
        #[arg(long, default_value = "btc")]
        asset: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long, default_value = "2015-04-21")]
        start: String,
        /// End date (YYYY-MM-DD)
        #[arg(long, default_value = "2020-05-09")]
        end: String,
        /// Initial capital in USD
        #[arg(long, default_value = "100000.0")]
        initial_capital: f64,
        /// Percent of cash committed per buy
        #[arg(long, default_value = "100.0")]
        percent_size: f64,
        /// Trailing stop distance as a fraction of price
        #[arg(long, default_value = "0.40")]
        trail_percent: f64,
        /// Commission in basis points
        #[arg(long, default_value = "0")]
        commission_bps: i16,
        /// Slippage in basis points
        #[arg(long, default_value = "0")]
        slippage_bps: u16,
        /// Stock-to-flow series joined onto the bars
        #[arg(long, value_enum, default_value = "stock-to-flow")]
        stf: StfSource,
        /// Output file path (JSON)
        #[arg(long, default_value = "results.json")]
        out: PathBuf,
        /// Export bars, trades and equity curve to Parquet
        #[arg(long)]
        parquet: Option<PathBuf>,
    },
    /// Alert on large ERC-20 transfers
    WhaleAlert {
        /// Alert above this many tokens
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,
        /// Token contract address
        #[arg(long, default_value = DAI_CONTRACT)]
        contract: String,
        /// Token symbol used in alert text
        #[arg(long, default_value = "DAI")]
        token: String,
    },
}

#[derive(Subcommand)]
pub enum AaveSubcommand {
    /// Download liquidations, transaction fees and ETH prices
    Fetch {
        /// Start date (YYYY-MM-DD), defaults to 2021-01-01
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD), defaults to 2024-01-01
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value = "aave_data")]
        dir: PathBuf,
    },
    /// Analyse a downloaded dataset
    Report {
        #[arg(long, default_value = "aave_data")]
        dir: PathBuf,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Directory for the chart tables, defaults to the dataset directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        // Reading a dataset already on disk needs no API key
        if let Commands::Aave {
            subcommand: AaveSubcommand::Report { dir, start, end, out_dir },
        } = &self.command
        {
            return aave_report(dir, start.as_deref(), end.as_deref(), out_dir.as_deref());
        }

        let settings = Settings::load(self.config.as_deref())?;
        let client = ApiClient::from_settings(&settings)?;

        match self.command {
            Commands::FundingRates {
                exchange,
                instrument,
                end,
                out_dir,
            } => {
                validate_symbol(&exchange)?;
                validate_symbol(&instrument)?;
                let end = optional_datetime(end.as_deref(), "end")?;

                let policy = RetryPolicy::new(4, settings.http.retry_delay());
                let rows = fetch_funding_rates(&client, &exchange, &instrument, end, policy).await?;

                create_dir(&out_dir)?;
                let path = out_dir.join(funding_rates_file_name(&exchange, &instrument));
                let count = write_funding_rates(&rows, &path)?;
                println!("Wrote {} funding rate rows to {}", count, path.display());
                Ok(())
            }
            Commands::OpenInterest { instrument, end, out_dir } => {
                validate_symbol(&instrument)?;
                let end = optional_datetime(end.as_deref(), "end")?;

                let rows = fetch_open_interest(&client, &instrument, end).await?;

                create_dir(&out_dir)?;
                let path = out_dir.join(open_interest_file_name(&instrument));
                let count = write_open_interest(&rows, &path)?;
                println!("Wrote {} open interest rows to {}", count, path.display());
                Ok(())
            }
            Commands::ReferenceRates { asset, start, end, out } => {
                validate_symbol(&asset)?;
                let start = optional_datetime(start.as_deref(), "start")?.unwrap_or_else(reference_rate_origin);
                let end = optional_datetime(end.as_deref(), "end")?;

                let rates = fetch_reference_rates(&client, &asset, start, end).await?;
                let path = out.unwrap_or_else(|| PathBuf::from(format!("{}_reference_rates.csv", asset)));
                let count = write_reference_rates(&rates, &path)?;
                println!("Wrote {} reference rates to {}", count, path.display());
                Ok(())
            }
            Commands::ExchangeVolume { start, top, out } => {
                let start = optional_datetime(start.as_deref(), "start")?.unwrap_or_else(exchange_volume_origin);

                let rows = fetch_exchange_volumes(&client, start, None).await;
                if rows.is_empty() {
                    anyhow::bail!("No exchange volume rows returned");
                }
                let table = top_exchanges_with_others(&monthly_volumes(&rows), top);
                let months = write_monthly_volume_csv(&table, &out)?;
                println!("Wrote {} months of exchange volume to {}", months, out.display());
                Ok(())
            }
            Commands::Liquidity {
                instrument,
                exchange,
                start,
                end,
                max_pages,
                step_bps,
                merge,
                out,
            } => {
                validate_symbol(&instrument)?;
                validate_symbol(&exchange)?;
                if step_bps.is_nan() || step_bps <= 0.0 {
                    anyhow::bail!("step_bps must be positive, got {}", step_bps);
                }

                let request = SnapshotQuery {
                    exchange,
                    start_date: start,
                    end_date: end,
                    max_pages,
                };
                let profiles = collect_liquidity(&client, &instrument, &request, step_bps).await;

                let json = if merge {
                    serde_json::to_string_pretty(&merge_across_exchanges(&profiles))?
                } else {
                    serde_json::to_string_pretty(&profiles)?
                };
                std::fs::write(&out, json).with_context(|| format!("Failed to write {}", out.display()))?;
                println!("Profiled {} snapshots into {}", profiles.len(), out.display());
                Ok(())
            }
            Commands::Aave { subcommand } => match subcommand {
                AaveSubcommand::Fetch { start, end, dir } => {
                    let (default_start, default_end) = default_period();
                    let start = optional_datetime(start.as_deref(), "start")?.unwrap_or(default_start);
                    let end = optional_datetime(end.as_deref(), "end")?.unwrap_or(default_end);
                    if start >= end {
                        anyhow::bail!("Start date must be before end date");
                    }

                    create_dir(&dir)?;
                    let fan_out = FanOut::from_settings(&settings.http);
                    let summary = download_liquidation_dataset(&client, start, end, &fan_out, &dir).await?;
                    println!(
                        "Downloaded {} liquidations, {} transaction fees and {} ETH prices into {}",
                        summary.liquidations,
                        summary.transaction_fees,
                        summary.eth_prices,
                        dir.display()
                    );
                    Ok(())
                }
                AaveSubcommand::Report { dir, start, end, out_dir } => {
                    aave_report(&dir, start.as_deref(), end.as_deref(), out_dir.as_deref())
                }
            },
            Commands::Backtest {
                strategy,
                exchange,
                symbol,
                asset,
                start,
                end,
                initial_capital,
                percent_size,
                trail_percent,
                commission_bps,
                slippage_bps,
                stf,
                out,
                parquet,
            } => {
                validate_symbol(&exchange)?;
                validate_symbol(&symbol)?;
                validate_symbol(&asset)?;
                let start_date = parse_date(&start, "start")?;
                let end_date = parse_date(&end, "end")?;
                if start_date >= end_date {
                    anyhow::bail!("Start date must be before end date");
                }

                let request = BarRequest {
                    exchange,
                    symbol: symbol.clone(),
                    asset,
                    start: start_date,
                    end: end_date,
                    stf: (strategy == StrategyKind::MacdSmaStf).then_some(stf),
                };
                let bars = load_backtest_bars(&client, &request).await?;
                if bars.is_empty() {
                    anyhow::bail!("No bars found for {symbol} in date range");
                }

                let mut strategy: Box<dyn Strategy> = match strategy {
                    StrategyKind::BuyAndHold => Box::new(BuyAndHold),
                    StrategyKind::MacdSmaStf => Box::new(MacdSmaStf::new(MacdSmaStfParams {
                        trail_percent,
                        ..MacdSmaStfParams::default()
                    })?),
                };
                let config = SimConfig {
                    symbol,
                    initial_capital,
                    percent_size,
                    commission_bps,
                    slippage_bps,
                };

                let result = simulate(&bars, strategy.as_mut(), &config)?;
                println!("{}", render_analysis(&result));

                write_results(&result, &out)?;
                println!("Backtest complete. Results written to {}", out.display());

                if let Some(parquet_dir) = parquet {
                    create_dir(&parquet_dir)?;

                    let bars_path = parquet_dir.join("bars.parquet");
                    export_bars_to_parquet(&bars, &bars_path)?;
                    println!("Exported {} bars to {}", bars.len(), bars_path.display());

                    let trades_path = parquet_dir.join("trades.parquet");
                    export_trades_to_parquet(&result.trades, &trades_path)?;
                    println!("Exported {} trades to {}", result.trades.len(), trades_path.display());

                    let equity_path = parquet_dir.join("equity.parquet");
                    export_equity_to_parquet(&result.equity_curve, &equity_path)?;
                    println!("Exported {} equity points to {}", result.equity_curve.len(), equity_path.display());
                }

                Ok(())
            }
            Commands::WhaleAlert {
                threshold,
                contract,
                token,
            } => {
                if !contract.starts_with("0x") || !contract[2..].chars().all(|c| c.is_ascii_hexdigit()) {
                    anyhow::bail!("Invalid contract address: {}", contract);
                }

                let notifier: Arc<dyn Notifier> = Arc::from(notifier_from_settings(settings.twilio.as_ref()));
                let watcher = WhaleWatcher::new(stream_url(&settings.websocket_url, &settings.api_key), notifier)
                    .with_contract(contract, token)
                    .with_threshold(threshold);
                watcher.run().await?;
                Ok(())
            }
        }
    }
}

fn aave_report(dir: &Path, start: Option<&str>, end: Option<&str>, out_dir: Option<&Path>) -> Result<()> {
    let (default_start, default_end) = default_period();
    let start = optional_datetime(start, "start")?.unwrap_or(default_start);
    let end = optional_datetime(end, "end")?.unwrap_or(default_end);

    let inputs = load_inputs(dir)?;
    let study = run_study(&inputs, start, end)?;
    println!("{}", study.render());

    let out_dir = out_dir.unwrap_or(dir);
    create_dir(out_dir)?;
    study.write_outputs(out_dir)?;
    println!("Chart tables written to {}", out_dir.display());
    Ok(())
}
