use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderKind {
    /// Fills at the next bar's open
    Market,
    /// Sell stop trailing the close by `trail_percent` (0.40 = 40%)
    StopTrail { trail_percent: f64 },
}

/// What a strategy asks the engine to do
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub kind: OrderKind,
    /// Explicit size; `None` lets the sizer (buys) or the open position (sells) decide
    pub size: Option<f64>,
}

impl OrderRequest {
    pub fn market_buy() -> Self {
        Self {
            side: Side::Buy,
            kind: OrderKind::Market,
            size: None,
        }
    }

    pub fn market_sell() -> Self {
        Self {
            side: Side::Sell,
            kind: OrderKind::Market,
            size: None,
        }
    }

    pub fn trailing_stop_sell(trail_percent: f64) -> Self {
        Self {
            side: Side::Sell,
            kind: OrderKind::StopTrail { trail_percent },
            size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    pub kind: OrderKind,
    pub size: f64,
    pub created_at: u64,
    /// Current trigger for stop orders
    pub stop_price: Option<f64>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub symbol: String,
    pub initial_capital: f64,
    /// Percent of cash committed per buy
    pub percent_size: f64,
    pub commission_bps: i16,
    pub slippage_bps: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            symbol: "btc_usd".to_string(),
            initial_capital: 100_000.0,
            percent_size: 100.0,
            commission_bps: 0,
            slippage_bps: 0,
        }
    }
}

/// One executed fill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: u64,
    pub symbol: String,
    pub side: String,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    pub order_id: u64,
}

impl Trade {
    /// Signed amount: positive for buys, negative for sells
    pub fn amount(&self) -> f64 {
        if self.side == Side::Buy.as_str() {
            self.size
        } else {
            -self.size
        }
    }

    /// Cash flow of the fill, before fees
    pub fn value(&self) -> f64 {
        -self.amount() * self.price
    }
}

/// A position from first entry until it is flat again
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTrip {
    pub opened_at: u64,
    pub closed_at: Option<u64>,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl: f64,
    pub pnl_net: f64,
    pub commission: f64,
    pub bars: usize,
}

impl RoundTrip {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: u64,
    pub equity: f64,
    pub cash: f64,
    pub position_value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeAnalysis {
    pub total_open: usize,
    pub total_closed: usize,
    pub won: usize,
    pub lost: usize,
    pub longest_win_streak: usize,
    pub longest_loss_streak: usize,
    /// Won / closed, in percent
    pub strike_rate: Option<f64>,
    pub pnl_net_total: f64,
    pub pnl_net_average: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawdownStats {
    /// Drawdown at the last bar, in percent
    pub drawdown_pct: f64,
    /// Drawdown at the last bar, in money
    pub moneydown: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    /// Longest run of bars below the running peak
    pub max_drawdown_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimResult {
    pub strategy: String,
    pub symbol: String,
    pub trades: Vec<Trade>,
    pub round_trips: Vec<RoundTrip>,
    pub equity_curve: Vec<EquityPoint>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub total_return_pct: f64,
    pub num_trades: usize,
    pub trade_analysis: TradeAnalysis,
    pub drawdown: DrawdownStats,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub sqn: Option<f64>,
}
