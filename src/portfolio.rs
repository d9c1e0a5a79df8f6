use std::collections::HashMap;

use crate::backtest::types::{RoundTrip, Side, Trade};

#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    /// Long-only; zero when flat
    pub size: f64,
    pub entry_price: f64,
}

#[derive(Debug, Clone)]
pub struct Portfolio {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    open_trips: HashMap<String, RoundTrip>,
    closed_trips: Vec<RoundTrip>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            positions: HashMap::new(),
            open_trips: HashMap::new(),
            closed_trips: Vec::new(),
        }
    }

    pub fn get_position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.size).unwrap_or(0.0)
    }

    pub fn get_position_value(&self, symbol: &str, current_price: f64) -> f64 {
        self.get_position(symbol) * current_price
    }

    pub fn total_equity(&self, symbol: &str, current_price: f64) -> f64 {
        self.cash + self.get_position_value(symbol, current_price)
    }

    /// Apply a fill to cash, position and the round-trip ledger
    pub fn execute_trade(&mut self, trade: &Trade) {
        let position = self
            .positions
            .entry(trade.symbol.clone())
            .or_insert_with(|| Position {
                symbol: trade.symbol.clone(),
                size: 0.0,
                entry_price: trade.price,
            });

        let side = if trade.side == Side::Buy.as_str() { Side::Buy } else { Side::Sell };
        let notional = trade.size * trade.price;

        match side {
            Side::Buy => {
                if position.size == 0.0 {
                    position.entry_price = trade.price;
                    position.size = trade.size;
                } else {
                    let total_cost = position.size * position.entry_price + notional;
                    position.size += trade.size;
                    position.entry_price = total_cost / position.size;
                }
                self.cash -= notional + trade.fee;

                let trip = self
                    .open_trips
                    .entry(trade.symbol.clone())
                    .or_insert_with(|| RoundTrip {
                        opened_at: trade.timestamp,
                        closed_at: None,
                        size: 0.0,
                        entry_price: trade.price,
                        exit_price: None,
                        pnl: 0.0,
                        pnl_net: 0.0,
                        commission: 0.0,
                        bars: 0,
                    });
                trip.size = position.size;
                trip.entry_price = position.entry_price;
                trip.commission += trade.fee;
            }
            Side::Sell => {
                let entry_price = position.entry_price;
                let closed = trade.size.min(position.size);
                position.size -= closed;
                if position.size.abs() < 1e-10 {
                    position.size = 0.0;
                }
                self.cash += notional - trade.fee;

                if let Some(trip) = self.open_trips.get_mut(&trade.symbol) {
                    trip.pnl += (trade.price - entry_price) * closed;
                    trip.commission += trade.fee;
                    trip.exit_price = Some(trade.price);
                }
                if position.size == 0.0 {
                    if let Some(mut trip) = self.open_trips.remove(&trade.symbol) {
                        trip.closed_at = Some(trade.timestamp);
                        trip.pnl_net = trip.pnl - trip.commission;
                        self.closed_trips.push(trip);
                    }
                }
            }
        }
    }

    /// Count a bar against every open round trip
    pub fn tick(&mut self) {
        for trip in self.open_trips.values_mut() {
            trip.bars += 1;
        }
    }

    /// Closed round trips followed by the ones still open, marked to `current_price`
    pub fn round_trips(&self, current_price: f64) -> Vec<RoundTrip> {
        let mut trips = self.closed_trips.clone();
        let mut open: Vec<RoundTrip> = self
            .open_trips
            .values()
            .map(|trip| {
                let mut trip = trip.clone();
                trip.pnl += (current_price - trip.entry_price) * trip.size;
                trip.pnl_net = trip.pnl - trip.commission;
                trip
            })
            .collect();
        open.sort_by_key(|t| t.opened_at);
        trips.extend(open);
        trips
    }
}
