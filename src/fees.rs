#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    commission_bps: i16,
    slippage_bps: u16,
}

impl FeeCalculator {
    pub fn new(commission_bps: i16, slippage_bps: u16) -> Self {
        Self {
            commission_bps,
            slippage_bps,
        }
    }

    pub fn calculate_fee(&self, notional: f64) -> f64 {
        // Negative commission means rebate
        notional * self.commission_bps as f64 / 10000.0
    }

    /// Fraction of notional charged as commission
    pub fn commission_rate(&self) -> f64 {
        self.commission_bps as f64 / 10000.0
    }

    pub fn apply_slippage(&self, price: f64, is_buy: bool) -> f64 {
        let slippage_factor = self.slippage_bps as f64 / 10000.0;
        if is_buy {
            price * (1.0 + slippage_factor)
        } else {
            price * (1.0 - slippage_factor)
        }
    }
}
