use anyhow::Result;

use crate::data::types::Bar;
use crate::indicators::utils::{get_price, RingBuffer};
use crate::indicators::IndicatorEvaluator;

// SMA - Simple Moving Average
pub struct SmaIndicator {
    buffer: RingBuffer,
    length: usize,
    source: String,
}

impl SmaIndicator {
    pub fn new(length: usize, source: impl Into<String>) -> Result<Self> {
        if length == 0 {
            anyhow::bail!("SMA length must be positive");
        }
        Ok(Self {
            buffer: RingBuffer::new(length),
            length,
            source: source.into(),
        })
    }

    /// Feed a raw value instead of a bar field
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.buffer.push(value);
    }

    pub fn current(&self) -> Option<f64> {
        self.buffer.is_full().then(|| self.buffer.mean())
    }
}

impl IndicatorEvaluator for SmaIndicator {
    fn warmup(&self) -> usize {
        self.length
    }

    #[inline]
    fn update(&mut self, bar: &Bar) -> Result<()> {
        self.push(get_price(bar, &self.source));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.buffer.is_full()
    }

    fn value(&self, output: &str) -> Result<f64> {
        match output {
            "value" => Ok(self.buffer.mean()),
            _ => anyhow::bail!("Unknown SMA output: {}", output),
        }
    }

    fn reset(&mut self) {
        self.buffer = RingBuffer::new(self.length);
    }
}

// EMA - Exponential Moving Average, seeded with the SMA of the first `length` values
pub struct EmaIndicator {
    alpha: f64,
    value: f64,
    seed: RingBuffer,
    length: usize,
    source: String,
    initialized: bool,
}

impl EmaIndicator {
    pub fn new(length: usize, source: impl Into<String>) -> Result<Self> {
        if length == 0 {
            anyhow::bail!("EMA length must be positive");
        }
        Ok(Self {
            alpha: 2.0 / (length as f64 + 1.0),
            value: 0.0,
            seed: RingBuffer::new(length),
            length,
            source: source.into(),
            initialized: false,
        })
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        if self.initialized {
            self.value = (value - self.value).mul_add(self.alpha, self.value);
            return;
        }
        self.seed.push(value);
        if self.seed.is_full() {
            self.value = self.seed.mean();
            self.initialized = true;
        }
    }

    pub fn current(&self) -> Option<f64> {
        self.initialized.then_some(self.value)
    }
}

impl IndicatorEvaluator for EmaIndicator {
    fn warmup(&self) -> usize {
        self.length
    }

    #[inline]
    fn update(&mut self, bar: &Bar) -> Result<()> {
        self.push(get_price(bar, &self.source));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.initialized
    }

    fn value(&self, output: &str) -> Result<f64> {
        match output {
            "value" => Ok(self.value),
            _ => anyhow::bail!("Unknown EMA output: {}", output),
        }
    }

    fn reset(&mut self) {
        self.seed = RingBuffer::new(self.length);
        self.value = 0.0;
        self.initialized = false;
    }
}

// MACD - fast EMA minus slow EMA, with an EMA signal line over the MACD values
pub struct MacdIndicator {
    fast_ema: EmaIndicator,
    slow_ema: EmaIndicator,
    signal_ema: EmaIndicator,
    macd: f64,
    signal: f64,
    histogram: f64,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize, source: impl Into<String>) -> Result<Self> {
        if fast >= slow {
            anyhow::bail!("MACD fast period ({}) must be below slow period ({})", fast, slow);
        }
        let source = source.into();
        Ok(Self {
            fast_ema: EmaIndicator::new(fast, source.clone())?,
            slow_ema: EmaIndicator::new(slow, source)?,
            signal_ema: EmaIndicator::new(signal, "close")?,
            macd: 0.0,
            signal: 0.0,
            histogram: 0.0,
        })
    }

    pub fn macd(&self) -> f64 {
        self.macd
    }

    pub fn signal(&self) -> f64 {
        self.signal
    }
}

impl IndicatorEvaluator for MacdIndicator {
    fn warmup(&self) -> usize {
        self.slow_ema.warmup() + self.signal_ema.warmup() - 1
    }

    fn update(&mut self, bar: &Bar) -> Result<()> {
        self.fast_ema.update(bar)?;
        self.slow_ema.update(bar)?;

        let (Some(fast), Some(slow)) = (self.fast_ema.current(), self.slow_ema.current()) else {
            return Ok(());
        };
        self.macd = fast - slow;

        self.signal_ema.push(self.macd);
        if let Some(signal) = self.signal_ema.current() {
            self.signal = signal;
            self.histogram = self.macd - self.signal;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.signal_ema.is_ready()
    }

    fn value(&self, output: &str) -> Result<f64> {
        match output {
            "macd" => Ok(self.macd),
            "signal" => Ok(self.signal),
            "histogram" => Ok(self.histogram),
            _ => anyhow::bail!("Unknown MACD output: {}", output),
        }
    }

    fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.signal_ema.reset();
        self.macd = 0.0;
        self.signal = 0.0;
        self.histogram = 0.0;
    }
}
