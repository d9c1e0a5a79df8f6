use crate::data::types::Bar;

/// Ring buffer for efficient rolling window calculations
pub struct RingBuffer {
    buffer: Box<[f64]>,
    index: usize,
    size: usize,
    count: usize,
    sum: f64,
}

impl RingBuffer {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            buffer: vec![0.0; size].into_boxed_slice(),
            index: 0,
            size,
            count: 0,
            sum: 0.0,
        }
    }

    /// Push a value and return the one it displaced (0.0 until the buffer is full)
    #[inline]
    pub fn push(&mut self, value: f64) -> f64 {
        let old_value = std::mem::replace(&mut self.buffer[self.index], value);
        self.sum = self.sum - old_value + value;
        self.index = if self.index + 1 == self.size { 0 } else { self.index + 1 };
        self.count = (self.count + 1).min(self.size);
        old_value
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Value `offset` pushes ago; 0 is the most recent
    pub fn get(&self, offset: usize) -> Option<f64> {
        if offset >= self.count {
            return None;
        }
        let idx = (self.index + self.size - 1 - offset) % self.size;
        Some(self.buffer[idx])
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.size
    }

    pub fn capacity(&self) -> usize {
        self.size
    }
}

/// Extract the price series a bar indicator runs on
#[inline]
pub fn get_price(bar: &Bar, source: &str) -> f64 {
    match source {
        "" | "close" => bar.close,
        "open" => bar.open,
        "high" => bar.high,
        "low" => bar.low,
        "hl2" => (bar.high + bar.low) * 0.5,
        "hlc3" => (bar.high + bar.low + bar.close) / 3.0,
        "ohlc4" => (bar.open + bar.high + bar.low + bar.close) * 0.25,
        _ => bar.close,
    }
}
