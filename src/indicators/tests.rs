use crate::data::types::Bar;
use crate::indicators::{EmaIndicator, IndicatorEvaluator, MacdIndicator, RingBuffer, SmaIndicator};

fn create_test_bar(day: u64, close: f64) -> Bar {
    Bar {
        timestamp: day * 86_400_000,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1000.0,
        stf: None,
    }
}

#[test]
fn test_ring_buffer_history() {
    let mut buffer = RingBuffer::new(3);
    assert!(buffer.is_empty());
    buffer.push(1.0);
    buffer.push(2.0);
    assert!(!buffer.is_full());
    assert_eq!(buffer.get(0), Some(2.0));
    assert_eq!(buffer.get(2), None);

    buffer.push(3.0);
    let evicted = buffer.push(4.0);
    assert_eq!(evicted, 1.0);
    assert!(buffer.is_full());
    assert_eq!(buffer.get(2), Some(2.0));
    assert!((buffer.mean() - 3.0).abs() < 1e-12);
}

#[test]
fn test_ring_buffer_zero_values_still_fill() {
    let mut buffer = RingBuffer::new(2);
    buffer.push(0.0);
    assert!(!buffer.is_full());
    buffer.push(0.0);
    assert!(buffer.is_full());
}

#[test]
fn test_sma() {
    let mut sma = SmaIndicator::new(3, "close").unwrap();
    let bars = [
        create_test_bar(0, 11.0),
        create_test_bar(1, 12.0),
        create_test_bar(2, 13.0),
    ];

    sma.update(&bars[0]).unwrap();
    assert!(!sma.is_ready());
    for bar in &bars[1..] {
        sma.update(bar).unwrap();
    }

    assert!(sma.is_ready());
    assert!((sma.value("value").unwrap() - 12.0).abs() < 0.001);
}

#[test]
fn test_ema_seeded_with_sma() {
    let mut ema = EmaIndicator::new(3, "close").unwrap();
    for (i, close) in [10.0, 11.0, 12.0].iter().enumerate() {
        ema.update(&create_test_bar(i as u64, *close)).unwrap();
    }
    assert!((ema.value("value").unwrap() - 11.0).abs() < 1e-12);

    ema.update(&create_test_bar(3, 15.0)).unwrap();
    // alpha = 0.5
    assert!((ema.value("value").unwrap() - 13.0).abs() < 1e-12);
}

#[test]
fn test_macd_warmup_and_outputs() {
    let mut macd = MacdIndicator::new(12, 26, 9, "close").unwrap();
    assert_eq!(macd.warmup(), 34);

    for i in 0..33 {
        macd.update(&create_test_bar(i, 100.0 + i as f64 * 0.5)).unwrap();
    }
    assert!(!macd.is_ready());

    macd.update(&create_test_bar(33, 116.5)).unwrap();
    assert!(macd.is_ready());

    let macd_value = macd.value("macd").unwrap();
    let signal_value = macd.value("signal").unwrap();
    let histogram_value = macd.value("histogram").unwrap();
    assert!(macd_value > 0.0);
    assert!((histogram_value - (macd_value - signal_value)).abs() < 0.001);
}

#[test]
fn test_macd_rejects_bad_periods() {
    assert!(MacdIndicator::new(26, 12, 9, "close").is_err());
    assert!(SmaIndicator::new(0, "close").is_err());
}
