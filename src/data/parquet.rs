use anyhow::{Context, Result};
use arrow::array::{Array, Float64Array, UInt64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::backtest::types::{EquityPoint, Trade};
use crate::data::types::Bar;

fn write_batch(path: &Path, schema: SchemaRef, batch: RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Export bars to Parquet; `stf` is a nullable column
pub fn export_bars_to_parquet(bars: &[Bar], path: impl AsRef<Path>) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::UInt64, false),
        Field::new("open", DataType::Float64, false),
        Field::new("high", DataType::Float64, false),
        Field::new("low", DataType::Float64, false),
        Field::new("close", DataType::Float64, false),
        Field::new("volume", DataType::Float64, false),
        Field::new("stf", DataType::Float64, true),
    ]));

    let timestamp: UInt64Array = bars.iter().map(|b| b.timestamp).collect();
    let open: Float64Array = bars.iter().map(|b| b.open).collect();
    let high: Float64Array = bars.iter().map(|b| b.high).collect();
    let low: Float64Array = bars.iter().map(|b| b.low).collect();
    let close: Float64Array = bars.iter().map(|b| b.close).collect();
    let volume: Float64Array = bars.iter().map(|b| b.volume).collect();
    let stf: Float64Array = bars.iter().map(|b| b.stf).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(timestamp),
            Arc::new(open),
            Arc::new(high),
            Arc::new(low),
            Arc::new(close),
            Arc::new(volume),
            Arc::new(stf),
        ],
    )?;

    write_batch(path.as_ref(), schema, batch)
}

/// Read bars written by [`export_bars_to_parquet`]
pub fn read_bars_from_parquet(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut bars = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;

        let timestamp = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .context("Failed to read timestamp column")?;
        let float_column = |idx: usize, name: &str| -> Result<Float64Array> {
            batch
                .column(idx)
                .as_any()
                .downcast_ref::<Float64Array>()
                .cloned()
                .with_context(|| format!("Failed to read {} column", name))
        };
        let open = float_column(1, "open")?;
        let high = float_column(2, "high")?;
        let low = float_column(3, "low")?;
        let close = float_column(4, "close")?;
        let volume = float_column(5, "volume")?;
        let stf = float_column(6, "stf")?;

        for i in 0..batch.num_rows() {
            bars.push(Bar {
                timestamp: timestamp.value(i),
                open: open.value(i),
                high: high.value(i),
                low: low.value(i),
                close: close.value(i),
                volume: volume.value(i),
                stf: (!stf.is_null(i)).then(|| stf.value(i)),
            });
        }
    }

    Ok(bars)
}

/// Export fills to Parquet format
pub fn export_trades_to_parquet(trades: &[Trade], path: impl AsRef<Path>) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::UInt64, false),
        Field::new("symbol", DataType::Utf8, false),
        Field::new("side", DataType::Utf8, false),
        Field::new("size", DataType::Float64, false),
        Field::new("price", DataType::Float64, false),
        Field::new("fee", DataType::Float64, false),
        Field::new("order_id", DataType::UInt64, false),
    ]));

    let timestamp: UInt64Array = trades.iter().map(|t| t.timestamp).collect();
    let symbol: StringArray = trades.iter().map(|t| Some(t.symbol.as_str())).collect();
    let side: StringArray = trades.iter().map(|t| Some(t.side.as_str())).collect();
    let size: Float64Array = trades.iter().map(|t| t.size).collect();
    let price: Float64Array = trades.iter().map(|t| t.price).collect();
    let fee: Float64Array = trades.iter().map(|t| t.fee).collect();
    let order_id: UInt64Array = trades.iter().map(|t| t.order_id).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(timestamp),
            Arc::new(symbol),
            Arc::new(side),
            Arc::new(size),
            Arc::new(price),
            Arc::new(fee),
            Arc::new(order_id),
        ],
    )?;

    write_batch(path.as_ref(), schema, batch)
}

/// Export equity curve to Parquet format
pub fn export_equity_to_parquet(equity_curve: &[EquityPoint], path: impl AsRef<Path>) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::UInt64, false),
        Field::new("equity", DataType::Float64, false),
        Field::new("cash", DataType::Float64, false),
        Field::new("position_value", DataType::Float64, false),
    ]));

    let timestamp: UInt64Array = equity_curve.iter().map(|e| e.timestamp).collect();
    let equity: Float64Array = equity_curve.iter().map(|e| e.equity).collect();
    let cash: Float64Array = equity_curve.iter().map(|e| e.cash).collect();
    let position_value: Float64Array = equity_curve.iter().map(|e| e.position_value).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(timestamp),
            Arc::new(equity),
            Arc::new(cash),
            Arc::new(position_value),
        ],
    )?;

    write_batch(path.as_ref(), schema, batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parquet_roundtrip_keeps_missing_stf() {
        let bars = vec![
            Bar {
                timestamp: 1609459200000,
                open: 29000.0,
                high: 29500.0,
                low: 28800.0,
                close: 29300.0,
                volume: 1000.0,
                stf: Some(55000.0),
            },
            Bar {
                timestamp: 1609545600000,
                open: 29300.0,
                high: 29800.0,
                low: 29100.0,
                close: 29600.0,
                volume: 1200.0,
                stf: None,
            },
        ];

        let dir = tempdir().unwrap();
        let path = dir.path().join("bars.parquet");

        export_bars_to_parquet(&bars, &path).unwrap();
        let loaded = read_bars_from_parquet(&path).unwrap();

        assert_eq!(loaded, bars);
    }
}
