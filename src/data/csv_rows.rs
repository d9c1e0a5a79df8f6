//! CSV export for loosely-shaped JSON records

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Column names in first-seen order across all object rows
pub fn collect_columns(rows: &[Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
    }
    columns
}

/// Render a JSON scalar as a CSV cell; nested values are written as JSON text
pub fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Write JSON objects as CSV rows. Missing keys become empty cells.
pub fn write_json_rows_csv(rows: &[Value], path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let columns = collect_columns(rows);
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    if !columns.is_empty() {
        wtr.write_record(&columns)?;
    }

    let mut written = 0;
    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let record: Vec<String> = columns.iter().map(|c| cell(obj.get(c))).collect();
        wtr.write_record(&record)?;
        written += 1;
    }
    wtr.flush()?;

    Ok(written)
}

/// Write typed records with a header row taken from the field names
pub fn write_records<T: Serialize>(records: &[T], path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(records.len())
}

/// Read typed records written by [`write_records`] (or any headed CSV)
pub fn read_records<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut records = Vec::new();
    for (idx, row) in reader.deserialize().enumerate() {
        let record: T = row.with_context(|| format!("Bad row {} in {}", idx + 1, path.display()))?;
        records.push(record);
    }
    Ok(records)
}
