//! Monthly centralised-exchange volume, top five venues plus the rest

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::util::{parse_vendor_timestamp, value_as_f64};

pub const TOP_EXCHANGES: usize = 5;

/// `gdax` is reported under its current name, first letter capitalised
pub fn display_exchange_name(raw: &str) -> String {
    let renamed = raw.replace("gdax", "coinbase");
    let mut chars = renamed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Compact USD label used on the volume axis: `$1.2t`, `$3.4b`, otherwise the plain number
pub fn format_usd_compact(value: f64) -> String {
    if value > 1e12 {
        format!("${:.1}t", value / 1e12)
    } else if value > 1e9 {
        format!("${:.1}b", value / 1e9)
    } else {
        format!("{}", value)
    }
}

/// Last calendar day of the month `date` falls in
fn month_end(date: NaiveDate) -> NaiveDate {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

/// Exchange volume table: one row per month, one column per exchange
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyVolume {
    /// Month-end dates, ascending and without gaps
    pub months: Vec<NaiveDate>,
    pub columns: Vec<String>,
    /// `values[month][column]`
    pub values: Vec<Vec<f64>>,
}

impl MonthlyVolume {
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.values.iter().map(|row| row[idx]).collect())
    }

    pub fn month_labels(&self) -> Vec<String> {
        self.months.iter().map(|m| m.format("%B %Y").to_string()).collect()
    }

    pub fn totals(&self) -> Vec<f64> {
        self.values.iter().map(|row| row.iter().sum()).collect()
    }
}

/// Sum `volumeUSD` per exchange per calendar month.
///
/// Rows with an unreadable timestamp or volume are skipped. Months with no
/// rows between the first and last month are kept as zeros.
pub fn monthly_volumes(rows: &[Value]) -> MonthlyVolume {
    let mut sums: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
    let mut exchanges: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        let (Some(exchange), Some(ts), Some(volume)) = (
            row["exchange"].as_str(),
            row["timestamp"].as_str().and_then(parse_vendor_timestamp),
            value_as_f64(&row["volumeUSD"]),
        ) else {
            continue;
        };
        let name = display_exchange_name(exchange);
        *sums
            .entry(month_end(ts.date_naive()))
            .or_default()
            .entry(name.clone())
            .or_default() += volume;
        exchanges.insert(name);
    }

    let columns: Vec<String> = exchanges.into_iter().collect();
    let (Some(first), Some(last)) = (sums.keys().next().copied(), sums.keys().last().copied()) else {
        return MonthlyVolume {
            months: Vec::new(),
            columns,
            values: Vec::new(),
        };
    };

    let mut months = Vec::new();
    let mut month = first;
    while month <= last {
        months.push(month);
        match month.succ_opt() {
            Some(next) => month = month_end(next),
            None => break,
        }
    }

    let values = months
        .iter()
        .map(|m| {
            let row = sums.get(m);
            columns
                .iter()
                .map(|c| row.and_then(|r| r.get(c)).copied().unwrap_or(0.0))
                .collect()
        })
        .collect();

    MonthlyVolume { months, columns, values }
}

/// Keep the `top` exchanges by latest-month volume and fold the rest into one
/// `"{n} other exchanges"` column
pub fn top_exchanges_with_others(table: &MonthlyVolume, top: usize) -> MonthlyVolume {
    let Some(latest) = table.values.last() else {
        return table.clone();
    };

    // Stable sort keeps column order among equal volumes
    let mut ranked: Vec<usize> = (0..table.columns.len()).collect();
    ranked.sort_by(|a, b| latest[*b].total_cmp(&latest[*a]));
    let keep: Vec<usize> = ranked.iter().take(top).copied().collect();
    let others: Vec<usize> = ranked.iter().skip(top).copied().collect();

    let mut columns: Vec<String> = keep.iter().map(|i| table.columns[*i].clone()).collect();
    columns.push(format!("{} other exchanges", others.len()));

    let values = table
        .values
        .iter()
        .map(|row| {
            let mut out: Vec<f64> = keep.iter().map(|i| row[*i]).collect();
            out.push(others.iter().map(|i| row[*i]).sum());
            out
        })
        .collect();

    MonthlyVolume {
        months: table.months.clone(),
        columns,
        values,
    }
}

/// Write the chart table: month label, one column per exchange, and the compact total label
pub fn write_monthly_volume_csv(table: &MonthlyVolume, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;

    let mut header = vec!["month".to_string()];
    header.extend(table.columns.iter().cloned());
    header.push("total".to_string());
    wtr.write_record(&header)?;

    for ((label, row), total) in table.month_labels().iter().zip(&table.values).zip(table.totals()) {
        let mut record = vec![label.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        record.push(format_usd_compact(total));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(table.months.len())
}
