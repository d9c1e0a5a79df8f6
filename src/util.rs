use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Validate that a symbol/instrument name is safe to use in URLs and file names
pub fn validate_symbol(symbol: &str) -> Result<()> {
    if symbol.contains("..") || symbol.contains('/') || symbol.contains('\\') {
        anyhow::bail!("Invalid symbol: contains path traversal characters");
    }

    if symbol.is_empty() || symbol.len() > 40 {
        anyhow::bail!("Invalid symbol: must be 1-40 characters");
    }

    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        anyhow::bail!("Invalid symbol: only alphanumeric characters, '_' and '-' allowed");
    }

    Ok(())
}

/// Parse a CLI date argument (`YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`)
pub fn parse_date_arg(value: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", value, e))?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Parse the timestamp formats the vendor emits.
///
/// Handles the `hr` format (`2021-01-01 00:00:00 000`), RFC 3339, naive ISO
/// date-times, plain dates and epoch milliseconds.
pub fn parse_vendor_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.chars().all(|c| c.is_ascii_digit()) {
        let ms: i64 = value.parse().ok()?;
        return Utc.timestamp_millis_opt(ms).single();
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // `hr` format: trailing milliseconds separated by a space
    if let Some((head, millis)) = value.rsplit_once(' ') {
        if millis.len() == 3 && millis.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S") {
                let ms: i64 = millis.parse().ok()?;
                return Some(Utc.from_utc_datetime(&dt) + chrono::Duration::milliseconds(ms));
            }
        }
    }

    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Format a window bound the way the vendor query parameters expect
pub fn format_query_time(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Serde adapter writing date-times as `2021-01-01 00:00:00.000` and reading
/// back anything [`parse_vendor_timestamp`] accepts
pub mod csv_datetime {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_vendor_timestamp(&raw)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}

/// Numbers arrive either as JSON numbers or as decimal strings
pub fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Epoch milliseconds to a naive UTC date-time
pub fn from_epoch_millis(ms: i64) -> Option<NaiveDateTime> {
    Utc.timestamp_millis_opt(ms).single().map(|dt| dt.naive_utc())
}
