//! Error types for the vendor client and the alerting pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolkitError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: gave up after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Missing field in vendor response: {0}")]
    MissingField(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Notification error: {0}")]
    Notify(String),
}

pub type Result<T> = std::result::Result<T, ToolkitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ToolkitError::Api {
            status: 429,
            message: "Too Many Requests".to_string(),
        };
        assert_eq!(err.to_string(), "API error 429: Too Many Requests");
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: ToolkitError = parse.unwrap_err().into();
        assert!(matches!(err, ToolkitError::Json(_)));
    }
}
