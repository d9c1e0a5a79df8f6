use serde_json::Value;
use std::time::Duration;

pub const HTTP_OK: u16 = 200;

/// Status used for exchanges that never produced a usable response
pub const SYNTHETIC_FAILURE_STATUS: u16 = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Parsed body of an HTTP 200 response
    Json(Value),
    /// Raw body of any other response
    Text(String),
}

/// One page (or single response) returned by the vendor API
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub data: ResponseBody,
    pub status: u16,
    pub duration: Duration,
    /// URL the page was requested from; `None` only for responses that cannot be replayed
    pub request_url: Option<String>,
    pub attempts: u32,
}

impl ApiResponse {
    pub fn new(data: ResponseBody, status: u16, duration: Duration, request_url: Option<String>) -> Self {
        Self {
            data,
            status,
            duration,
            request_url,
            attempts: 0,
        }
    }

    /// Response standing in for a request that did not complete
    pub fn synthetic_failure(duration: Duration, request_url: Option<String>) -> Self {
        let body = serde_json::json!({
            "status": SYNTHETIC_FAILURE_STATUS,
            "message": "Failed to complete HTTP request.",
        });
        Self::new(
            ResponseBody::Text(body.to_string()),
            SYNTHETIC_FAILURE_STATUS,
            duration,
            request_url,
        )
    }

    pub fn is_ok(&self) -> bool {
        self.status == HTTP_OK
    }

    pub fn increment_attempt(&mut self, by: Option<u32>) {
        self.attempts += by.unwrap_or(1);
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.data {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    /// `payload` object of a successful vendor response
    pub fn payload(&self) -> Option<&Value> {
        self.json()
            .and_then(|v| v.get("payload"))
            .filter(|p| !p.is_null())
    }

    /// `payload.data` of a successful vendor response
    pub fn payload_data(&self) -> Option<&Value> {
        self.payload().and_then(|p| p.get("data")).filter(|d| !d.is_null())
    }
}
