use serde_json::Value;
use std::time::Duration;
use tracing::{error, warn};

use crate::client::response::HTTP_OK;
use crate::client::{ApiClient, ResponseBody};
use crate::error::{Result, ToolkitError};

/// Vendor message that marks a throttled request
pub const TOO_MANY_REQUESTS: &str = "Too Many Requests";

/// Fixed-count retry with a fixed pause between attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            delay: Duration::from_secs(2),
        }
    }
}

/// GET `path` until it answers 200, pausing `policy.delay` after each failure.
///
/// Returns the JSON body, or `None` once every attempt has failed.
pub async fn fetch_with_retry(
    client: &ApiClient,
    path: &str,
    query: &[(String, String)],
    policy: RetryPolicy,
) -> Option<Value> {
    for attempt in 1..=policy.total_attempts() {
        let response = client.call_endpoint(path, query, &[], None).await;
        if let ResponseBody::Json(json) = response.data {
            if response.status == HTTP_OK {
                return Some(json);
            }
        }
        warn!(
            path,
            attempt,
            status = response.status,
            "Request failed, retrying in {:?}",
            policy.delay
        );
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }
    None
}

fn body_message(data: &ResponseBody) -> Option<String> {
    let value = match data {
        ResponseBody::Json(v) => v.clone(),
        ResponseBody::Text(t) => serde_json::from_str::<Value>(t).ok()?,
    };
    value.get("message").and_then(Value::as_str).map(str::to_string)
}

fn body_status(data: &ResponseBody, http_status: u16) -> u16 {
    let embedded = match data {
        ResponseBody::Json(v) => v.get("status").and_then(Value::as_u64),
        ResponseBody::Text(t) => serde_json::from_str::<Value>(t)
            .ok()
            .and_then(|v| v.get("status").and_then(Value::as_u64)),
    };
    embedded.map(|s| s as u16).unwrap_or(http_status)
}

/// GET `path`, retrying while the vendor answers "Too Many Requests".
///
/// Any other non-200 status is logged and yields `Ok(None)`. Gives up with
/// [`ToolkitError::RateLimited`] once `max_rate_limit_retries` is spent.
pub async fn call_with_rate_limit_retry(
    client: &ApiClient,
    path: &str,
    query: &[(String, String)],
    max_rate_limit_retries: u32,
    delay: Duration,
) -> Result<Option<Value>> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let response = client.call_endpoint(path, query, &[], None).await;

        if body_message(&response.data).as_deref() == Some(TOO_MANY_REQUESTS) {
            if attempts > max_rate_limit_retries {
                return Err(ToolkitError::RateLimited { attempts });
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            continue;
        }

        let status = body_status(&response.data, response.status);
        if status != HTTP_OK || response.status != HTTP_OK {
            error!(
                "error calling GET {}",
                response.request_url.as_deref().unwrap_or(path)
            );
            return Ok(None);
        }

        return Ok(match response.data {
            ResponseBody::Json(mut json) => json
                .get_mut("payload")
                .map(Value::take)
                .filter(|p| !p.is_null()),
            ResponseBody::Text(_) => None,
        });
    }
}
