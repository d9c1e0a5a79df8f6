//! Amberdata REST client
//!
//! Every request carries the `x-api-key` header. Single calls never fail at
//! this layer: transport problems come back as a synthetic 500 response so the
//! pagination and retry helpers can decide what to do with them.

pub mod fanout;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod paginate;
pub mod response;
pub mod retry;
pub mod transport;

pub use fanout::{parallel_payloads, FanOut, Progress};
pub use paginate::{next_page_url, NextPageExtractor, Paginator, MAX_PAGE_ATTEMPTS};
pub use response::{ApiResponse, ResponseBody, HTTP_OK};
pub use retry::{call_with_rate_limit_retry, fetch_with_retry, RetryPolicy};
pub use transport::{RawResponse, ReqwestTransport, Transport};

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Result, ToolkitError};

pub const PRODUCTION_BASE_URL: &str = "https://api.amberdata.com";
pub const LEGACY_WEBSOCKET_URL: &str = "wss://ws.web3api.io";

/// Owned query parameters, in request order
pub type Query = Vec<(String, String)>;

/// Build a [`Query`] from borrowed pairs
pub fn query(pairs: &[(&str, &str)]) -> Query {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    api_key: String,
    base_url: String,
    max_page_attempts: u32,
}

impl ApiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let transport = ReqwestTransport::new(timeout)?;
        Ok(Self::with_transport(Arc::new(transport), api_key, base_url))
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            settings.api_key.clone(),
            settings.base_url.clone(),
            settings.http.timeout(),
        )?
        .with_max_page_attempts(settings.http.max_page_attempts))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_page_attempts: MAX_PAGE_ATTEMPTS,
        }
    }

    pub fn with_max_page_attempts(mut self, attempts: u32) -> Self {
        self.max_page_attempts = attempts.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_page_attempts(&self) -> u32 {
        self.max_page_attempts
    }

    /// Resolve a resource path against the base URL.
    ///
    /// Pre-formed URLs (next-page links, retries) are used as-is.
    pub fn full_url(&self, path: &str) -> String {
        if path.starts_with(&self.base_url)
            || path.starts_with("http://")
            || path.starts_with("https://")
        {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> Option<String> {
        let full = self.full_url(path);
        let parsed = if query.is_empty() {
            reqwest::Url::parse(&full)
        } else {
            reqwest::Url::parse_with_params(&full, query)
        };
        parsed.ok().map(|u| u.to_string())
    }

    fn request_headers(&self, headers: &[(String, String)]) -> Vec<(String, String)> {
        let mut all = Vec::with_capacity(headers.len() + 2);
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("accept")) {
            all.push(("accept".to_string(), "application/json".to_string()));
        }
        all.extend(headers.iter().cloned());
        all.push(("x-api-key".to_string(), self.api_key.clone()));
        all
    }

    /// Perform one GET and wrap the outcome in an [`ApiResponse`].
    pub async fn call_endpoint(
        &self,
        path: &str,
        query: &[(String, String)],
        headers: &[(String, String)],
        retry_message: Option<&str>,
    ) -> ApiResponse {
        let start = Instant::now();

        let Some(url) = self.build_url(path, query) else {
            warn!(path, "Could not build request URL");
            return ApiResponse::synthetic_failure(start.elapsed(), None);
        };

        match retry_message {
            Some(message) => warn!("{} for: {}", message, url),
            None => debug!("Making HTTP call for: {}", url),
        }

        let headers = self.request_headers(headers);
        match self.transport.get(&url, &headers).await {
            Ok(raw) => {
                let duration = start.elapsed();
                if raw.status == HTTP_OK {
                    match serde_json::from_str::<Value>(&raw.body) {
                        Ok(json) => ApiResponse::new(ResponseBody::Json(json), HTTP_OK, duration, Some(raw.url)),
                        Err(e) => {
                            warn!(url = %raw.url, error = %e, "Response body is not valid JSON");
                            ApiResponse::synthetic_failure(duration, Some(raw.url))
                        }
                    }
                } else {
                    ApiResponse::new(ResponseBody::Text(raw.body), raw.status, duration, Some(raw.url))
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "HTTP request failed");
                ApiResponse::synthetic_failure(start.elapsed(), Some(url))
            }
        }
    }

    /// GET a resource and return the full JSON body of a 200 response
    pub async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let response = self.call_endpoint(path, query, &[], None).await;
        match response.data {
            ResponseBody::Json(json) if response.status == HTTP_OK => Ok(json),
            ResponseBody::Json(json) => Err(ToolkitError::Api {
                status: response.status,
                message: json.to_string(),
            }),
            ResponseBody::Text(message) => Err(ToolkitError::Api {
                status: response.status,
                message,
            }),
        }
    }

    /// GET a resource and return its `payload` object
    pub async fn get_payload(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let mut body = self.get_json(path, query).await?;
        match body.get_mut("payload").map(Value::take) {
            Some(payload) if !payload.is_null() => Ok(payload),
            _ => Err(ToolkitError::MissingField("payload".to_string())),
        }
    }

    /// GET a resource whose body is not JSON (CSV formats)
    pub async fn get_text(&self, path: &str, query: &[(String, String)]) -> Result<String> {
        let url = self
            .build_url(path, query)
            .ok_or_else(|| ToolkitError::InvalidInput(format!("Invalid URL for path: {path}")))?;
        debug!("Making HTTP call for: {}", url);

        let raw = self.transport.get(&url, &self.request_headers(&[])).await?;
        if raw.status != HTTP_OK {
            return Err(ToolkitError::Api {
                status: raw.status,
                message: raw.body,
            });
        }
        Ok(raw.body)
    }

    /// Lazily walk every page of a paginated resource
    pub fn paginate(&self, path: &str, query: Query, headers: Vec<(String, String)>) -> Paginator<'_> {
        Paginator::new(self, path.to_string(), query, headers, next_page_url)
    }

    /// Resume a paginated walk from a previously advertised next-page URL
    pub fn paginate_from(&self, next_url: &str, headers: Vec<(String, String)>) -> Paginator<'_> {
        Paginator::new(self, next_url.to_string(), Vec::new(), headers, next_page_url)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    fn client(transport: Arc<MockTransport>) -> ApiClient {
        ApiClient::with_transport(transport, "key", "https://api.example.com/")
    }

    #[test]
    fn test_full_url() {
        let client = client(Arc::new(MockTransport::new()));
        assert_eq!(client.full_url("/markets/spot"), "https://api.example.com/markets/spot");
        assert_eq!(client.full_url("markets/spot"), "https://api.example.com/markets/spot");
        assert_eq!(
            client.full_url("https://api.example.com/markets/spot?cursor=abc"),
            "https://api.example.com/markets/spot?cursor=abc"
        );
    }

    #[tokio::test]
    async fn test_call_endpoint_sends_api_key_and_query() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            "https://api.example.com/a?exchange=binance",
            200,
            r#"{"payload":{"data":[]}}"#,
        );
        let client = client(transport.clone());

        let response = client
            .call_endpoint("/a", &query(&[("exchange", "binance")]), &[], None)
            .await;

        assert!(response.is_ok());
        assert_eq!(response.request_url.as_deref(), Some("https://api.example.com/a?exchange=binance"));
        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .headers
            .iter()
            .any(|(k, v)| k == "x-api-key" && v == "key"));
    }

    #[tokio::test]
    async fn test_call_endpoint_non_200_keeps_text() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("https://api.example.com/a", 404, "not found");
        let client = client(transport);

        let response = client.call_endpoint("/a", &[], &[], None).await;
        assert_eq!(response.status, 404);
        assert_eq!(response.data, ResponseBody::Text("not found".to_string()));
    }

    #[tokio::test]
    async fn test_call_endpoint_transport_failure_is_synthetic_500() {
        let transport = Arc::new(MockTransport::new());
        let client = client(transport);

        let response = client.call_endpoint("/unrouted", &[], &[], None).await;
        assert_eq!(response.status, 500);
        assert_eq!(response.request_url.as_deref(), Some("https://api.example.com/unrouted"));
    }

    #[tokio::test]
    async fn test_get_payload_missing() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("https://api.example.com/a", 200, r#"{"status":200}"#);
        let client = client(transport);

        let err = client.get_payload("/a", &[]).await.unwrap_err();
        assert!(matches!(err, ToolkitError::MissingField(_)));
    }

    #[tokio::test]
    async fn test_get_text() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("https://api.example.com/csv?format=csv", 200, "a,b\n1,2\n");
        let client = client(transport);

        let body = client.get_text("/csv", &query(&[("format", "csv")])).await.unwrap();
        assert_eq!(body, "a,b\n1,2\n");
    }
}
