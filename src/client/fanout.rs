//! Bounded-concurrency fan-out over many independent requests

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, info};

use crate::client::retry::call_with_rate_limit_retry;
use crate::client::{ApiClient, Query};
use crate::config::HttpSettings;

/// Concurrency and throttling limits for [`parallel_payloads`]
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    pub max_workers: usize,
    pub rate_limit_retries: u32,
    pub rate_limit_delay: Duration,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::from_settings(&HttpSettings::default())
    }
}

impl FanOut {
    pub fn from_settings(http: &HttpSettings) -> Self {
        Self {
            max_workers: http.max_workers,
            rate_limit_retries: http.rate_limit_retries,
            rate_limit_delay: http.retry_delay(),
        }
    }

    pub async fn run(&self, client: &ApiClient, requests: Vec<(String, Query)>) -> Vec<Value> {
        parallel_payloads(
            client,
            requests,
            self.max_workers,
            self.rate_limit_retries,
            self.rate_limit_delay,
        )
        .await
    }
}

/// Shared completion counter for concurrent jobs
#[derive(Debug)]
pub struct Progress {
    done: AtomicUsize,
    total: usize,
    label: String,
}

impl Progress {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        Self {
            done: AtomicUsize::new(0),
            total,
            label: label.into(),
        }
    }

    /// Mark one job finished and log `[current/total]`
    pub fn next(&self) -> usize {
        let current = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{} [{}/{}]", self.label, current, self.total);
        current
    }

    pub fn completed(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Issue every request with at most `max_workers` in flight.
///
/// Each request goes through [`call_with_rate_limit_retry`]. Requests that end
/// without a payload are dropped; results arrive in completion order.
pub async fn parallel_payloads(
    client: &ApiClient,
    requests: Vec<(String, Query)>,
    max_workers: usize,
    rate_limit_retries: u32,
    rate_limit_delay: Duration,
) -> Vec<Value> {
    let progress = Progress::new("Fetching", requests.len());

    stream::iter(requests)
        .map(|(path, query)| {
            let progress = &progress;
            async move {
                let result =
                    call_with_rate_limit_retry(client, &path, &query, rate_limit_retries, rate_limit_delay)
                        .await;
                progress.next();
                match result {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(path = %path, error = %e, "Request abandoned");
                        None
                    }
                }
            }
        })
        .buffer_unordered(max_workers.max(1))
        .filter_map(|payload| async move { payload })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::client::query;
    use std::sync::Arc;

    #[test]
    fn test_progress_counts() {
        let progress = Progress::new("jobs", 3);
        assert_eq!(progress.next(), 1);
        assert_eq!(progress.next(), 2);
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.total(), 3);
    }

    #[tokio::test]
    async fn test_parallel_payloads_drops_failures() {
        let transport = Arc::new(MockTransport::new());
        for i in 0..4 {
            transport.respond(
                &format!("https://api.example.com/w?i={i}"),
                200,
                &format!(r#"{{"status":200,"payload":{{"i":{i}}}}}"#),
            );
        }
        transport.respond("https://api.example.com/w?i=4", 500, r#"{"status":500,"message":"boom"}"#);
        let client = ApiClient::with_transport(transport.clone(), "key", "https://api.example.com");

        let requests = (0..5)
            .map(|i| {
                let i = i.to_string();
                ("/w".to_string(), query(&[("i", i.as_str())]))
            })
            .collect();
        let mut payloads = parallel_payloads(&client, requests, 2, 3, Duration::ZERO).await;
        payloads.sort_by_key(|p| p["i"].as_i64());

        assert_eq!(payloads.len(), 4);
        assert_eq!(payloads[0]["i"], 0);
        assert_eq!(transport.requests().len(), 5);
    }
}
