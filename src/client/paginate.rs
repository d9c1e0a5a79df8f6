//! Paginated fetch with bounded per-page retries.
//!
//! Requests are resolved through an explicit stack rather than recursion:
//! the most recently queued request (a discovered next page or a retry) is
//! resolved first. A successful page queues its next-page link before it is
//! handed to the caller, so pages come out in traversal order. A failed page
//! is requeued until it has been attempted `max_attempts` times in total, and
//! is then handed to the caller as-is so the failure stays visible.

use futures::Stream;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::response::ApiResponse;
use crate::client::{ApiClient, Query};

/// Attempts per page, first request included
pub const MAX_PAGE_ATTEMPTS: u32 = 3;

/// Extracts the next-page URL from a successful page body
pub type NextPageExtractor = fn(&Value) -> Option<String>;

/// Default extractor: `payload.metadata.next`; a missing or null level means no next page
pub fn next_page_url(page: &Value) -> Option<String> {
    page.get("payload")
        .filter(|p| !p.is_null())
        .and_then(|p| p.get("metadata"))
        .filter(|m| !m.is_null())
        .and_then(|m| m.get("next"))
        .and_then(Value::as_str)
        .filter(|next| !next.is_empty())
        .map(str::to_string)
}

pub struct Paginator<'a> {
    client: &'a ApiClient,
    headers: Vec<(String, String)>,
    extractor: NextPageExtractor,
    max_attempts: u32,
    start: Option<(String, Query)>,
    stack: Vec<ApiResponse>,
    pages_yielded: usize,
}

impl<'a> Paginator<'a> {
    pub fn new(
        client: &'a ApiClient,
        path: String,
        query: Query,
        headers: Vec<(String, String)>,
        extractor: NextPageExtractor,
    ) -> Self {
        Self {
            client,
            headers,
            extractor,
            max_attempts: client.max_page_attempts(),
            start: Some((path, query)),
            stack: Vec::new(),
            pages_yielded: 0,
        }
    }

    pub fn with_extractor(mut self, extractor: NextPageExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Requests queued but not yet resolved
    pub fn pending(&self) -> usize {
        self.stack.len() + usize::from(self.start.is_some())
    }

    pub fn pages_yielded(&self) -> usize {
        self.pages_yielded
    }

    /// Resolve and return the next page, or `None` once the chain is exhausted.
    ///
    /// Failed pages are returned after their retry budget is spent; callers
    /// check [`ApiResponse::is_ok`].
    pub async fn next_page(&mut self) -> Option<ApiResponse> {
        if let Some((path, query)) = self.start.take() {
            let mut first = self
                .client
                .call_endpoint(&path, &query, &self.headers, None)
                .await;
            first.increment_attempt(None);
            self.stack.push(first);
        }

        while let Some(response) = self.stack.pop() {
            if response.is_ok() {
                if let Some(next) = response.json().and_then(self.extractor) {
                    let mut next_page = self
                        .client
                        .call_endpoint(&next, &[], &self.headers, None)
                        .await;
                    next_page.increment_attempt(None);
                    self.stack.push(next_page);
                }
                self.pages_yielded += 1;
                return Some(response);
            }

            match &response.request_url {
                Some(url) if response.attempts < self.max_attempts => {
                    debug!(url = %url, attempts = response.attempts, status = response.status, "Page failed, requeueing");
                    let mut retried = self
                        .client
                        .call_endpoint(url, &[], &self.headers, Some("Retrying HTTP call"))
                        .await;
                    retried.increment_attempt(Some(response.attempts + 1));
                    self.stack.push(retried);
                }
                _ => {
                    warn!(
                        url = response.request_url.as_deref().unwrap_or("<unknown>"),
                        attempts = response.attempts,
                        status = response.status,
                        "Giving up on page"
                    );
                    self.pages_yielded += 1;
                    return Some(response);
                }
            }
        }

        None
    }

    /// Drain every remaining page
    pub async fn collect_pages(mut self) -> Vec<ApiResponse> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await {
            pages.push(page);
        }
        pages
    }

    /// Expose the walk as a `Stream` of pages
    pub fn into_stream(self) -> impl Stream<Item = ApiResponse> + 'a {
        futures::stream::unfold(self, |mut paginator| async move {
            paginator.next_page().await.map(|page| (page, paginator))
        })
    }
}
