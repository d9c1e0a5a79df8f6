//! In-memory transport for tests, built with `cfg(test)` or the `test-util` feature
//!
//! Responses are queued per exact URL. The last queued response for a URL
//! keeps being served once the queue drains; a URL with no route fails at the
//! transport level.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::client::transport::{RawResponse, Transport};
use crate::error::{Result, ToolkitError};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
enum MockReply {
    Response { status: u16, body: String },
    Failure(String),
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `url`
    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.push(
            url,
            MockReply::Response {
                status,
                body: body.to_string(),
            },
        );
    }

    /// Queue a transport-level failure for `url`
    pub fn fail(&self, url: &str, reason: &str) {
        self.push(url, MockReply::Failure(reason.to_string()));
    }

    fn push(&self, url: &str, reply: MockReply) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.entry(url.to_string()).or_default().push_back(reply);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<RawResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                url: url.to_string(),
                headers: headers.to_vec(),
            });

        let reply = {
            let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            let queue = routes
                .get_mut(url)
                .ok_or_else(|| ToolkitError::Transport(format!("no mock route for {url}")))?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        match reply {
            Some(MockReply::Response { status, body }) => Ok(RawResponse {
                status,
                url: url.to_string(),
                body,
            }),
            Some(MockReply::Failure(reason)) => Err(ToolkitError::Transport(reason)),
            None => Err(ToolkitError::Transport(format!("no mock route for {url}"))),
        }
    }
}
