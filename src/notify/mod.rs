//! Alert delivery
//!
//! Text alerts go out as SMS through Twilio, or only to the log when no
//! Twilio account is configured.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{error, info};

use crate::config::TwilioSettings;
use crate::error::{Result, ToolkitError};

pub const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// SMS through the Twilio Messages API
pub struct TwilioNotifier {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from: String,
    to: String,
}

impl TwilioNotifier {
    pub fn new(settings: &TwilioSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: TWILIO_API_BASE.to_string(),
            account_sid: settings.account_sid.clone(),
            auth_token: settings.auth_token.clone(),
            from: settings.from.clone(),
            to: settings.to.clone(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", self.api_base, self.account_sid)
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let params = [("To", self.to.as_str()), ("From", self.from.as_str()), ("Body", text)];
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Twilio send failed: {} {}", status, body);
            return Err(ToolkitError::Notify(format!("Twilio returned {}", status)));
        }
        Ok(())
    }
}

/// Writes alerts to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!("ALERT: {}", text);
        Ok(())
    }
}

/// Keeps every alert in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }
}

/// Twilio when configured, log-only otherwise
pub fn notifier_from_settings(twilio: Option<&TwilioSettings>) -> Box<dyn Notifier> {
    match twilio {
        Some(settings) => Box::new(TwilioNotifier::new(settings)),
        None => Box::new(LogNotifier),
    }
}
