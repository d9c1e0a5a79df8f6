//! Large ERC-20 transfer alerts from the vendor WebSocket
//!
//! The watcher subscribes to `addresses:logs` for one token contract and
//! decodes every pushed log. `Transfer` logs moving more than the threshold
//! are logged and handed to a [`Notifier`].

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::error::{Result, ToolkitError};
use crate::notify::Notifier;

/// DAI stablecoin contract
pub const DAI_CONTRACT: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const DEFAULT_THRESHOLD: f64 = 1_000_000.0;

/// Replies the server sends for requests it rejected; never alerts
pub const IGNORED_MESSAGES: [&str; 3] = [
    "Could not parse JSON Request, type 'help' for more details.",
    "Improper Format: id must be string|number|not provided",
    "Improper Format: provide method string",
];

/// Token amounts are 18-decimal fixed point
const TOKEN_DECIMALS: i32 = 18;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// JSON-RPC request subscribing to the logs of `contract`
pub fn subscribe_request(contract: &str) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "subscribe",
        "params": ["addresses:logs", { "address": contract }],
    })
    .to_string()
}

/// Stream endpoint with the API key in the query string
pub fn stream_url(base: &str, api_key: &str) -> String {
    format!("{}?x-api-key={}", base.trim_end_matches('/'), api_key)
}

/// Parse an arbitrarily long hex quantity (`0x` prefix optional) into a float
pub fn hex_to_f64(hex: &str) -> Option<f64> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    if digits.is_empty() {
        return None;
    }
    digits
        .chars()
        .try_fold(0.0f64, |acc, c| c.to_digit(16).map(|d| acc * 16.0 + d as f64))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn topic_address(topic: &Value) -> Option<String> {
    topic.as_str().and_then(|t| t.get(26..)).map(|tail| format!("0x{}", tail))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub topic: String,
    pub from: String,
    pub to: String,
    /// Token units, rounded to cents
    pub value: f64,
    pub transaction_hash: Option<String>,
}

impl Transfer {
    pub fn is_erc20_transfer(&self) -> bool {
        self.topic.eq_ignore_ascii_case(TRANSFER_TOPIC)
    }
}

/// Decode one pushed message.
///
/// Rejection notices and messages without `params` (subscription
/// acknowledgements) yield `None`. Log messages missing the fields a
/// transfer needs are an error.
pub fn decode_transfer(message: &str) -> Result<Option<Transfer>> {
    if IGNORED_MESSAGES.contains(&message) {
        return Ok(None);
    }

    let data: Value = serde_json::from_str(message)?;
    let Some(params) = data.get("params") else {
        return Ok(None);
    };
    let result = &params["result"];
    let topics = &result["topics"];

    let missing = |field: &str| ToolkitError::MissingField(format!("params.result.{}", field));
    let raw_value = result["data"].as_str().ok_or_else(|| missing("data"))?;
    let value = hex_to_f64(raw_value)
        .ok_or_else(|| ToolkitError::InvalidInput(format!("Bad transfer amount '{}'", raw_value)))?;

    Ok(Some(Transfer {
        topic: topics[0].as_str().ok_or_else(|| missing("topics[0]"))?.to_string(),
        from: topic_address(&topics[1]).ok_or_else(|| missing("topics[1]"))?,
        to: topic_address(&topics[2]).ok_or_else(|| missing("topics[2]"))?,
        value: round2(value / 10f64.powi(TOKEN_DECIMALS)),
        transaction_hash: result["transactionHash"].as_str().map(str::to_string),
    }))
}

/// Alert body; whole amounts keep their `.0` (`2000000.0 DAI ...`)
pub fn alert_text(transfer: &Transfer, token_symbol: &str) -> String {
    format!(
        "{:?} {} was transferred {} to {}",
        transfer.value, token_symbol, transfer.from, transfer.to
    )
}

pub struct WhaleWatcher {
    url: String,
    contract: String,
    token_symbol: String,
    threshold: f64,
    notifier: Arc<dyn Notifier>,
}

impl WhaleWatcher {
    pub fn new(url: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            url: url.into(),
            contract: DAI_CONTRACT.to_string(),
            token_symbol: "DAI".to_string(),
            threshold: DEFAULT_THRESHOLD,
            notifier,
        }
    }

    pub fn with_contract(mut self, contract: impl Into<String>, token_symbol: impl Into<String>) -> Self {
        self.contract = contract.into();
        self.token_symbol = token_symbol.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Whether a decoded transfer should raise an alert
    pub fn should_alert(&self, transfer: &Transfer) -> bool {
        transfer.is_erc20_transfer() && transfer.value > self.threshold
    }

    /// Decode one message and deliver an alert when it qualifies.
    ///
    /// Returns the transfer that alerted, if any. Undecodable messages are
    /// logged and skipped.
    pub async fn handle_message(&self, message: &str) -> Result<Option<Transfer>> {
        let transfer = match decode_transfer(message) {
            Ok(Some(transfer)) => transfer,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!("Skipping message: {}", e);
                return Ok(None);
            }
        };

        if !self.should_alert(&transfer) {
            return Ok(None);
        }

        info!(
            to = %transfer.to,
            from = %transfer.from,
            value = transfer.value,
            tx = transfer.transaction_hash.as_deref().unwrap_or("-"),
            "Whale transfer"
        );
        self.notifier.send(&alert_text(&transfer, &self.token_symbol)).await?;
        Ok(Some(transfer))
    }

    /// Watch forever, reconnecting after disconnects and errors
    pub async fn run(&self) -> Result<()> {
        info!("Watching {} transfers above {}", self.token_symbol, self.threshold);
        loop {
            match self.connect_and_watch().await {
                Ok(()) => warn!("WebSocket disconnected, reconnecting..."),
                Err(e) => error!("WebSocket error: {}, reconnecting in {:?}...", e, RECONNECT_DELAY),
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_and_watch(&self) -> Result<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ToolkitError::WebSocket(e.to_string()))?;
        let (mut write, mut read) = stream.split();
        info!("Connected to {}", redact_key(&self.url));

        write
            .send(Message::Text(subscribe_request(&self.contract).into()))
            .await
            .map_err(|e| ToolkitError::WebSocket(e.to_string()))?;

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.handle_message(text.as_str()).await {
                        error!("Failed to deliver alert: {}", e);
                    }
                }
                Ok(Message::Close(_)) => {
                    warn!("WebSocket closed by server");
                    break;
                }
                Err(e) => return Err(ToolkitError::WebSocket(e.to_string())),
                _ => {}
            }
        }
        Ok(())
    }
}

fn redact_key(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;

    const FROM_TOPIC: &str = "0x000000000000000000000000a1b2c3d4e5f60718293a4b5c6d7e8f9012345678";
    const TO_TOPIC: &str = "0x0000000000000000000000001111111111111111111111111111111111111111";

    fn log_message(topic: &str, amount_hex: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "subscription": "abc",
                "result": {
                    "data": amount_hex,
                    "topics": [topic, FROM_TOPIC, TO_TOPIC],
                    "transactionHash": "0xfeed"
                }
            }
        })
        .to_string()
    }

    fn watcher() -> (WhaleWatcher, Arc<MemoryNotifier>) {
        let notifier = Arc::new(MemoryNotifier::new());
        (WhaleWatcher::new("wss://example.invalid", notifier.clone()), notifier)
    }

    #[test]
    fn test_subscribe_request_shape() {
        let request: Value = serde_json::from_str(&subscribe_request(DAI_CONTRACT)).unwrap();
        assert_eq!(request["method"], "subscribe");
        assert_eq!(request["params"][0], "addresses:logs");
        assert_eq!(request["params"][1]["address"], DAI_CONTRACT);
    }

    #[test]
    fn test_hex_to_f64() {
        assert_eq!(hex_to_f64("0xff"), Some(255.0));
        assert_eq!(hex_to_f64("0x"), None);
        assert_eq!(hex_to_f64("0xzz"), None);
        // 2,000,000 * 1e18
        let big = hex_to_f64("0x00000000000000000000000000000000000000000001a784379d99db42000000").unwrap();
        assert!((big / 1e18 - 2_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_transfer() {
        let transfer = decode_transfer(&log_message(TRANSFER_TOPIC, "0x0de0b6b3a7640000"))
            .unwrap()
            .unwrap();
        assert_eq!(transfer.value, 1.0);
        assert_eq!(transfer.from, "0xa1b2c3d4e5f60718293a4b5c6d7e8f9012345678");
        assert_eq!(transfer.to, "0x1111111111111111111111111111111111111111");
        assert_eq!(transfer.transaction_hash.as_deref(), Some("0xfeed"));
        assert!(transfer.is_erc20_transfer());
    }

    #[test]
    fn test_decode_ignores_rejections_and_acks() {
        for message in IGNORED_MESSAGES {
            assert_eq!(decode_transfer(message).unwrap(), None);
        }
        assert_eq!(decode_transfer(r#"{"jsonrpc":"2.0","id":1,"result":"abc"}"#).unwrap(), None);
        assert!(decode_transfer("not json").is_err());
    }

    #[tokio::test]
    async fn test_only_large_transfers_alert() {
        let (watcher, notifier) = watcher();
        let big = "0x1a784379d99db42000000";
        let small = "0x0de0b6b3a7640000";

        assert!(watcher.handle_message(&log_message(TRANSFER_TOPIC, big)).await.unwrap().is_some());
        assert!(watcher.handle_message(&log_message(TRANSFER_TOPIC, small)).await.unwrap().is_none());
        assert!(watcher.handle_message(&log_message("0xdeadbeef", big)).await.unwrap().is_none());
        assert!(watcher.handle_message(IGNORED_MESSAGES[0]).await.unwrap().is_none());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            "2000000.0 DAI was transferred 0xa1b2c3d4e5f60718293a4b5c6d7e8f9012345678 to 0x1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn test_alert_text_amounts() {
        let mut transfer = decode_transfer(&log_message(TRANSFER_TOPIC, "0x0de0b6b3a7640000"))
            .unwrap()
            .unwrap();
        assert!(alert_text(&transfer, "DAI").starts_with("1.0 DAI was transferred 0xa1b2"));
        transfer.value = 1234.56;
        assert!(alert_text(&transfer, "DAI").starts_with("1234.56 DAI "));
    }

    #[test]
    fn test_stream_url_and_redaction() {
        let url = stream_url("wss://ws.example.io/", "k3y");
        assert_eq!(url, "wss://ws.example.io?x-api-key=k3y");
        assert_eq!(redact_key(&url), "wss://ws.example.io");
    }
}
