//! # notify::telegram
//!
//! Bot API `sendMessage`
//!
//! ```text
//! POST https://api.telegram.org/bot<TOKEN>/sendMessage
//!   { "chat_id": "...", "text": "...", "reply_to_message_id": 123 }
//! ← { "ok": true, "result": { "message_id": 456 } }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use crate::notify::{MessageId, Notifier};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text:    &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<MessageId>,
    /// Reply even if the original alert was deleted.
    allow_sending_without_reply: bool,
}

#[derive(Deserialize)]
struct TelegramResponse {
    ok:          bool,
    result:      Option<SentMessage>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

pub struct TelegramNotifier {
    client:   reqwest::Client,
    config:   TelegramConfig,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(client: reqwest::Client, config: TelegramConfig) -> Self {
        Self {
            client,
            config,
            api_base: API_BASE.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.config.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str, reply_to: Option<MessageId>) -> Result<MessageId, NotifyError> {
        let body = SendMessage {
            chat_id: &self.config.chat_id,
            text,
            reply_to_message_id: reply_to,
            allow_sending_without_reply: true,
        };

        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        let parsed: TelegramResponse = resp
            .json()
            .await
            .map_err(|e| NotifyError::Transport(format!("HTTP {status}: unreadable body: {e}")))?;

        match (parsed.ok, parsed.result) {
            (true, Some(sent)) => {
                debug!(message_id = sent.message_id, "Telegram message delivered");
                Ok(sent.message_id)
            }
            _ => Err(NotifyError::Rejected(format!(
                "HTTP {status}: {}",
                parsed.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_omits_missing_reply() {
        let body = SendMessage {
            chat_id: "-100",
            text:    "hi",
            reply_to_message_id: None,
            allow_sending_without_reply: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("reply_to_message_id").is_none());
        assert_eq!(json["chat_id"], "-100");
    }

    #[test]
    fn test_response_parsing() {
        let ok: TelegramResponse =
            serde_json::from_str(r#"{"ok":true,"result":{"message_id":77,"chat":{}}}"#).unwrap();
        assert_eq!(ok.result.unwrap().message_id, 77);

        let err: TelegramResponse =
            serde_json::from_str(r#"{"ok":false,"description":"Bad Request: chat not found"}"#).unwrap();
        assert!(!err.ok);
        assert_eq!(err.description.as_deref(), Some("Bad Request: chat not found"));
    }

    #[test]
    fn test_endpoint() {
        let notifier = TelegramNotifier::new(
            reqwest::Client::new(),
            TelegramConfig { bot_token: "123:abc".into(), chat_id: "-100".into() },
        );
        assert_eq!(notifier.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
    }
}
