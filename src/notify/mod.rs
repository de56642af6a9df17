//! # notify
//!
//! Outbound notification collaborator.
//!
//! | Implementation       | Selected when                                   |
//! |----------------------|-------------------------------------------------|
//! | [`TelegramNotifier`] | `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID` set |
//! | [`LogNotifier`]      | otherwise (headless / dev)                      |
//!
//! Callers never propagate a [`NotifyError`]; they log it and move on.

pub mod format;
pub mod telegram;

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;

pub use telegram::TelegramNotifier;

/// Channel message id, used to thread TP/SL replies under the original alert.
pub type MessageId = i64;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`, optionally as a reply to `reply_to`.
    async fn send(&self, text: &str, reply_to: Option<MessageId>) -> Result<MessageId, NotifyError>;
}

// ─── LogNotifier ──────────────────────────────────────────────────────────────

/// Writes notifications to the log and hands out local ids.
#[derive(Debug, Default)]
pub struct LogNotifier {
    next_id: AtomicI64,
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str, reply_to: Option<MessageId>) -> Result<MessageId, NotifyError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(message_id = id, reply_to = ?reply_to, "📣 {text}");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_hands_out_increasing_ids() {
        let notifier = LogNotifier::default();
        let first = notifier.send("one", None).await.unwrap();
        let second = notifier.send("two", Some(first)).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
