//! # error
//!
//! Error taxonomy for every collaborator boundary.
//!
//! | Error            | Raised by                   | Handling                                  |
//! |------------------|-----------------------------|-------------------------------------------|
//! | [`FeedError`]    | market feed / universe      | consumer retries, drops, or backs off     |
//! | [`NotifyError`]  | notification sender         | logged and swallowed                      |
//! | [`StoreError`]   | trade persistence           | logged and swallowed                      |
//! | [`MonitorError`] | orchestrator cycle setup    | halts the cycle, retried by the next one  |

use thiserror::Error;

// ─── Feed ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FeedError {
    /// Stream dropped, connect refused, handshake failed. Retried with backoff.
    #[error("transient connection error: {0}")]
    Connection(String),

    /// A single frame could not be decoded into a tick. Dropped, loop continues.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The transport signalled that it cannot keep up with the subscription.
    #[error("feed queue overflow: {0}")]
    Overflow(String),

    /// Remote side closed the subscription.
    #[error("stream closed by remote")]
    Closed,

    /// REST call to the exchange failed (universe discovery).
    #[error("exchange http error: {0}")]
    Http(String),

    /// Unrecoverable setup failure, e.g. no market-data session can be built.
    #[error("fatal feed error: {0}")]
    Fatal(String),
}

impl FeedError {
    /// Errors that must not be retried by a consumer.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FeedError::Fatal(_))
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, FeedError::Overflow(_))
    }

    /// Errors that affect one frame only; the stream itself is still healthy.
    pub fn is_per_message(&self) -> bool {
        matches!(self, FeedError::Malformed(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => FeedError::Closed,
            other => FeedError::Connection(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(error: reqwest::Error) -> Self {
        FeedError::Http(error.to_string())
    }
}

// ─── Notification ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(error: reqwest::Error) -> Self {
        NotifyError::Transport(error.to_string())
    }
}

// ─── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence transport error: {0}")]
    Transport(String),

    #[error("persistence rejected record: {0}")]
    Rejected(String),

    /// Spreadsheet row for the symbol could not be located.
    #[error("no open row for {0}")]
    RowNotFound(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        StoreError::Transport(error.to_string())
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The cycle cannot start at all (no universe, bad config). Reported and
    /// retried by the next cycle.
    #[error("fatal config error: {0}")]
    FatalConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_error_classification() {
        assert!(FeedError::Fatal("no session".into()).is_fatal());
        assert!(!FeedError::Connection("reset".into()).is_fatal());
        assert!(FeedError::Overflow("queue".into()).is_overflow());
        assert!(FeedError::Malformed("bad".into()).is_per_message());
        assert!(!FeedError::Closed.is_per_message());
    }

    #[test]
    fn test_closed_socket_maps_to_closed() {
        let err: FeedError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, FeedError::Closed));
    }
}
