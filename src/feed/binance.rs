//! # feed::binance
//!
//! USDⓈ-M futures combined stream: one WebSocket carries `<symbol>@ticker`
//! for every symbol of a group.
//!
//! ```text
//! wss://fstream.binance.com/stream?streams=btcusdt@ticker/ethusdt@ticker
//!   → {"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"37000.10","q":"1234567.8",...}}
//! ```
//!
//! Numeric fields arrive as strings. Pings are answered by tungstenite on the
//! next read, so only text/close frames matter here.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::feed::{MarketFeed, TickStream};
use crate::models::Tick;

#[derive(Debug, Clone)]
pub struct BinanceFeed {
    ws_url: String,
}

impl BinanceFeed {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }

    /// Combined-stream URL for `symbols`.
    pub fn stream_url(&self, symbols: &[String]) -> String {
        let base = self.ws_url.trim_end_matches('/');
        let base = base
            .strip_suffix("/ws")
            .or_else(|| base.strip_suffix("/stream"))
            .unwrap_or(base);
        let streams = symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        format!("{base}/stream?streams={streams}")
    }
}

#[async_trait]
impl MarketFeed for BinanceFeed {
    async fn subscribe(&self, symbols: &[String]) -> Result<TickStream, FeedError> {
        if symbols.is_empty() {
            return Err(FeedError::Fatal("subscription without symbols".into()));
        }

        let url = self.stream_url(symbols);
        debug!(streams = symbols.len(), "Connecting combined ticker stream");

        let (socket, _response) = connect_async(url.as_str()).await?;
        info!(streams = symbols.len(), "🔌 Ticker stream connected");

        let ticks = socket.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(decode_frame(&text)),
                Ok(Message::Close(_))   => Some(Err(FeedError::Closed)),
                Ok(_)                   => None,
                Err(e)                  => Some(Err(FeedError::from(e))),
            }
        });

        Ok(Box::pin(ticks))
    }
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

/// Decode one text frame (combined envelope or bare payload) into a [`Tick`].
pub fn decode_frame(text: &str) -> Result<Tick, FeedError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| FeedError::Malformed(format!("invalid json: {e}")))?;

    let data = value.get("data").unwrap_or(&value);

    if data.get("e").and_then(Value::as_str) == Some("error") {
        let detail = [data.get("type"), data.get("m")]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(": ");
        return if detail.to_lowercase().contains("overflow") {
            Err(FeedError::Overflow(detail))
        } else {
            Err(FeedError::Connection(detail))
        };
    }

    let symbol = data
        .get("s")
        .and_then(Value::as_str)
        .ok_or_else(|| FeedError::Malformed("missing symbol".into()))?;

    let last_price = data
        .get("c")
        .and_then(number)
        .ok_or_else(|| FeedError::Malformed(format!("{symbol}: missing or invalid price")))?;

    let quote_volume = data.get("q").and_then(number).unwrap_or(0.0);

    let event_time = data
        .get("E")
        .and_then(Value::as_i64)
        .and_then(millis_to_utc)
        .unwrap_or_else(Utc::now);

    let tick = Tick {
        symbol: symbol.to_uppercase(),
        last_price,
        quote_volume,
        event_time,
    };

    if !tick.is_valid() {
        return Err(FeedError::Malformed(format!("{symbol}: non-positive price")));
    }
    Ok(tick)
}

/// Binance sends numbers as strings; accept both.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let feed = BinanceFeed::new("wss://fstream.binance.com/ws/");
        let url = feed.stream_url(&["BTCUSDT".into(), "ETHUSDT".into()]);
        assert_eq!(
            url,
            "wss://fstream.binance.com/stream?streams=btcusdt@ticker/ethusdt@ticker"
        );
    }

    #[test]
    fn test_decode_combined_envelope() {
        let frame = r#"{"stream":"btcusdt@ticker","data":{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"37000.10","q":"1234567.8"}}"#;
        let tick = decode_frame(frame).unwrap();
        assert_eq!(tick.symbol, "BTCUSDT");
        assert_eq!(tick.last_price, 37000.10);
        assert_eq!(tick.quote_volume, 1234567.8);
        assert_eq!(tick.event_time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_decode_bare_payload_with_numbers() {
        let tick = decode_frame(r#"{"s":"ethusdt","c":2000.5}"#).unwrap();
        assert_eq!(tick.symbol, "ETHUSDT");
        assert_eq!(tick.quote_volume, 0.0);
    }

    #[test]
    fn test_decode_malformed() {
        for frame in [
            "not json",
            r#"{"data":{"c":"1.0"}}"#,
            r#"{"data":{"s":"BTCUSDT","c":"abc"}}"#,
            r#"{"data":{"s":"BTCUSDT","c":"0"}}"#,
        ] {
            let err = decode_frame(frame).unwrap_err();
            assert!(err.is_per_message(), "{frame} → {err}");
        }
    }

    #[test]
    fn test_decode_overflow_signal() {
        let frame = r#"{"e":"error","type":"BinanceWebsocketQueueOverflow","m":"Queue overflow. Message not filled"}"#;
        assert!(decode_frame(frame).unwrap_err().is_overflow());

        let other = r#"{"e":"error","m":"Max reconnect retries reached"}"#;
        assert!(matches!(decode_frame(other), Err(FeedError::Connection(_))));
    }
}
