//! # events
//!
//! [`MonitorEvent`] carries everything the engine broadcasts to `/ws/monitor`
//! clients. Events are serialized to JSON once and sent as `String` through
//! `tokio::sync::broadcast`.

use serde::Serialize;

use crate::models::{Level, MoveEvent, Position, TradeRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorEvent {
    /// A new monitoring cycle partitioned the universe.
    CycleStarted {
        cycle:   u64,
        symbols: usize,
        groups:  usize,
    },

    /// A GroupConsumer reached CLOSED.
    GroupClosed {
        group:      usize,
        status:     String,
        ticks:      u64,
        reconnects: u32,
    },

    /// Detector fired and the alert passed dedupe.
    MoveDetected {
        alert: Box<MoveEvent>,
    },

    /// Dispatcher queue was full; the event was dropped.
    AlertDropped {
        symbol: String,
    },

    TradeOpened {
        position: Box<Position>,
    },

    TradeLevel {
        symbol: String,
        level:  Level,
        price:  f64,
    },

    TradeClosed {
        record: Box<TradeRecord>,
    },

    Heartbeat {
        tick_count:    u64,
        alert_count:   u64,
        active_trades: usize,
    },
}

impl MonitorEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_json() {
        let json = MonitorEvent::TradeLevel {
            symbol: "AAAUSDT".into(),
            level:  Level::Tp1,
            price:  105.0,
        }
        .to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "TRADE_LEVEL");
        assert_eq!(value["level"], "TP1");
    }
}
