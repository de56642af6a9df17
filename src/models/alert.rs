//! # models::alert
//!
//! [`MoveEvent`] is what the detector emits when a symbol moves past the
//! threshold inside its window. It is consumed once by the dispatcher and, after
//! a successful notification, wrapped in a [`DispatchedAlert`] that seeds a
//! trade monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notify::MessageId;

// ─── Direction ────────────────────────────────────────────────────────────────

/// Side of the position opened after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Positive move → LONG, negative (or zero) move → SHORT.
    pub fn from_change(percent_change: f64) -> Self {
        if percent_change > 0.0 {
            Direction::Long
        } else {
            Direction::Short
        }
    }

    /// `+1.0` for LONG, `-1.0` for SHORT. Multiplies a favourable offset.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long  => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Long  => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── MoveEvent ────────────────────────────────────────────────────────────────

/// A threshold-crossing price move. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveEvent {
    pub symbol:          String,
    /// Signed `(current - reference) / reference × 100`.
    pub percent_change:  f64,
    /// Oldest price in the window at detection time.
    pub reference_price: f64,
    pub current_price:   f64,
    /// 24h quote volume carried by the triggering tick.
    pub volume:          f64,
    pub detected_at:     DateTime<Utc>,
}

impl MoveEvent {
    pub fn direction(&self) -> Direction {
        Direction::from_change(self.percent_change)
    }
}

// ─── DispatchedAlert ──────────────────────────────────────────────────────────

/// A move that passed dedupe and was delivered (or at least attempted).
#[derive(Debug, Clone)]
pub struct DispatchedAlert {
    pub event:      MoveEvent,
    /// Id of the channel message, used to thread TP/SL replies.
    /// `None` when delivery failed.
    pub message_id: Option<MessageId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_change() {
        assert_eq!(Direction::from_change(30.0), Direction::Long);
        assert_eq!(Direction::from_change(-21.5), Direction::Short);
        assert_eq!(Direction::Long.sign(), 1.0);
        assert_eq!(Direction::Short.sign(), -1.0);
    }

    #[test]
    fn test_direction_serializes_screaming() {
        let json = serde_json::to_string(&Direction::Short).unwrap();
        assert_eq!(json, "\"SHORT\"");
    }
}
