//! # models::tick
//!
//! Defines [`Tick`], the normalized market pulse every feed implementation must
//! produce, and [`Sample`], the compact form kept in a symbol's price window.
//!
//! Whatever wire format the exchange uses is decoded in `feed` before it gets
//! here; the engine never sees raw frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single 24h-ticker update for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Exchange symbol, e.g. `"BTCUSDT"`.
    pub symbol: String,

    /// Last traded price.
    pub last_price: f64,

    /// Rolling 24h volume in quote asset (USDT).
    pub quote_volume: f64,

    /// Exchange event time.
    pub event_time: DateTime<Utc>,
}

impl Tick {
    /// Price must be a finite, strictly positive number to enter a window.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.last_price.is_finite() && self.last_price > 0.0 && !self.symbol.is_empty()
    }
}

/// One retained `(timestamp, price)` point. Immutable once recorded.
///
/// No symbol inside: windows are keyed by symbol already.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at:    DateTime<Utc>,
    pub price: f64,
}

impl Sample {
    pub fn new(at: DateTime<Utc>, price: f64) -> Self {
        Self { at, price }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick {
            symbol:       symbol.to_string(),
            last_price:   price,
            quote_volume: 1.0,
            event_time:   Utc::now(),
        }
    }

    #[test]
    fn test_tick_validity() {
        assert!(tick("BTCUSDT", 1.0).is_valid());
        assert!(!tick("BTCUSDT", 0.0).is_valid());
        assert!(!tick("BTCUSDT", -3.0).is_valid());
        assert!(!tick("BTCUSDT", f64::NAN).is_valid());
        assert!(!tick("", 1.0).is_valid());
    }
}
