//! # models::position
//!
//! Structs for tracking a **live position** and its **finalized record**.
//!
//! ## Why separate?
//! `Position`    = mutable state owned by exactly one trade monitor task
//! `TradeRecord` = immutable outcome handed to persistence exactly once
//! `TradeStats`  = aggregate view over many records (monitor endpoint)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Direction;

// ─── Level ────────────────────────────────────────────────────────────────────

/// Progress of a position. TP levels are strictly ordered; STOP and TIMEOUT
/// are terminal side exits reachable only from OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Open,
    Tp1,
    Tp2,
    Tp3,
    Tp4,
    Stop,
    Timeout,
}

impl Level {
    /// Take-profit ladder in the only order it may be climbed.
    pub const TAKE_PROFITS: [Level; 4] = [Level::Tp1, Level::Tp2, Level::Tp3, Level::Tp4];

    /// Position of a TP level on the ladder (`Open` = 0). `None` for side exits.
    pub fn rank(self) -> Option<usize> {
        match self {
            Level::Open => Some(0),
            Level::Tp1  => Some(1),
            Level::Tp2  => Some(2),
            Level::Tp3  => Some(3),
            Level::Tp4  => Some(4),
            Level::Stop | Level::Timeout => None,
        }
    }

    /// Next TP on the ladder, if any.
    pub fn next_take_profit(self) -> Option<Level> {
        self.rank().and_then(|r| Self::TAKE_PROFITS.get(r).copied())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Level::Tp4 | Level::Stop | Level::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Open    => "OPEN",
            Level::Tp1     => "TP1",
            Level::Tp2     => "TP2",
            Level::Tp3     => "TP3",
            Level::Tp4     => "TP4",
            Level::Stop    => "SL",
            Level::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── CloseReason ──────────────────────────────────────────────────────────────

/// Which branch finalized the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// TP4 reached.
    Target,
    /// STOP reached from OPEN.
    StopLoss,
    /// Monitoring horizon elapsed.
    Timeout,
    /// Cycle rotation or shutdown.
    Cancelled,
    /// Single-symbol feed could not be (re)established.
    FeedLost,
    /// Closed by an operator through the monitor API.
    Manual,
}

// ─── Position ─────────────────────────────────────────────────────────────────

/// Live position owned by one trade monitor for its whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id:  Uuid,
    pub symbol:       String,
    pub direction:    Direction,
    pub entry_price:  f64,
    pub opened_at:    DateTime<Utc>,
    pub level:        Level,
    /// Latest price seen on the single-symbol stream.
    pub last_price:   f64,
    pub closed_at:    Option<DateTime<Utc>>,
    pub close_price:  Option<f64>,
    pub close_reason: Option<CloseReason>,
}

impl Position {
    pub fn open(symbol: &str, direction: Direction, entry_price: f64, opened_at: DateTime<Utc>) -> Self {
        Self {
            position_id:  Uuid::new_v4(),
            symbol:       symbol.to_string(),
            direction,
            entry_price,
            opened_at,
            level:        Level::Open,
            last_price:   entry_price,
            closed_at:    None,
            close_price:  None,
            close_reason: None,
        }
    }

    /// Signed result in percent, positive = favourable for the direction.
    pub fn result_percent(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.direction.sign() * (price - self.entry_price) / self.entry_price * 100.0
    }
}

// ─── TradeRecord ──────────────────────────────────────────────────────────────

/// Finalized outcome of one monitored position. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id:       Uuid,
    pub symbol:         String,
    pub direction:      Direction,
    pub entry_price:    f64,
    /// Move that spawned the position.
    pub alert_percent:  f64,
    pub opened_at:      DateTime<Utc>,
    /// Highest TP reached, or the side exit taken.
    pub level:          Level,
    pub result:         CloseReason,
    pub close_price:    f64,
    pub closed_at:      DateTime<Utc>,
    pub result_percent: f64,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.result_percent > 0.0
    }
}

// ─── TradeStats ───────────────────────────────────────────────────────────────

/// Aggregate statistics over finalized trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub total_operations: usize,
    pub sl_count:         usize,
    pub tp1_count:        usize,
    pub tp2_count:        usize,
    pub tp3_count:        usize,
    pub tp4_count:        usize,
    pub timeout_count:    usize,
    pub cancelled_count:  usize,
    pub total_profit:     f64,
    pub win_rate:         f64,
    pub avg_profit:       f64,
}

impl TradeStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TradeRecord>) -> Self {
        let mut stats = Self::default();
        let mut wins  = 0usize;

        for record in records {
            stats.total_operations += 1;
            match record.level {
                Level::Stop    => stats.sl_count += 1,
                Level::Tp1     => stats.tp1_count += 1,
                Level::Tp2     => stats.tp2_count += 1,
                Level::Tp3     => stats.tp3_count += 1,
                Level::Tp4     => stats.tp4_count += 1,
                Level::Timeout => stats.timeout_count += 1,
                Level::Open    => {}
            }
            if matches!(record.result, CloseReason::Cancelled | CloseReason::FeedLost | CloseReason::Manual) {
                stats.cancelled_count += 1;
            }
            if record.is_win() {
                wins += 1;
            }
            stats.total_profit += record.result_percent;
        }

        if stats.total_operations > 0 {
            stats.win_rate   = wins as f64 / stats.total_operations as f64 * 100.0;
            stats.avg_profit = stats.total_profit / stats.total_operations as f64;
        }
        stats
    }
}
