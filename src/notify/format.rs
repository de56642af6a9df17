//! # notify::format
//!
//! Channel message text.
//!
//! ```text
//! 🟢 #AAAUSDT 📈 +30.00%
//! 💵 $13 💰 $48.2M
//! ```
//! Level updates are sent as replies to that message.

use crate::engine::trade_monitor::{STOP_LOSS_PCT, TAKE_PROFIT_PCTS};
use crate::models::{Direction, Level, MoveEvent, Position};

/// Alert for a detected move.
pub fn move_alert(event: &MoveEvent) -> String {
    let (dot, arrow) = match event.direction() {
        Direction::Long  => ("🟢", "📈"),
        Direction::Short => ("🔴", "📉"),
    };
    format!(
        "{dot} #{} {arrow} {:+.2}%\n💵 ${} 💰 ${:.1}M",
        event.symbol,
        event.percent_change,
        event.current_price,
        event.volume / 1_000_000.0,
    )
}

/// Reply for a level transition; `price` is the tick that caused it.
pub fn level_update(position: &Position, level: Level, price: f64) -> String {
    let result = position.result_percent(price);
    match level {
        Level::Tp1 | Level::Tp2 | Level::Tp3 | Level::Tp4 => {
            let pct = level
                .rank()
                .and_then(|r| TAKE_PROFIT_PCTS.get(r - 1))
                .copied()
                .unwrap_or_default();
            format!("✅ {level} (+{pct}%) #{} {}\n💵 ${price}", position.symbol, position.direction)
        }
        Level::Stop => format!(
            "❌ SL (-{STOP_LOSS_PCT}%) #{} {}\n💵 ${price}",
            position.symbol, position.direction
        ),
        Level::Timeout => format!(
            "⌛ TIMEOUT #{} {} {result:+.2}%\n💵 ${price}",
            position.symbol, position.direction
        ),
        Level::Open => format!("👀 #{} {} opened at ${price}", position.symbol, position.direction),
    }
}

/// Reply sent when monitoring ends without reaching a terminal level.
pub fn closed_early(position: &Position, price: f64, reason: &str) -> String {
    format!(
        "⏹️ #{} {} closed ({reason}) at {} {:+.2}%\n💵 ${price}",
        position.symbol,
        position.direction,
        position.level,
        position.result_percent(price),
    )
}
