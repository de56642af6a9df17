//! # engine::detector
//!
//! **MoveDetector**: stateless threshold policy evaluated on every tick.
//!
//! ```text
//! change % = (latest − oldest) / oldest × 100
//! fire     ⇔ |change %| ≥ threshold        (boundary fires)
//! ```
//!
//! Policy is **reset-on-fire**: the caller clears the symbol's window when an
//! event is returned, so one excursion is reported once and the next alert
//! needs at least two fresh samples. Repeat-alert suppression over longer
//! periods belongs to the dispatcher's dedupe buckets, not to this type.

use tracing::debug;

use crate::engine::window::PriceWindow;
use crate::models::MoveEvent;

#[derive(Debug, Clone, Copy)]
pub struct MoveDetector {
    threshold_pct: f64,
}

impl MoveDetector {
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct: threshold_pct.abs() }
    }

    /// Percent change between oldest and latest sample; `None` with fewer
    /// than two samples or a non-positive reference.
    pub fn percent_change(window: &PriceWindow) -> Option<f64> {
        if window.len() < 2 {
            return None;
        }
        let oldest = window.oldest()?;
        let latest = window.latest()?;
        if oldest.price <= 0.0 {
            return None;
        }
        Some((latest.price - oldest.price) / oldest.price * 100.0)
    }

    pub fn evaluate(&self, symbol: &str, window: &PriceWindow) -> Option<MoveEvent> {
        let change = Self::percent_change(window)?;
        if change.abs() < self.threshold_pct {
            return None;
        }

        let oldest = window.oldest()?;
        let latest = window.latest()?;

        debug!(
            symbol,
            change,
            reference = oldest.price,
            current   = latest.price,
            "📊 Threshold crossed"
        );

        Some(MoveEvent {
            symbol:          symbol.to_string(),
            percent_change:  change,
            reference_price: oldest.price,
            current_price:   latest.price,
            volume:          window.last_volume(),
            detected_at:     latest.at,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
