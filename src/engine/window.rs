//! # engine::window
//!
//! **SlidingWindowStore**: time-bounded price history per symbol.
//!
//! ```text
//! SlidingWindowStore ── shard(group 0) ── { "AAAUSDT": PriceWindow, ... }   ← written by consumer 0 only
//!                    ├─ shard(group 1) ── { "BBBUSDT": PriceWindow, ... }   ← written by consumer 1 only
//!                    └─ ...
//! ```
//!
//! Partitioning gives every symbol exactly one writer, so each shard's lock is
//! only ever contended by observability reads (point-in-time snapshots).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::engine::detector::MoveDetector;
use crate::models::{MoveEvent, Sample, Tick};

// ─── PriceWindow ──────────────────────────────────────────────────────────────

/// Ordered samples for one symbol; oldest at the front.
#[derive(Debug, Clone, Default)]
pub struct PriceWindow {
    samples:     VecDeque<Sample>,
    last_volume: f64,
}

impl PriceWindow {
    /// Append and evict everything older than `now - span`, where `now` is the
    /// new sample's timestamp. Timestamps older than the current latest are
    /// clamped forward so the sequence stays non-decreasing.
    pub fn record(&mut self, price: f64, volume: f64, at: DateTime<Utc>, span: Duration) {
        let at = match self.samples.back() {
            Some(latest) if latest.at > at => latest.at,
            _ => at,
        };
        self.samples.push_back(Sample::new(at, price));
        self.last_volume = volume;

        let cutoff = at - span;
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn oldest(&self) -> Option<Sample> {
        self.samples.front().copied()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn last_volume(&self) -> f64 {
        self.last_volume
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

// ─── WindowShard ──────────────────────────────────────────────────────────────

/// The windows owned by one symbol group. Cloning shares the same map.
#[derive(Debug, Clone)]
pub struct WindowShard {
    span:    Duration,
    windows: Arc<RwLock<HashMap<String, PriceWindow>>>,
}

impl WindowShard {
    fn new(span: Duration) -> Self {
        Self {
            span,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append one sample for `symbol` and trim its window.
    pub async fn record(&self, symbol: &str, price: f64, volume: f64, at: DateTime<Utc>) {
        let mut windows = self.windows.write().await;
        windows
            .entry(symbol.to_string())
            .or_default()
            .record(price, volume, at, self.span);
    }

    pub async fn oldest(&self, symbol: &str) -> Option<Sample> {
        self.windows.read().await.get(symbol).and_then(PriceWindow::oldest)
    }

    pub async fn latest(&self, symbol: &str) -> Option<Sample> {
        self.windows.read().await.get(symbol).and_then(PriceWindow::latest)
    }

    pub async fn len(&self, symbol: &str) -> usize {
        self.windows.read().await.get(symbol).map_or(0, PriceWindow::len)
    }

    /// Clear history for `symbol` (post-alert).
    pub async fn reset(&self, symbol: &str) {
        if let Some(window) = self.windows.write().await.get_mut(symbol) {
            window.clear();
        }
    }

    /// Hot path: record the tick, evaluate, and reset on fire, all under one
    /// write guard so observers never see a fired-but-not-reset window.
    pub async fn ingest(&self, tick: &Tick, detector: &MoveDetector) -> Option<MoveEvent> {
        let mut windows = self.windows.write().await;
        let window = windows.entry(tick.symbol.clone()).or_default();
        window.record(tick.last_price, tick.quote_volume, tick.event_time, self.span);

        let event = detector.evaluate(&tick.symbol, window)?;
        window.clear();
        Some(event)
    }

    pub async fn symbol_count(&self) -> usize {
        self.windows.read().await.len()
    }

    /// Point-in-time copy of one symbol's samples.
    pub async fn snapshot(&self, symbol: &str) -> Option<Vec<Sample>> {
        self.windows
            .read()
            .await
            .get(symbol)
            .map(|w| w.samples().copied().collect())
    }
}

// ─── SlidingWindowStore ───────────────────────────────────────────────────────

/// Explicit store object handed to every consumer of a cycle.
#[derive(Debug, Clone)]
pub struct SlidingWindowStore {
    span:   Duration,
    shards: Arc<RwLock<HashMap<usize, WindowShard>>>,
}

impl SlidingWindowStore {
    pub fn new(span: std::time::Duration) -> Self {
        Self {
            span:   Duration::from_std(span).unwrap_or_else(|_| Duration::hours(2)),
            shards: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Shard for `group_id`, created on first use. The returned handle is the
    /// only writer for that group's symbols.
    pub async fn shard(&self, group_id: usize) -> WindowShard {
        let mut shards = self.shards.write().await;
        shards
            .entry(group_id)
            .or_insert_with(|| WindowShard::new(self.span))
            .clone()
    }

    /// Number of symbols with at least one window across all shards.
    pub async fn tracked_symbols(&self) -> usize {
        let shards: Vec<WindowShard> = self.shards.read().await.values().cloned().collect();
        let mut total = 0;
        for shard in shards {
            total += shard.symbol_count().await;
        }
        total
    }

    /// Observability read across shards.
    pub async fn snapshot(&self, symbol: &str) -> Option<Vec<Sample>> {
        let shards: Vec<WindowShard> = self.shards.read().await.values().cloned().collect();
        for shard in shards {
            if let Some(samples) = shard.snapshot(symbol).await {
                return Some(samples);
            }
        }
        None
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_trim_keeps_only_span() {
        let mut window = PriceWindow::default();
        let span = Duration::seconds(100);

        for (secs, price) in [(0, 1.0), (50, 2.0), (120, 3.0), (149, 4.0), (260, 5.0)] {
            window.record(price, 0.0, t(secs), span);
            let now = t(secs);
            assert!(window.samples().all(|s| s.at >= now - span));
            let ordered: Vec<_> = window.samples().map(|s| s.at).collect();
            assert!(ordered.windows(2).all(|w| w[0] <= w[1]));
        }

        // 149 is 111s before 260 → evicted; only 260 survives.
        assert_eq!(window.len(), 1);
        assert_eq!(window.oldest().unwrap().price, 5.0);
    }

    #[test]
    fn test_boundary_sample_is_retained() {
        let mut window = PriceWindow::default();
        let span = Duration::seconds(100);
        window.record(1.0, 0.0, t(0), span);
        window.record(2.0, 0.0, t(100), span);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_out_of_order_timestamp_is_clamped() {
        let mut window = PriceWindow::default();
        let span = Duration::seconds(100);
        window.record(1.0, 0.0, t(50), span);
        window.record(2.0, 0.0, t(10), span);
        assert_eq!(window.latest().unwrap().at, t(50));
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_shard_record_oldest_latest_reset() {
        let store = SlidingWindowStore::new(std::time::Duration::from_secs(7_200));
        let shard = store.shard(0).await;

        shard.record("AAAUSDT", 10.0, 5.0, t(0)).await;
        shard.record("AAAUSDT", 11.0, 6.0, t(60)).await;

        assert_eq!(shard.oldest("AAAUSDT").await.unwrap().price, 10.0);
        assert_eq!(shard.latest("AAAUSDT").await.unwrap().price, 11.0);
        assert_eq!(store.tracked_symbols().await, 1);

        shard.reset("AAAUSDT").await;
        assert!(shard.oldest("AAAUSDT").await.is_none());
        assert_eq!(shard.len("AAAUSDT").await, 0);
        assert!(shard.latest("BBBUSDT").await.is_none());
    }

    #[tokio::test]
    async fn test_same_group_returns_same_shard() {
        let store = SlidingWindowStore::new(std::time::Duration::from_secs(60));
        store.shard(3).await.record("AAAUSDT", 1.0, 0.0, t(0)).await;
        let again = store.shard(3).await;
        assert_eq!(again.len("AAAUSDT").await, 1);
        assert_eq!(store.snapshot("AAAUSDT").await.unwrap().len(), 1);
        assert!(store.snapshot("ZZZUSDT").await.is_none());
    }
}
