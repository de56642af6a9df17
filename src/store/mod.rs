//! # store
//!
//! Trade persistence collaborator.
//!
//! A [`TradeStore`] receives the lifecycle of every monitored position:
//!
//! ```text
//! opened(position) → level_reached(position, TP1) → … → insert(record)
//! ```
//!
//! `insert` is called exactly once per position by the trade monitor's
//! finalizer. The progress hooks are optional (default no-op) and only matter
//! to row-oriented stores such as the spreadsheet ledger.

pub mod sheet;
pub mod supabase;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::StoreError;
use crate::models::{Level, Position, TradeRecord, TradeStats};

pub use sheet::{MemorySheet, SheetBackend, SheetTradeStore};
pub use supabase::SupabaseStore;

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    async fn opened(&self, _position: &Position) -> Result<(), StoreError> {
        Ok(())
    }

    async fn level_reached(&self, _position: &Position, _level: Level) -> Result<(), StoreError> {
        Ok(())
    }

    /// Persist a finalized trade.
    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError>;
}

// ─── MemoryTradeStore ─────────────────────────────────────────────────────────

/// Records kept by [`MemoryTradeStore::new`].
pub const HISTORY_CAPACITY: usize = 1_000;

/// Most recent finalized trades, kept in memory for the monitor endpoints.
/// The oldest record is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct MemoryTradeStore {
    records:  RwLock<VecDeque<TradeRecord>>,
    capacity: usize,
}

impl Default for MemoryTradeStore {
    fn default() -> Self { Self::new() }
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records:  RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Up to `limit` records, newest first, optionally for one symbol.
    pub async fn history(&self, symbol: Option<&str>, limit: usize) -> Vec<TradeRecord> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| symbol.map_or(true, |s| r.symbol == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn stats(&self) -> TradeStats {
        TradeStats::from_records(self.records.read().await.iter())
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }
}

// ─── CompositeStore ───────────────────────────────────────────────────────────

/// Fans every call out to all configured stores. A failing store is logged
/// and does not prevent the others from receiving the call.
#[derive(Default, Clone)]
pub struct CompositeStore {
    stores: Vec<Arc<dyn TradeStore>>,
}

impl CompositeStore {
    pub fn with(mut self, store: Arc<dyn TradeStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[async_trait]
impl TradeStore for CompositeStore {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn opened(&self, position: &Position) -> Result<(), StoreError> {
        for store in &self.stores {
            if let Err(e) = store.opened(position).await {
                warn!(store = store.name(), symbol = %position.symbol, error = %e, "⚠️ Store open hook failed");
            }
        }
        Ok(())
    }

    async fn level_reached(&self, position: &Position, level: Level) -> Result<(), StoreError> {
        for store in &self.stores {
            if let Err(e) = store.level_reached(position, level).await {
                warn!(store = store.name(), symbol = %position.symbol, %level, error = %e, "⚠️ Store level hook failed");
            }
        }
        Ok(())
    }

    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        for store in &self.stores {
            if let Err(e) = store.insert(record).await {
                warn!(store = store.name(), symbol = %record.symbol, error = %e, "⚠️ Trade insert failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CloseReason, Direction};
    use chrono::Utc;
    use uuid::Uuid;

    pub(crate) fn sample_record(symbol: &str, level: Level, pct: f64) -> TradeRecord {
        let now = Utc::now();
        TradeRecord {
            trade_id:       Uuid::new_v4(),
            symbol:         symbol.into(),
            direction:      Direction::Long,
            entry_price:    100.0,
            alert_percent:  22.0,
            opened_at:      now,
            level,
            result:         CloseReason::Target,
            close_price:    100.0 + pct,
            closed_at:      now,
            result_percent: pct,
        }
    }

    struct FailingStore;

    #[async_trait]
    impl TradeStore for FailingStore {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn insert(&self, _record: &TradeRecord) -> Result<(), StoreError> {
            Err(StoreError::Transport("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_memory_store_stats() {
        let store = MemoryTradeStore::new();
        store.insert(&sample_record("AAAUSDT", Level::Tp4, 20.0)).await.unwrap();
        store.insert(&sample_record("BBBUSDT", Level::Stop, -5.0)).await.unwrap();

        let stats = store.stats().await;
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.tp4_count, 1);
        assert_eq!(stats.sl_count, 1);
        assert!((stats.win_rate - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_composite_isolates_failures() {
        let memory = Arc::new(MemoryTradeStore::new());
        let composite = CompositeStore::default()
            .with(Arc::new(FailingStore))
            .with(memory.clone());

        composite.insert(&sample_record("AAAUSDT", Level::Tp1, 5.0)).await.unwrap();
        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_store_evicts_oldest() {
        let store = MemoryTradeStore::with_capacity(2);
        for symbol in ["AAAUSDT", "BBBUSDT", "CCCUSDT"] {
            store.insert(&sample_record(symbol, Level::Tp1, 5.0)).await.unwrap();
        }

        let symbols: Vec<_> = store.history(None, 10).await.into_iter().map(|r| r.symbol).collect();
        assert_eq!(symbols, ["CCCUSDT", "BBBUSDT"]);
    }

    #[tokio::test]
    async fn test_history_filters_and_limits() {
        let store = MemoryTradeStore::new();
        store.insert(&sample_record("AAAUSDT", Level::Tp1, 5.0)).await.unwrap();
        store.insert(&sample_record("BBBUSDT", Level::Stop, -5.0)).await.unwrap();
        store.insert(&sample_record("AAAUSDT", Level::Tp3, 15.0)).await.unwrap();

        let aaa = store.history(Some("AAAUSDT"), 10).await;
        assert_eq!(aaa.len(), 2);
        assert_eq!(aaa[0].level, Level::Tp3, "newest first");

        let latest = store.history(None, 1).await;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].symbol, "AAAUSDT");
    }
}
