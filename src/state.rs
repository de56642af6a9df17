//! # state
//!
//! Shared state read by the HTTP monitor and written by the engine.
//!
//! * counters are plain atomics bumped on the hot path
//! * `active_trades` is the trade registry: at most one live position per
//!   symbol, bounded by `MAX_ACTIVE_TRADES`, each with the token that closes
//!   it by hand
//! * `windows` points at the current cycle's [`SlidingWindowStore`] for
//!   observability reads; the engine never reads it back

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::engine::window::SlidingWindowStore;
use crate::events::MonitorEvent;
use crate::models::Position;
use crate::store::{MemorySheet, MemoryTradeStore, SheetTradeStore};

const BROADCAST_CAPACITY: usize = 256;

/// Registry entry for one live position.
#[derive(Debug, Clone)]
pub struct ActiveTrade {
    pub position: Position,
    close:        CancellationToken,
}

// ─── AppState ─────────────────────────────────────────────────────────────────

pub struct AppState {
    // ── Counters ──────────────────────────────────────────────────────────────
    pub tick_count:     AtomicU64,
    pub alert_count:    AtomicU64,
    pub dropped_alerts: AtomicU64,
    pub reconnects:     AtomicU64,
    pub cycle_count:    AtomicU64,

    // ── Trades ────────────────────────────────────────────────────────────────
    /// Live positions keyed by symbol.
    pub active_trades: RwLock<HashMap<String, ActiveTrade>>,
    /// Finalized trades (statistics + history endpoints).
    pub trades:        Arc<MemoryTradeStore>,
    /// Spreadsheet ledger mirror.
    pub sheet:         Arc<SheetTradeStore<MemorySheet>>,

    // ── Windows ───────────────────────────────────────────────────────────────
    pub windows: RwLock<Option<SlidingWindowStore>>,

    // ── Monitor / WebSocket ───────────────────────────────────────────────────
    pub broadcast_tx: broadcast::Sender<String>,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            tick_count:     AtomicU64::new(0),
            alert_count:    AtomicU64::new(0),
            dropped_alerts: AtomicU64::new(0),
            reconnects:     AtomicU64::new(0),
            cycle_count:    AtomicU64::new(0),
            active_trades:  RwLock::new(HashMap::new()),
            trades:         Arc::new(MemoryTradeStore::new()),
            sheet:          Arc::new(SheetTradeStore::new(MemorySheet::new())),
            windows:        RwLock::new(None),
            broadcast_tx,
            started_at:     Utc::now(),
        }
    }

    // ── Helper Methods ────────────────────────────────────────────────────────

    /// Send to every `/ws/monitor` client. No receivers is not an error.
    pub fn broadcast(&self, event: &MonitorEvent) {
        let _ = self.broadcast_tx.send(event.to_json());
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Claim the registry slot for `position.symbol`.
    ///
    /// Returns `false` when the symbol already has a live position or the
    /// registry is full.
    pub async fn register_trade(
        &self,
        position:   &Position,
        close:      CancellationToken,
        max_active: usize,
    ) -> bool {
        let mut trades = self.active_trades.write().await;
        if trades.contains_key(&position.symbol) || trades.len() >= max_active {
            return false;
        }
        let entry = ActiveTrade { position: position.clone(), close };
        trades.insert(position.symbol.clone(), entry);
        true
    }

    pub async fn update_trade(&self, position: &Position) {
        let mut trades = self.active_trades.write().await;
        if let Some(slot) = trades.get_mut(&position.symbol) {
            if slot.position.position_id == position.position_id {
                slot.position = position.clone();
            }
        }
    }

    pub async fn release_trade(&self, position: &Position) {
        let mut trades = self.active_trades.write().await;
        if trades
            .get(&position.symbol)
            .is_some_and(|t| t.position.position_id == position.position_id)
        {
            trades.remove(&position.symbol);
        }
    }

    /// Live position for `symbol`, if one is monitored.
    pub async fn active_trade(&self, symbol: &str) -> Option<Position> {
        self.active_trades.read().await.get(symbol).map(|t| t.position.clone())
    }

    /// Every live position, oldest first.
    pub async fn active_positions(&self) -> Vec<Position> {
        let mut positions: Vec<_> = self
            .active_trades
            .read()
            .await
            .values()
            .map(|t| t.position.clone())
            .collect();
        positions.sort_by_key(|p| p.opened_at);
        positions
    }

    /// Ask the monitor of `symbol` to close its position. The registry slot is
    /// released by the monitor once the record is persisted.
    pub async fn close_trade(&self, symbol: &str) -> Option<Position> {
        let trades = self.active_trades.read().await;
        let trade = trades.get(symbol)?;
        trade.close.cancel();
        Some(trade.position.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.active_trades.read().await.len()
    }

    pub async fn set_windows(&self, store: SlidingWindowStore) {
        *self.windows.write().await = Some(store);
    }
}

impl Default for AppState {
    fn default() -> Self { Self::new() }
}

pub type SharedState = Arc<AppState>;

pub fn build_state() -> SharedState {
    Arc::new(AppState::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    #[tokio::test]
    async fn test_trade_registry_guards() {
        let state = AppState::new();
        let a = Position::open("AAAUSDT", Direction::Long, 1.0, Utc::now());
        let a_again = Position::open("AAAUSDT", Direction::Short, 1.0, Utc::now());
        let b = Position::open("BBBUSDT", Direction::Long, 1.0, Utc::now());

        assert!(state.register_trade(&a, CancellationToken::new(), 1).await);
        assert!(!state.register_trade(&a_again, CancellationToken::new(), 5).await, "duplicate symbol");
        assert!(!state.register_trade(&b, CancellationToken::new(), 1).await, "registry full");

        // a stale handle must not release the live slot
        state.release_trade(&a_again).await;
        assert_eq!(state.active_count().await, 1);

        state.release_trade(&a).await;
        assert!(state.register_trade(&b, CancellationToken::new(), 1).await);
    }

    #[tokio::test]
    async fn test_close_trade_fires_handle() {
        let state = AppState::new();
        let position = Position::open("AAAUSDT", Direction::Long, 1.0, Utc::now());
        let close = CancellationToken::new();
        assert!(state.register_trade(&position, close.clone(), 5).await);

        assert!(state.close_trade("BBBUSDT").await.is_none());
        let closing = state.close_trade("AAAUSDT").await.unwrap();
        assert_eq!(closing.position_id, position.position_id);
        assert!(close.is_cancelled());
        // still listed until the monitor finalizes
        assert_eq!(state.active_count().await, 1);
    }
}
