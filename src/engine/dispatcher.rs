//! # engine::dispatcher
//!
//! AlertDispatcher.
//!
//! ```text
//!  GroupConsumer ─┐
//!  GroupConsumer ─┼─ try_send ─▶ [bounded mpsc] ─▶ worker ─▶ dedupe ─▶ Notifier
//!  GroupConsumer ─┘   (drop-new                           └──▶ trade queue
//!                      when full)
//! ```
//!
//! Producers never wait on the worker. A full queue drops the new event and
//! counts it. The worker exits once every [`DispatchHandle`] is gone and the
//! queue is drained.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::events::MonitorEvent;
use crate::models::{DispatchedAlert, MoveEvent};
use crate::notify::{format, Notifier};
use crate::state::{AppState, SharedState};

// ─── DedupeIndex ──────────────────────────────────────────────────────────────

/// `(symbol, time bucket)` keys seen recently. Only the newest
/// `retain` buckets are kept.
#[derive(Debug)]
pub struct DedupeIndex {
    bucket_secs: i64,
    retain:      i64,
    buckets:     BTreeMap<i64, HashSet<String>>,
}

impl DedupeIndex {
    pub fn new(bucket: std::time::Duration, retain: u64) -> Self {
        Self {
            bucket_secs: (bucket.as_secs() as i64).max(1),
            retain:      (retain as i64).max(1),
            buckets:     BTreeMap::new(),
        }
    }

    pub fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.bucket_secs)
    }

    /// `true` if `(symbol, bucket(at))` has not been seen yet.
    pub fn admit(&mut self, symbol: &str, at: DateTime<Utc>) -> bool {
        let bucket = self.bucket_of(at);
        let newest = self.buckets.keys().next_back().copied().unwrap_or(bucket).max(bucket);
        let floor = newest - self.retain + 1;

        if bucket < floor {
            // older than anything retained; nothing to compare against
            return true;
        }

        let fresh = self.buckets.entry(bucket).or_default().insert(symbol.to_string());
        self.buckets = self.buckets.split_off(&floor);
        fresh
    }

    /// Total keys currently retained.
    pub fn len(&self) -> usize {
        self.buckets.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

// ─── DispatchHandle ───────────────────────────────────────────────────────────

/// Producer side, cloned into every GroupConsumer.
#[derive(Clone)]
pub struct DispatchHandle {
    tx:    mpsc::Sender<MoveEvent>,
    state: SharedState,
}

impl DispatchHandle {
    /// Enqueue without waiting. Returns `false` if the event was dropped.
    pub fn dispatch(&self, event: MoveEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = AppState::incr(&self.state.dropped_alerts);
                warn!(symbol = %event.symbol, dropped, "⚠️ Alert queue full — event dropped");
                self.state.broadcast(&MonitorEvent::AlertDropped { symbol: event.symbol });
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(symbol = %event.symbol, "Alert queue closed — event discarded");
                false
            }
        }
    }
}

// ─── AlertDispatcher ──────────────────────────────────────────────────────────

pub struct AlertDispatcher {
    rx:       mpsc::Receiver<MoveEvent>,
    dedupe:   DedupeIndex,
    notifier: Arc<dyn Notifier>,
    /// Delivered alerts handed to the orchestrator for trade monitoring.
    trade_tx: Option<mpsc::Sender<DispatchedAlert>>,
    state:    SharedState,
}

/// Build the bounded queue and its single worker.
pub fn channel(
    config:   &DispatchConfig,
    notifier: Arc<dyn Notifier>,
    trade_tx: Option<mpsc::Sender<DispatchedAlert>>,
    state:    SharedState,
) -> (DispatchHandle, AlertDispatcher) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let handle = DispatchHandle { tx, state: state.clone() };
    let worker = AlertDispatcher {
        rx,
        dedupe: DedupeIndex::new(config.dedupe_bucket, config.retain_buckets),
        notifier,
        trade_tx,
        state,
    };
    (handle, worker)
}

impl AlertDispatcher {
    /// Drain the queue until all producers are dropped. Returns the number of
    /// alerts delivered.
    pub async fn run(mut self) -> u64 {
        let mut delivered = 0u64;
        while let Some(event) = self.rx.recv().await {
            if self.dispatch(event).await {
                delivered += 1;
            }
        }
        debug!(delivered, "Alert dispatcher drained");
        delivered
    }

    /// Dedupe, notify, hand off. Failures never leave this function.
    async fn dispatch(&mut self, event: MoveEvent) -> bool {
        if !self.dedupe.admit(&event.symbol, event.detected_at) {
            debug!(symbol = %event.symbol, "Duplicate alert suppressed");
            return false;
        }

        AppState::incr(&self.state.alert_count);
        info!(
            symbol  = %event.symbol,
            change  = format_args!("{:+.2}%", event.percent_change),
            price   = event.current_price,
            "🚨 Move detected"
        );
        self.state.broadcast(&MonitorEvent::MoveDetected { alert: Box::new(event.clone()) });

        let message_id = match self.notifier.send(&format::move_alert(&event), None).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(symbol = %event.symbol, error = %e, "⚠️ Alert notification failed");
                None
            }
        };

        if let Some(trade_tx) = &self.trade_tx {
            let symbol = event.symbol.clone();
            if let Err(e) = trade_tx.try_send(DispatchedAlert { event, message_id }) {
                debug!(%symbol, reason = %e, "Trade hand-off skipped");
            }
        }
        true
    }
}
