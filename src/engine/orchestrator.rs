//! # engine::orchestrator
//!
//! Runs monitoring **cycles**. Each cycle:
//!
//! ```text
//! universe ─▶ partition ─▶ SlidingWindowStore ─▶ N × GroupConsumer ─┐
//!                                                                   ▼
//!            TradeMonitor × M ◀── trade queue ◀── AlertDispatcher ◀─┘
//! ```
//!
//! A cycle ends at the `CYCLE_SECS` boundary, on shutdown, or early when every
//! consumer has closed and no trade is running. Ending a cycle cancels one
//! child token; consumers drain, trade monitors finalize, the dispatcher
//! empties its queue. The next cycle rebuilds partitions from a fresh universe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::consumer::{GroupConsumer, GroupReport, GroupStatus};
use crate::engine::detector::MoveDetector;
use crate::engine::dispatcher;
use crate::engine::partition::partition;
use crate::engine::trade_monitor::TradeMonitor;
use crate::engine::window::SlidingWindowStore;
use crate::error::MonitorError;
use crate::events::MonitorEvent;
use crate::feed::{MarketFeed, UniverseProvider};
use crate::models::{DispatchedAlert, Position, TradeRecord};
use crate::notify::Notifier;
use crate::state::{AppState, SharedState};
use crate::store::TradeStore;

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle:            u64,
    pub groups:           Vec<GroupReport>,
    pub alerts_delivered: u64,
    pub trades_finalized: usize,
}

pub struct Orchestrator {
    config:   Arc<Config>,
    feed:     Arc<dyn MarketFeed>,
    universe: Arc<dyn UniverseProvider>,
    notifier: Arc<dyn Notifier>,
    store:    Arc<dyn TradeStore>,
    state:    SharedState,
}

impl Orchestrator {
    pub fn new(
        config:   Arc<Config>,
        feed:     Arc<dyn MarketFeed>,
        universe: Arc<dyn UniverseProvider>,
        notifier: Arc<dyn Notifier>,
        store:    Arc<dyn TradeStore>,
        state:    SharedState,
    ) -> Self {
        Self { config, feed, universe, notifier, store, state }
    }

    /// Cycle forever until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let heartbeat = tokio::spawn(heartbeat(
            self.state.clone(),
            self.config.heartbeat,
            shutdown.clone(),
        ));

        while !shutdown.is_cancelled() {
            match self.run_cycle(&shutdown).await {
                Ok(report) => info!(
                    cycle  = report.cycle,
                    groups = report.groups.len(),
                    alerts = report.alerts_delivered,
                    trades = report.trades_finalized,
                    "🔁 Cycle finished"
                ),
                Err(e) => {
                    error!(error = %e, retry_in = ?self.config.cycle_retry, "❌ Cycle failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.cycle_retry) => {}
                    }
                }
            }
        }

        let _ = heartbeat.await;
        info!("🛑 Orchestrator stopped");
    }

    /// One full cycle, including teardown.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<CycleReport, MonitorError> {
        let config = &self.config;
        let cycle = AppState::incr(&self.state.cycle_count);

        let symbols = self
            .universe
            .list_candidates()
            .await
            .map_err(|e| MonitorError::FatalConfig(format!("universe unavailable: {e}")))?;
        if symbols.is_empty() {
            return Err(MonitorError::FatalConfig("universe is empty".into()));
        }

        let groups = partition(symbols.iter().cloned(), config.stream.max_group_size);
        let windows = SlidingWindowStore::new(config.detection.window);
        self.state.set_windows(windows.clone()).await;

        info!(cycle, symbols = symbols.len(), groups = groups.len(), "🚀 Cycle started");
        self.state.broadcast(&MonitorEvent::CycleStarted {
            cycle,
            symbols: symbols.len(),
            groups:  groups.len(),
        });

        // ── Wiring ────────────────────────────────────────────────────────────
        let cycle_token = shutdown.child_token();
        let (trade_tx, mut trade_rx) = mpsc::channel::<DispatchedAlert>(config.trade.max_active_trades.max(1));
        let (dispatch, worker) = dispatcher::channel(
            &config.dispatch,
            self.notifier.clone(),
            Some(trade_tx),
            self.state.clone(),
        );
        let dispatcher_task = tokio::spawn(worker.run());

        let detector = MoveDetector::new(config.detection.threshold_pct);
        let mut consumers = JoinSet::new();
        for group in groups {
            let shard = windows.shard(group.id).await;
            let consumer = GroupConsumer::new(
                group,
                self.feed.clone(),
                shard,
                detector,
                dispatch.clone(),
                config.stream.clone(),
                self.state.clone(),
            );
            consumers.spawn(consumer.run(cycle_token.clone()));
        }
        // consumers hold the only producers now
        drop(dispatch);

        // ── Cycle loop ────────────────────────────────────────────────────────
        let mut trades: JoinSet<TradeRecord> = JoinSet::new();
        let mut reports = Vec::new();
        let mut finalized = 0usize;
        let mut alerts_open = true;
        let boundary = tokio::time::sleep(config.cycle);
        tokio::pin!(boundary);

        loop {
            if consumers.is_empty() && trades.is_empty() && !alerts_open {
                info!(cycle, "All groups closed — ending cycle early");
                break;
            }

            tokio::select! {
                _ = &mut boundary => {
                    info!(cycle, "⏰ Cycle boundary reached");
                    break;
                }
                _ = cycle_token.cancelled() => {
                    info!(cycle, "🛑 Shutdown requested");
                    break;
                }
                alert = trade_rx.recv(), if alerts_open => match alert {
                    Some(alert) => self.spawn_trade(&mut trades, alert, &cycle_token).await,
                    // dispatcher finished: every consumer is gone
                    None => alerts_open = false,
                },
                Some(joined) = consumers.join_next(), if !consumers.is_empty() => {
                    if let Some(report) = self.on_group_closed(joined) {
                        reports.push(report);
                    }
                }
                Some(joined) = trades.join_next(), if !trades.is_empty() => {
                    finalized += on_trade_finished(joined);
                }
            }
        }

        // ── Teardown ──────────────────────────────────────────────────────────
        cycle_token.cancel();

        while let Some(joined) = consumers.join_next().await {
            if let Some(report) = self.on_group_closed(joined) {
                reports.push(report);
            }
        }
        // late alerts are not turned into trades once the cycle is over
        drop(trade_rx);
        let alerts_delivered = dispatcher_task.await.unwrap_or_else(|e| {
            error!(error = %e, "❌ Dispatcher task failed");
            0
        });
        while let Some(joined) = trades.join_next().await {
            finalized += on_trade_finished(joined);
        }

        if !reports.is_empty() && reports.iter().all(|r| matches!(r.status, GroupStatus::Failed(_))) {
            return Err(MonitorError::FatalConfig(format!(
                "all {} groups failed in cycle {cycle}",
                reports.len()
            )));
        }

        Ok(CycleReport {
            cycle,
            groups: reports,
            alerts_delivered,
            trades_finalized: finalized,
        })
    }

    /// Start a TradeMonitor unless the symbol is already monitored or the
    /// registry is full.
    async fn spawn_trade(
        &self,
        trades: &mut JoinSet<TradeRecord>,
        alert:  DispatchedAlert,
        token:  &CancellationToken,
    ) {
        let event = &alert.event;
        let position = Position::open(&event.symbol, event.direction(), event.current_price, Utc::now());
        let symbol = event.symbol.clone();

        let monitor = TradeMonitor::new(
            alert,
            position.clone(),
            self.feed.clone(),
            self.notifier.clone(),
            self.store.clone(),
            self.state.clone(),
            self.config.trade.horizon,
        );

        if !self
            .state
            .register_trade(&position, monitor.close_handle(), self.config.trade.max_active_trades)
            .await
        {
            debug!(%symbol, "Trade not opened (already monitored or registry full)");
            return;
        }
        trades.spawn(monitor.run(token.child_token()));
    }

    fn on_group_closed(&self, joined: Result<GroupReport, tokio::task::JoinError>) -> Option<GroupReport> {
        match joined {
            Ok(report) => {
                if report.status != GroupStatus::Completed {
                    warn!(group = report.group_id, status = %report.status, "⚠️ Group closed early");
                }
                self.state.broadcast(&MonitorEvent::GroupClosed {
                    group:      report.group_id,
                    status:     report.status.to_string(),
                    ticks:      report.ticks,
                    reconnects: report.reconnects,
                });
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "❌ Group consumer task failed");
                None
            }
        }
    }
}

fn on_trade_finished(joined: Result<TradeRecord, tokio::task::JoinError>) -> usize {
    match joined {
        Ok(record) => {
            debug!(symbol = %record.symbol, level = %record.level, "Trade task joined");
            1
        }
        Err(e) => {
            error!(error = %e, "❌ Trade monitor task failed");
            0
        }
    }
}

/// Periodic counter log + monitor event.
async fn heartbeat(state: SharedState, every: Duration, shutdown: CancellationToken) {
    use std::sync::atomic::Ordering;

    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick fires immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let tick_count    = state.tick_count.load(Ordering::Relaxed);
                let alert_count   = state.alert_count.load(Ordering::Relaxed);
                let active_trades = state.active_count().await;
                info!(
                    ticks      = tick_count,
                    alerts     = alert_count,
                    dropped    = state.dropped_alerts.load(Ordering::Relaxed),
                    reconnects = state.reconnects.load(Ordering::Relaxed),
                    active_trades,
                    "💓 Heartbeat"
                );
                state.broadcast(&MonitorEvent::Heartbeat { tick_count, alert_count, active_trades });
            }
        }
    }
}
