//! # engine::consumer
//!
//! GroupConsumer state machine.
//!
//! ```text
//!  CONNECTING ──ok──▶ STREAMING ──cancel──▶ DRAINING ──▶ CLOSED
//!      ▲  │               │
//!      │  └─err─┐   stall / error / overflow
//!      │        ▼         │
//!      └──── RECONNECTING ◀┘ ──(attempts exhausted)──▶ CLOSED
//! ```
//!
//! One consumer owns one [`SymbolGroup`] and the matching [`WindowShard`], so
//! it is the only writer for those symbols. A valid tick resets the attempt
//! counter; a feed-side overflow waits `reconnect_cap × multiplier` instead of
//! the normal backoff.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::engine::detector::MoveDetector;
use crate::engine::dispatcher::DispatchHandle;
use crate::engine::partition::SymbolGroup;
use crate::engine::window::WindowShard;
use crate::error::FeedError;
use crate::feed::{MarketFeed, TickStream};
use crate::models::Tick;
use crate::state::{AppState, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
    Connecting,
    Streaming,
    Reconnecting,
    Draining,
    Closed,
}

/// Final status reported to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GroupStatus {
    /// Drained on cancellation.
    Completed,
    /// Gave up after repeated silence.
    Stalled,
    /// Gave up after repeated errors, or hit a fatal one.
    Failed(String),
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupStatus::Completed => f.write_str("completed"),
            GroupStatus::Stalled => f.write_str("stalled"),
            GroupStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group_id:   usize,
    pub status:     GroupStatus,
    pub ticks:      u64,
    pub alerts:     u64,
    pub reconnects: u32,
}

/// Why STREAMING ended.
enum Interruption {
    Cancelled,
    Stalled,
    Failed(FeedError),
}

#[derive(Default)]
struct Progress {
    attempt:    u32,
    ticks:      u64,
    alerts:     u64,
    reconnects: u32,
}

pub struct GroupConsumer {
    group:    SymbolGroup,
    feed:     Arc<dyn MarketFeed>,
    shard:    WindowShard,
    detector: MoveDetector,
    dispatch: DispatchHandle,
    config:   StreamConfig,
    state:    SharedState,
}

impl GroupConsumer {
    pub fn new(
        group:    SymbolGroup,
        feed:     Arc<dyn MarketFeed>,
        shard:    WindowShard,
        detector: MoveDetector,
        dispatch: DispatchHandle,
        config:   StreamConfig,
        state:    SharedState,
    ) -> Self {
        Self { group, feed, shard, detector, dispatch, config, state }
    }

    pub async fn run(self, token: CancellationToken) -> GroupReport {
        let group_id = self.group.id;
        let mut progress = Progress::default();
        let mut current = ConsumerState::Connecting;
        let mut stream: Option<TickStream> = None;
        // cause of the pending reconnect
        let mut last_failure: Option<FeedError> = None;
        let mut status = GroupStatus::Completed;

        info!(group = group_id, symbols = self.group.len(), "📡 Group consumer starting");

        loop {
            current = match current {
                ConsumerState::Connecting => {
                    let subscribed = tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        result = self.connect() => Some(result),
                    };
                    match subscribed {
                        None => ConsumerState::Draining,
                        Some(Ok(s)) => {
                            debug!(group = group_id, "Subscription open");
                            stream = Some(s);
                            ConsumerState::Streaming
                        }
                        Some(Err(e)) if e.is_fatal() => {
                            error!(group = group_id, error = %e, "❌ Fatal feed error");
                            status = GroupStatus::Failed(e.to_string());
                            ConsumerState::Closed
                        }
                        Some(Err(e)) => {
                            warn!(group = group_id, error = %e, "⚠️ Subscribe failed");
                            last_failure = Some(e);
                            ConsumerState::Reconnecting
                        }
                    }
                }

                ConsumerState::Streaming => {
                    let interruption = match stream.as_mut() {
                        Some(active) => self.stream_ticks(active, &token, &mut progress).await,
                        None => Interruption::Failed(FeedError::Closed),
                    };
                    match interruption {
                        Interruption::Cancelled => ConsumerState::Draining,
                        Interruption::Stalled => {
                            warn!(group = group_id, timeout = ?self.config.stall_timeout, "⚠️ Stream stalled");
                            stream = None;
                            last_failure = None;
                            ConsumerState::Reconnecting
                        }
                        Interruption::Failed(e) if e.is_fatal() => {
                            error!(group = group_id, error = %e, "❌ Fatal feed error");
                            status = GroupStatus::Failed(e.to_string());
                            drop(stream.take());
                            ConsumerState::Closed
                        }
                        Interruption::Failed(e) => {
                            warn!(group = group_id, error = %e, "⚠️ Stream interrupted");
                            stream = None;
                            last_failure = Some(e);
                            ConsumerState::Reconnecting
                        }
                    }
                }

                ConsumerState::Reconnecting => {
                    progress.attempt += 1;
                    if progress.attempt > self.config.max_attempts {
                        error!(group = group_id, attempts = self.config.max_attempts, "❌ Giving up on group");
                        status = match &last_failure {
                            None => GroupStatus::Stalled,
                            Some(e) => GroupStatus::Failed(e.to_string()),
                        };
                        ConsumerState::Closed
                    } else {
                        let delay = self.reconnect_delay(progress.attempt, last_failure.as_ref());
                        progress.reconnects += 1;
                        AppState::incr(&self.state.reconnects);
                        info!(group = group_id, attempt = progress.attempt, ?delay, "🔄 Reconnecting");

                        tokio::select! {
                            biased;
                            _ = token.cancelled() => ConsumerState::Draining,
                            _ = tokio::time::sleep(delay) => ConsumerState::Connecting,
                        }
                    }
                }

                ConsumerState::Draining => {
                    // dropping the stream closes the subscription
                    drop(stream.take());
                    debug!(group = group_id, "Draining");
                    status = GroupStatus::Completed;
                    ConsumerState::Closed
                }

                ConsumerState::Closed => break,
            };
        }

        let report = GroupReport {
            group_id,
            status,
            ticks:      progress.ticks,
            alerts:     progress.alerts,
            reconnects: progress.reconnects,
        };
        info!(group = group_id, status = %report.status, ticks = report.ticks, alerts = report.alerts, "📴 Group consumer closed");
        report
    }

    /// Subscribe, bounded by the stall timeout so a hung handshake counts as a
    /// failed attempt.
    async fn connect(&self) -> Result<TickStream, FeedError> {
        let limit = self.config.stall_timeout;
        match tokio::time::timeout(limit, self.feed.subscribe(self.group.symbols())).await {
            Ok(result) => result,
            Err(_elapsed) => Err(FeedError::Connection(format!("connect timed out after {limit:?}"))),
        }
    }

    fn reconnect_delay(&self, attempt: u32, cause: Option<&FeedError>) -> Duration {
        match cause {
            Some(e) if e.is_overflow() => self.config.overflow_backoff(),
            _ => self.config.backoff(attempt),
        }
    }

    /// Receive until cancelled, stalled or broken.
    async fn stream_ticks(
        &self,
        stream:   &mut TickStream,
        token:    &CancellationToken,
        progress: &mut Progress,
    ) -> Interruption {
        loop {
            let received = tokio::select! {
                biased;
                _ = token.cancelled() => return Interruption::Cancelled,
                received = tokio::time::timeout(self.config.stall_timeout, stream.next()) => received,
            };

            match received {
                Err(_elapsed) => return Interruption::Stalled,
                Ok(None) => return Interruption::Failed(FeedError::Closed),
                Ok(Some(Err(e))) if e.is_per_message() => {
                    debug!(group = self.group.id, error = %e, "Dropped malformed tick");
                }
                Ok(Some(Err(e))) => return Interruption::Failed(e),
                Ok(Some(Ok(tick))) => {
                    if !self.group.contains(&tick.symbol) {
                        continue;
                    }
                    progress.attempt = 0;
                    self.on_tick(tick, progress).await;
                }
            }
        }
    }

    async fn on_tick(&self, tick: Tick, progress: &mut Progress) {
        progress.ticks += 1;
        AppState::incr(&self.state.tick_count);

        if let Some(event) = self.shard.ingest(&tick, &self.detector).await {
            progress.alerts += 1;
            debug!(
                group  = self.group.id,
                symbol = %event.symbol,
                change = format_args!("{:+.2}%", event.percent_change),
                "Threshold crossed"
            );
            self.dispatch.dispatch(event);
        }
    }
}
