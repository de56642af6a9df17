//! # engine::trade_monitor
//!
//! TP/SL state machine for one alert.
//!
//! ```text
//!            ┌──────── price ≤ stop (LONG) ──────▶ STOP
//!   OPEN ────┤
//!            └─ +5% ─▶ TP1 ─ +10% ─▶ TP2 ─ +15% ─▶ TP3 ─ +20% ─▶ TP4
//!   OPEN ── horizon ──▶ TIMEOUT
//! ```
//!
//! * Targets are computed once at open; SHORT mirrors the signs.
//! * TP levels are climbed one at a time. A tick that gaps past several
//!   targets emits every intermediate transition in order.
//! * STOP is armed only while the position is still at OPEN.
//! * Every exit path (terminal level, horizon, cancellation, lost feed) goes
//!   through [`TradeMonitor::finalize`], which persists exactly one record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::MonitorEvent;
use crate::feed::{MarketFeed, TickStream};
use crate::models::{CloseReason, Direction, DispatchedAlert, Level, Position, TradeRecord};
use crate::notify::{format, Notifier};
use crate::state::SharedState;
use crate::store::TradeStore;

/// Favourable move (percent) for TP1..TP4.
pub const TAKE_PROFIT_PCTS: [f64; 4] = [5.0, 10.0, 15.0, 20.0];
/// Adverse move (percent) for the stop.
pub const STOP_LOSS_PCT: f64 = 5.0;
/// Once TP1 is reached the position is treated as de-risked and the stop is
/// no longer checked.
pub const STOP_ONLY_FROM_OPEN: bool = true;

const RESUBSCRIBE_ATTEMPTS: u32 = 3;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

// ─── TradeLevels ──────────────────────────────────────────────────────────────

/// Absolute price targets for one position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeLevels {
    pub direction:    Direction,
    pub take_profits: [f64; 4],
    pub stop:         f64,
}

impl TradeLevels {
    pub fn new(direction: Direction, entry: f64) -> Self {
        let sign = direction.sign();
        Self {
            direction,
            take_profits: TAKE_PROFIT_PCTS.map(|pct| entry * (1.0 + sign * pct / 100.0)),
            stop:         entry * (1.0 - sign * STOP_LOSS_PCT / 100.0),
        }
    }

    pub fn take_profit(&self, level: Level) -> Option<f64> {
        let rank = level.rank().filter(|&r| r > 0)?;
        self.take_profits.get(rank - 1).copied()
    }

    fn reached(&self, target: f64, price: f64) -> bool {
        match self.direction {
            Direction::Long  => price >= target,
            Direction::Short => price <= target,
        }
    }

    fn stop_hit(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long  => price <= self.stop,
            Direction::Short => price >= self.stop,
        }
    }

    /// Apply one price to `position`, returning the transitions it caused in
    /// order. Terminal positions only record the price.
    pub fn advance(&self, position: &mut Position, price: f64) -> Vec<Level> {
        position.last_price = price;
        if position.level.is_terminal() {
            return Vec::new();
        }

        let stop_armed = position.level == Level::Open || !STOP_ONLY_FROM_OPEN;
        if stop_armed && self.stop_hit(price) {
            position.level = Level::Stop;
            return vec![Level::Stop];
        }

        let mut transitions = Vec::new();
        while let Some(next) = position.level.next_take_profit() {
            match self.take_profit(next) {
                Some(target) if self.reached(target, price) => {
                    position.level = next;
                    transitions.push(next);
                }
                _ => break,
            }
        }
        transitions
    }
}

// ─── TradeMonitor ─────────────────────────────────────────────────────────────

pub struct TradeMonitor {
    alert:    DispatchedAlert,
    position: Position,
    levels:   TradeLevels,
    feed:     Arc<dyn MarketFeed>,
    notifier: Arc<dyn Notifier>,
    store:    Arc<dyn TradeStore>,
    state:    SharedState,
    horizon:  Duration,
    /// Operator close, independent of the cycle token.
    close:    CancellationToken,
}

impl TradeMonitor {
    pub fn new(
        alert:    DispatchedAlert,
        position: Position,
        feed:     Arc<dyn MarketFeed>,
        notifier: Arc<dyn Notifier>,
        store:    Arc<dyn TradeStore>,
        state:    SharedState,
        horizon:  Duration,
    ) -> Self {
        let levels = TradeLevels::new(position.direction, position.entry_price);
        Self {
            alert,
            position,
            levels,
            feed,
            notifier,
            store,
            state,
            horizon,
            close: CancellationToken::new(),
        }
    }

    /// Token that closes this position with [`CloseReason::Manual`].
    pub fn close_handle(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Watch until a terminal condition, then finalize. Always returns the
    /// persisted record.
    pub async fn run(mut self, token: CancellationToken) -> TradeRecord {
        let reason = self.watch(&token).await;
        self.finalize(reason).await
    }

    async fn watch(&mut self, token: &CancellationToken) -> CloseReason {
        let deadline = Instant::now() + self.horizon;
        let symbol = self.position.symbol.clone();

        if let Err(e) = self.store.opened(&self.position).await {
            warn!(%symbol, error = %e, "⚠️ Store open hook failed");
        }
        self.state.broadcast(&MonitorEvent::TradeOpened {
            position: Box::new(self.position.clone()),
        });
        info!(
            %symbol,
            direction = %self.position.direction,
            entry     = self.position.entry_price,
            tp1       = self.levels.take_profits[0],
            stop      = self.levels.stop,
            "🎯 Trade monitor started"
        );

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return CloseReason::Cancelled,
            _ = self.close.cancelled() => return CloseReason::Manual,
            _ = sleep_until(deadline) => return CloseReason::Timeout,
            result = self.feed.subscribe_single(&symbol) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(%symbol, error = %e, "⚠️ Trade feed unavailable");
                    match self.resubscribe(token, deadline).await {
                        Ok(stream) => stream,
                        Err(reason) => return reason,
                    }
                }
            },
        };

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return CloseReason::Cancelled,
                _ = self.close.cancelled() => return CloseReason::Manual,
                _ = sleep_until(deadline) => return CloseReason::Timeout,
                next = stream.next() => match next {
                    Some(Ok(tick)) if tick.symbol == symbol => {
                        let price = tick.last_price;
                        for level in self.levels.advance(&mut self.position, price) {
                            self.on_level(level, price).await;
                        }
                        match self.position.level {
                            Level::Tp4  => return CloseReason::Target,
                            Level::Stop => return CloseReason::StopLoss,
                            _ => self.state.update_trade(&self.position).await,
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) if e.is_per_message() => {
                        debug!(%symbol, error = %e, "Dropped malformed trade tick");
                    }
                    Some(Err(e)) => {
                        warn!(%symbol, error = %e, "⚠️ Trade feed interrupted");
                        match self.resubscribe(token, deadline).await {
                            Ok(fresh) => stream = fresh,
                            Err(reason) => return reason,
                        }
                    }
                    None => {
                        warn!(%symbol, "⚠️ Trade feed ended");
                        match self.resubscribe(token, deadline).await {
                            Ok(fresh) => stream = fresh,
                            Err(reason) => return reason,
                        }
                    }
                },
            }
        }
    }

    /// Bounded retry of the single-symbol subscription. The horizon and the
    /// cancellation token apply to the delay and to the connect itself.
    async fn resubscribe(&self, token: &CancellationToken, deadline: Instant) -> Result<TickStream, CloseReason> {
        let symbol = &self.position.symbol;
        for attempt in 1..=RESUBSCRIBE_ATTEMPTS {
            let attempted = async {
                sleep(RESUBSCRIBE_DELAY * attempt).await;
                self.feed.subscribe_single(symbol).await
            };
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CloseReason::Cancelled),
                _ = self.close.cancelled() => return Err(CloseReason::Manual),
                _ = sleep_until(deadline) => return Err(CloseReason::Timeout),
                result = attempted => result,
            };
            match result {
                Ok(stream) => return Ok(stream),
                Err(e) => warn!(%symbol, attempt, error = %e, "⚠️ Trade feed resubscribe failed"),
            }
        }
        Err(CloseReason::FeedLost)
    }

    async fn on_level(&self, level: Level, price: f64) {
        info!(symbol = %self.position.symbol, %level, price, "📍 Level reached");
        self.reply(&format::level_update(&self.position, level, price)).await;

        if let Err(e) = self.store.level_reached(&self.position, level).await {
            warn!(symbol = %self.position.symbol, %level, error = %e, "⚠️ Store level hook failed");
        }
        self.state.broadcast(&MonitorEvent::TradeLevel {
            symbol: self.position.symbol.clone(),
            level,
            price,
        });
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.notifier.send(text, self.alert.message_id).await {
            warn!(symbol = %self.position.symbol, error = %e, "⚠️ Level notification failed");
        }
    }

    /// Single exit path: close the position, persist it once, release the
    /// registry slot.
    async fn finalize(mut self, reason: CloseReason) -> TradeRecord {
        let price = self.position.last_price;

        match reason {
            CloseReason::Timeout if self.position.level == Level::Open => {
                self.position.level = Level::Timeout;
                self.on_level(Level::Timeout, price).await;
            }
            CloseReason::Timeout => {
                self.reply(&format::closed_early(&self.position, price, "timeout")).await;
            }
            CloseReason::FeedLost => {
                self.reply(&format::closed_early(&self.position, price, "feed lost")).await;
            }
            CloseReason::Manual => {
                self.reply(&format::closed_early(&self.position, price, "manual")).await;
            }
            CloseReason::Target | CloseReason::StopLoss | CloseReason::Cancelled => {}
        }

        let closed_at = Utc::now();
        self.position.closed_at    = Some(closed_at);
        self.position.close_price  = Some(price);
        self.position.close_reason = Some(reason);

        let record = TradeRecord {
            trade_id:       self.position.position_id,
            symbol:         self.position.symbol.clone(),
            direction:      self.position.direction,
            entry_price:    self.position.entry_price,
            alert_percent:  self.alert.event.percent_change,
            opened_at:      self.position.opened_at,
            level:          self.position.level,
            result:         reason,
            close_price:    price,
            closed_at,
            result_percent: self.position.result_percent(price),
        };

        if let Err(e) = self.store.insert(&record).await {
            warn!(symbol = %record.symbol, error = %e, "⚠️ Trade persistence failed");
        }
        self.state.release_trade(&self.position).await;
        self.state.broadcast(&MonitorEvent::TradeClosed { record: Box::new(record.clone()) });

        info!(
            symbol = %record.symbol,
            level  = %record.level,
            result = ?record.result,
            pct    = format_args!("{:+.2}", record.result_percent),
            "🏁 Trade finalized"
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MoveEvent;
    use crate::state::AppState;
    use crate::store::MemoryTradeStore;
    use crate::testing::{tick, RecordingNotifier, Script, ScriptedFeed};

    fn alert(symbol: &str, pct: f64, price: f64) -> DispatchedAlert {
        DispatchedAlert {
            event: MoveEvent {
                symbol:          symbol.into(),
                percent_change:  pct,
                reference_price: price / (1.0 + pct / 100.0),
                current_price:   price,
                volume:          30_000_000.0,
                detected_at:     Utc::now(),
            },
            message_id: Some(42),
        }
    }

    struct Harness {
        notifier: Arc<RecordingNotifier>,
        store:    Arc<MemoryTradeStore>,
        state:    SharedState,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                notifier: Arc::new(RecordingNotifier::default()),
                store:    Arc::new(MemoryTradeStore::new()),
                state:    Arc::new(AppState::new()),
            }
        }

        fn monitor(&self, alert: DispatchedAlert, feed: ScriptedFeed) -> TradeMonitor {
            let event = &alert.event;
            let position = Position::open(&event.symbol, event.direction(), event.current_price, Utc::now());
            TradeMonitor::new(
                alert,
                position,
                Arc::new(feed),
                self.notifier.clone(),
                self.store.clone(),
                self.state.clone(),
                Duration::from_secs(7_800),
            )
        }
    }

    #[test]
    fn test_levels_long_and_short() {
        let long = TradeLevels::new(Direction::Long, 100.0);
        assert!((long.take_profits[0] - 105.0).abs() < 1e-9);
        assert!((long.take_profits[3] - 120.0).abs() < 1e-9);
        assert!((long.stop - 95.0).abs() < 1e-9);

        let short = TradeLevels::new(Direction::Short, 100.0);
        assert!((short.take_profits[1] - 90.0).abs() < 1e-9);
        assert!((short.stop - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_advance_climbs_one_level_at_a_time() {
        let levels = TradeLevels::new(Direction::Long, 100.0);
        let mut position = Position::open("AAAUSDT", Direction::Long, 100.0, Utc::now());

        assert!(levels.advance(&mut position, 100.0).is_empty());
        assert_eq!(levels.advance(&mut position, 106.0), vec![Level::Tp1]);
        assert_eq!(levels.advance(&mut position, 112.0), vec![Level::Tp2]);
        assert_eq!(position.level, Level::Tp2);
    }

    #[test]
    fn test_advance_gap_emits_every_level() {
        let levels = TradeLevels::new(Direction::Long, 100.0);
        let mut position = Position::open("AAAUSDT", Direction::Long, 100.0, Utc::now());
        assert_eq!(
            levels.advance(&mut position, 121.0),
            vec![Level::Tp1, Level::Tp2, Level::Tp3, Level::Tp4]
        );
        assert!(levels.advance(&mut position, 130.0).is_empty());
    }

    #[test]
    fn test_stop_only_from_open() {
        let short = TradeLevels::new(Direction::Short, 100.0);
        let mut position = Position::open("AAAUSDT", Direction::Short, 100.0, Utc::now());
        assert_eq!(short.advance(&mut position, 106.0), vec![Level::Stop]);

        let long = TradeLevels::new(Direction::Long, 100.0);
        let mut position = Position::open("AAAUSDT", Direction::Long, 100.0, Utc::now());
        long.advance(&mut position, 106.0);
        assert!(long.advance(&mut position, 90.0).is_empty());
        assert_eq!(position.level, Level::Tp1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_keeps_tp_level_on_horizon() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![Script::ticks(vec![
            tick("AAAUSDT", 100.0, 1),
            tick("AAAUSDT", 106.0, 2),
            tick("AAAUSDT", 112.0, 3),
        ])]);

        let record = h.monitor(alert("AAAUSDT", 25.0, 100.0), feed).run(CancellationToken::new()).await;

        assert_eq!(record.level, Level::Tp2);
        assert_eq!(record.result, CloseReason::Timeout);
        assert!((record.result_percent - 12.0).abs() < 1e-9);

        let texts = h.notifier.texts();
        assert!(texts[0].starts_with("✅ TP1"));
        assert!(texts[1].starts_with("✅ TP2"));
        assert!(h.notifier.replies().iter().all(|r| *r == Some(42)));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_short_stop() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![Script::ticks(vec![tick("AAAUSDT", 106.0, 1)])]);

        let record = h.monitor(alert("AAAUSDT", -22.0, 100.0), feed).run(CancellationToken::new()).await;

        assert_eq!(record.direction, Direction::Short);
        assert_eq!(record.level, Level::Stop);
        assert_eq!(record.result, CloseReason::StopLoss);
        assert!((record.result_percent + 6.0).abs() < 1e-9);
        assert!(h.notifier.texts()[0].starts_with("❌ SL"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_target_reached() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![Script::ticks(vec![tick("AAAUSDT", 121.0, 1)])]);

        let record = h.monitor(alert("AAAUSDT", 30.0, 100.0), feed).run(CancellationToken::new()).await;

        assert_eq!(record.level, Level::Tp4);
        assert_eq!(record.result, CloseReason::Target);
        assert_eq!(h.notifier.texts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_timeout_at_open() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![Script::ticks(vec![tick("AAAUSDT", 101.0, 1)])]);

        let record = h.monitor(alert("AAAUSDT", 21.0, 100.0), feed).run(CancellationToken::new()).await;

        assert_eq!(record.level, Level::Timeout);
        assert_eq!(record.result, CloseReason::Timeout);
        assert_ne!(record.level, Level::Stop);
        assert!(h.notifier.texts()[0].starts_with("⌛ TIMEOUT"));
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_cancellation_persists_once() {
        let h = Harness::new();
        let token = CancellationToken::new();
        token.cancel();

        let record = h.monitor(alert("AAAUSDT", 21.0, 100.0), ScriptedFeed::default()).run(token).await;

        assert_eq!(record.result, CloseReason::Cancelled);
        assert_eq!(record.level, Level::Open);
        assert_eq!(h.store.len().await, 1);
        assert!(h.notifier.texts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_feed_lost() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![
            Script::Items { items: vec![Ok(tick("AAAUSDT", 101.0, 1))], then_hang: false },
            Script::Fail(crate::error::FeedError::Connection("refused".into())),
            Script::Fail(crate::error::FeedError::Connection("refused".into())),
            Script::Fail(crate::error::FeedError::Connection("refused".into())),
        ]);

        let record = h.monitor(alert("AAAUSDT", 21.0, 100.0), feed).run(CancellationToken::new()).await;

        assert_eq!(record.result, CloseReason::FeedLost);
        assert!((record.close_price - 101.0).abs() < 1e-9);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_cancelled_during_hanging_resubscribe() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![
            Script::Items { items: vec![Ok(tick("AAAUSDT", 103.0, 1))], then_hang: false },
            Script::Hang,
            Script::Hang,
            Script::Hang,
        ]);
        let token = CancellationToken::new();
        let task = tokio::spawn(h.monitor(alert("AAAUSDT", 21.0, 100.0), feed).run(token.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel();

        let record = tokio::time::timeout(Duration::from_secs(60), task)
            .await
            .expect("monitor ignored cancellation")
            .unwrap();
        assert_eq!(record.result, CloseReason::Cancelled);
        assert!((record.close_price - 103.0).abs() < 1e-9);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_horizon_applies_to_hanging_connect() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![Script::Hang]);

        let record = tokio::time::timeout(
            Duration::from_secs(10_000),
            h.monitor(alert("AAAUSDT", 21.0, 100.0), feed).run(CancellationToken::new()),
        )
        .await
        .expect("monitor outlived its horizon");

        assert_eq!(record.result, CloseReason::Timeout);
        assert_eq!(record.level, Level::Timeout);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_manual_close() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![Script::ticks(vec![
            tick("AAAUSDT", 100.0, 1),
            tick("AAAUSDT", 107.0, 2),
        ])]);
        let monitor = h.monitor(alert("AAAUSDT", 21.0, 100.0), feed);
        let close = monitor.close_handle();
        let task = tokio::spawn(monitor.run(CancellationToken::new()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        close.cancel();
        let record = task.await.unwrap();

        assert_eq!(record.result, CloseReason::Manual);
        assert_eq!(record.level, Level::Tp1);
        assert!((record.close_price - 107.0).abs() < 1e-9);
        let texts = h.notifier.texts();
        assert!(texts.last().is_some_and(|t| t.starts_with("⏹️")));
        assert_eq!(h.store.len().await, 1);
    }
}
