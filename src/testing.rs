//! In-crate fakes for the collaborator traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{stream, StreamExt};

use crate::error::{FeedError, NotifyError};
use crate::feed::{MarketFeed, TickStream};
use crate::models::Tick;
use crate::notify::{MessageId, Notifier};

pub const BASE_TS: i64 = 1_700_000_000;

pub fn tick(symbol: &str, price: f64, secs: i64) -> Tick {
    Tick {
        symbol:       symbol.to_string(),
        last_price:   price,
        quote_volume: 25_000_000.0,
        event_time:   Utc.timestamp_opt(BASE_TS + secs, 0).unwrap(),
    }
}

// ─── ScriptedFeed ─────────────────────────────────────────────────────────────

/// What one `subscribe` call yields.
pub enum Script {
    /// `subscribe` itself fails.
    Fail(FeedError),
    /// `subscribe` never completes, like a handshake that hangs.
    Hang,
    /// Items are yielded in order; the stream then ends or stays silent.
    Items {
        items:     Vec<Result<Tick, FeedError>>,
        then_hang: bool,
    },
}

impl Script {
    pub fn ticks(ticks: Vec<Tick>) -> Self {
        Script::Items { items: ticks.into_iter().map(Ok).collect(), then_hang: true }
    }
}

/// Pops one [`Script`] per subscription; once exhausted every subscription
/// is silent forever.
#[derive(Default)]
pub struct ScriptedFeed {
    scripts:           Mutex<VecDeque<Script>>,
    pub subscriptions: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts:       Mutex::new(scripts.into()),
            subscriptions: AtomicUsize::new(0),
        }
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketFeed for ScriptedFeed {
    async fn subscribe(&self, _symbols: &[String]) -> Result<TickStream, FeedError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Items { items, then_hang: true }) => {
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
            Some(Script::Items { items, then_hang: false }) => Ok(Box::pin(stream::iter(items))),
            None => Ok(Box::pin(stream::pending())),
        }
    }
}

// ─── RecordingNotifier ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, Option<MessageId>)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { sent: Mutex::default(), fail: true }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn replies(&self) -> Vec<Option<MessageId>> {
        self.sent.lock().unwrap().iter().map(|(_, r)| *r).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str, reply_to: Option<MessageId>) -> Result<MessageId, NotifyError> {
        if self.fail {
            return Err(NotifyError::Transport("offline".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((text.to_string(), reply_to));
        Ok(100 + sent.len() as MessageId)
    }
}
