//! # feed
//!
//! Market-data collaborator.
//!
//! The engine only sees [`Tick`]s. A [`MarketFeed`] turns a symbol list into a
//! stream of decoded ticks; dropping the stream closes the subscription.
//!
//! Per-item errors follow the taxonomy in [`FeedError`]: `Malformed` items are
//! skipped by the consumer, anything else ends the subscription.

pub mod binance;
pub mod universe;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::FeedError;
use crate::models::Tick;

pub use binance::BinanceFeed;
pub use universe::{BinanceUniverse, StaticUniverse, UniverseProvider};

/// Decoded ticks for one subscription.
pub type TickStream = Pin<Box<dyn Stream<Item = Result<Tick, FeedError>> + Send>>;

#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Open one multiplexed subscription for `symbols`.
    async fn subscribe(&self, symbols: &[String]) -> Result<TickStream, FeedError>;

    /// Single-symbol subscription used by trade monitors.
    async fn subscribe_single(&self, symbol: &str) -> Result<TickStream, FeedError> {
        self.subscribe(&[symbol.to_string()]).await
    }
}
