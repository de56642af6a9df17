//! # Surgewatch: futures price-surge monitor
//!
//! ## Architecture Overview
//!
//! ```text
//!  ┌──────────────┐  <sym>@ticker × ≤200   ┌────────────────────────────────┐
//!  │ Binance      │ ─────────────────────▶ │ GroupConsumer × N              │
//!  │ futures WS   │                        │  └─ SlidingWindowStore shard   │
//!  └──────────────┘                        │      └─ MoveDetector           │
//!         ▲                                └───────────────┬────────────────┘
//!         │ <sym>@ticker                                   │ MoveEvent (bounded)
//!  ┌──────┴───────┐   DispatchedAlert   ┌──────────────────▼─────────────────┐
//!  │ TradeMonitor │ ◀────────────────── │ AlertDispatcher ── dedupe ──▶ 📣  │
//!  │  TP1..4 / SL │ ──▶ 💾 store        └────────────────────────────────────┘
//!  └──────────────┘
//!         │ MonitorEvent (broadcast)
//!         ▼
//!   ws://host/ws/monitor   GET /api/monitor/*   GET / · /ping
//! ```
//!
//! Configuration is read from the environment (see [`config::Config`]).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod engine;
mod error;
mod events;
mod feed;
mod models;
mod notify;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod testing;

use config::Config;
use engine::Orchestrator;
use feed::{BinanceFeed, BinanceUniverse, MarketFeed, StaticUniverse, UniverseProvider};
use notify::{LogNotifier, Notifier, TelegramNotifier};
use routes::build_router;
use state::build_state;
use store::{CompositeStore, SupabaseStore, TradeStore};

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("surgewatch=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║           SURGEWATCH — Futures Surge Monitor          ║
  ║  Stream · Detect · Alert · Track TP/SL                ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Configuration ──────────────────────────────────────────────────────
    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    info!(
        threshold = config.detection.threshold_pct,
        window    = ?config.detection.window,
        group     = config.stream.max_group_size,
        "⚙️ Configuration loaded"
    );

    // ── 4. Shared state + collaborators ───────────────────────────────────────
    let state = build_state();
    let http = reqwest::Client::builder()
        .user_agent(concat!("surgewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let feed: Arc<dyn MarketFeed> = Arc::new(BinanceFeed::new(config.stream.ws_url.clone()));

    let universe: Arc<dyn UniverseProvider> = match &config.universe.static_symbols {
        Some(symbols) => {
            info!(symbols = symbols.len(), "📋 Using static symbol list");
            Arc::new(StaticUniverse::new(symbols.clone()))
        }
        None => Arc::new(BinanceUniverse::new(http.clone(), config.universe.clone())),
    };

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(http.clone(), telegram.clone())),
        None => {
            warn!("⚠️ TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID not set — alerts go to the log only");
            Arc::new(LogNotifier::default())
        }
    };

    let mut stores = CompositeStore::default()
        .with(state.trades.clone())
        .with(state.sheet.clone());
    if let Some(supabase) = &config.supabase {
        stores = stores.with(Arc::new(SupabaseStore::new(http.clone(), supabase.clone())));
    }
    info!(stores = stores.len(), "💾 Trade persistence ready");
    let store: Arc<dyn TradeStore> = Arc::new(stores);

    // ── 5. Engine ─────────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let orchestrator = Orchestrator::new(config.clone(), feed, universe, notifier, store, state.clone());
    let engine = tokio::spawn(orchestrator.run(shutdown.clone()));

    // ── 6. HTTP ───────────────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("BIND_ADDR is not a socket address: {}", config.bind_addr))?;

    info!(?addr, "🚀 Surgewatch server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // ── 7. Drain the engine ───────────────────────────────────────────────────
    shutdown.cancel();
    engine.await.context("orchestrator task panicked")?;
    info!("👋 Bye");

    Ok(())
}

/// Resolves on Ctrl-C (or when the engine is cancelled elsewhere).
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "⚠️ Ctrl-C handler unavailable");
                shutdown.cancelled().await;
                return;
            }
            info!("🛑 Ctrl-C received — shutting down");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
