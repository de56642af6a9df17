pub mod monitor;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::SharedState;

/// All HTTP routes, without middleware.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // ── Keep-alive ────────────────────────────────────────────────────────
        .route("/",                           get(monitor::index))
        .route("/ping",                       get(monitor::ping))
        // ── Monitor Loop ──────────────────────────────────────────────────────
        .route("/ws/monitor",                 get(monitor::ws_monitor))
        .route("/api/monitor/stats",          get(monitor::get_stats))
        .route("/api/monitor/trades",         get(monitor::get_trades))
        .route("/api/monitor/active",         get(monitor::get_active))
        .route("/api/monitor/active/:symbol", get(monitor::get_active_symbol))
        .route("/api/monitor/active/:symbol/close", post(monitor::close_active))
        .route("/api/monitor/sheet",          get(monitor::get_sheet))
        .route("/api/monitor/window/:symbol", get(monitor::get_window))
        .with_state(state)
}
