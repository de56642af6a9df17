//! # routes::monitor
//!
//! Keep-alive and monitoring surface.
//!
//! ## Endpoints
//!
//! | Method   | Path                               | Description                               |
//! |----------|------------------------------------|-------------------------------------------|
//! | GET      | `/`                                | service status + uptime                   |
//! | GET      | `/ping`                            | liveness probe (`{"status":"ok"}`)        |
//! | GET (WS) | `/ws/monitor`                      | real-time [`MonitorEvent`] stream         |
//! | GET      | `/api/monitor/stats`               | counters + trade statistics               |
//! | GET      | `/api/monitor/trades`              | finalized trades (`?symbol=&limit=`)      |
//! | GET      | `/api/monitor/active`              | live positions                            |
//! | GET      | `/api/monitor/active/:symbol`      | live position for one symbol              |
//! | POST     | `/api/monitor/active/:symbol/close`| close one position by hand                |
//! | GET      | `/api/monitor/sheet`               | spreadsheet ledger rows                   |
//! | GET      | `/api/monitor/window/:symbol`      | current window samples for a symbol       |
//!
//! [`MonitorEvent`]: crate::events::MonitorEvent

use std::sync::atomic::Ordering;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::state::SharedState;
use crate::store::HISTORY_CAPACITY;

const DEFAULT_HISTORY_LIMIT: usize = 100;

// ─── Keep-alive ───────────────────────────────────────────────────────────────

/// GET / returns service status
pub async fn index(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "ok":          true,
        "service":     "surgewatch",
        "version":     env!("CARGO_PKG_VERSION"),
        "started_at":  state.started_at,
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

/// GET /ping
pub async fn ping() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ─── Live event stream ────────────────────────────────────────────────────────

pub async fn ws_monitor(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| forward_events(socket, state))
}

/// First frame a subscriber receives: counters and live positions.
async fn snapshot(state: &SharedState) -> String {
    json!({
        "event":         "SNAPSHOT",
        "cycle":         state.cycle_count.load(Ordering::Relaxed),
        "tick_count":    state.tick_count.load(Ordering::Relaxed),
        "alert_count":   state.alert_count.load(Ordering::Relaxed),
        "active_trades": state.active_positions().await,
    })
    .to_string()
}

/// Push engine events to one subscriber until either side goes away.
async fn forward_events(socket: WebSocket, state: SharedState) {
    let mut events = state.broadcast_tx.subscribe();
    let (mut outbound, mut inbound) = socket.split();
    info!("👀 Monitor subscriber attached");

    if outbound.send(Message::Text(snapshot(&state).await)).await.is_err() {
        return;
    }

    let mut skipped = 0u64;
    loop {
        let open = tokio::select! {
            event = events.recv() => match event {
                Ok(json) => outbound.send(Message::Text(json)).await.is_ok(),
                Err(RecvError::Lagged(n)) => {
                    debug!(n, "Slow monitor subscriber, events skipped");
                    skipped += n;
                    true
                }
                Err(RecvError::Closed) => false,
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Ping(payload))) => outbound.send(Message::Pong(payload)).await.is_ok(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => false,
                Some(Ok(_)) => true,
            },
        };
        if !open {
            break;
        }
    }

    info!(skipped, "👋 Monitor subscriber detached");
}

// ─── REST Monitoring Endpoints ────────────────────────────────────────────────

/// GET /api/monitor/stats
pub async fn get_stats(State(state): State<SharedState>) -> impl IntoResponse {
    let stats = state.trades.stats().await;
    let tracked = match state.windows.read().await.as_ref() {
        Some(windows) => windows.tracked_symbols().await,
        None => 0,
    };

    Json(json!({
        "ok":              true,
        "cycle":           state.cycle_count.load(Ordering::Relaxed),
        "tick_count":      state.tick_count.load(Ordering::Relaxed),
        "alert_count":     state.alert_count.load(Ordering::Relaxed),
        "dropped_alerts":  state.dropped_alerts.load(Ordering::Relaxed),
        "reconnects":      state.reconnects.load(Ordering::Relaxed),
        "active_trades":   state.active_count().await,
        "tracked_symbols": tracked,
        "trades":          stats,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub symbol: Option<String>,
    pub limit:  Option<usize>,
}

/// GET /api/monitor/trades?symbol=&limit=
///
/// Newest first. `limit` defaults to 100.
pub async fn get_trades(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let symbol = query.symbol.map(|s| s.to_uppercase());
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(HISTORY_CAPACITY);
    let records = state.trades.history(symbol.as_deref(), limit).await;
    Json(json!({
        "ok":      true,
        "count":   records.len(),
        "records": records,
    }))
}

/// GET /api/monitor/active
pub async fn get_active(State(state): State<SharedState>) -> impl IntoResponse {
    let positions = state.active_positions().await;
    Json(json!({
        "ok":        true,
        "count":     positions.len(),
        "positions": positions,
    }))
}

fn not_monitored(symbol: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": format!("{symbol} has no active trade") })),
    )
}

/// GET /api/monitor/active/:symbol
pub async fn get_active_symbol(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    match state.active_trade(&symbol).await {
        Some(position) => (StatusCode::OK, Json(json!({ "ok": true, "position": position }))),
        None => not_monitored(&symbol),
    }
}

/// POST /api/monitor/active/:symbol/close
///
/// Accepted once the monitor has been signalled; the record is persisted and
/// announced as `TRADE_CLOSED` when it finalizes.
pub async fn close_active(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    match state.close_trade(&symbol).await {
        Some(position) => {
            info!(%symbol, level = %position.level, "✋ Manual close requested");
            (StatusCode::ACCEPTED, Json(json!({ "ok": true, "position": position })))
        }
        None => not_monitored(&symbol),
    }
}

/// GET /api/monitor/sheet
pub async fn get_sheet(State(state): State<SharedState>) -> impl IntoResponse {
    let rows = state.sheet.backend().rows().await;
    Json(json!({
        "ok":   true,
        "rows": rows,
    }))
}

/// GET /api/monitor/window/:symbol
pub async fn get_window(
    State(state): State<SharedState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    let samples = match state.windows.read().await.as_ref() {
        Some(windows) => windows.snapshot(&symbol).await,
        None => None,
    };

    match samples {
        Some(samples) => (
            StatusCode::OK,
            Json(json!({ "ok": true, "symbol": symbol, "samples": samples })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": format!("{symbol} is not tracked") })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{Direction, Level, Position};
    use crate::routes::build_router;
    use crate::state::{AppState, SharedState};
    use crate::store::tests::sample_record;
    use crate::store::TradeStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    async fn get(state: SharedState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn post(state: SharedState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_ping() {
        let (status, body) = get(Arc::new(AppState::new()), "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_trades_filter_and_limit() {
        let state = Arc::new(AppState::new());
        for (symbol, level, pct) in [
            ("AAAUSDT", Level::Tp1, 5.0),
            ("BBBUSDT", Level::Stop, -5.0),
            ("AAAUSDT", Level::Tp2, 10.0),
            ("AAAUSDT", Level::Tp4, 20.0),
        ] {
            state.trades.insert(&sample_record(symbol, level, pct)).await.unwrap();
        }

        let (status, body) = get(state.clone(), "/api/monitor/trades?symbol=aaausdt&limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["records"][0]["level"], "TP4");
        assert_eq!(body["records"][1]["level"], "TP2");

        let (_, body) = get(state, "/api/monitor/trades").await;
        assert_eq!(body["count"], 4);
    }

    #[tokio::test]
    async fn test_active_symbol_and_manual_close() {
        let state = Arc::new(AppState::new());
        let position = Position::open("AAAUSDT", Direction::Long, 10.0, Utc::now());
        let close = CancellationToken::new();
        assert!(state.register_trade(&position, close.clone(), 5).await);

        let (status, body) = get(state.clone(), "/api/monitor/active/aaausdt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["position"]["symbol"], "AAAUSDT");

        let (status, body) = post(state.clone(), "/api/monitor/active/AAAUSDT/close").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["ok"], true);
        assert!(close.is_cancelled());
    }

    #[tokio::test]
    async fn test_close_unknown_symbol_is_404() {
        let state = Arc::new(AppState::new());
        let (status, body) = post(state.clone(), "/api/monitor/active/ZZZUSDT/close").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);

        let (status, _) = get(state, "/api/monitor/active/ZZZUSDT").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_reports_service() {
        let (status, body) = get(Arc::new(AppState::new()), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "surgewatch");
    }

    #[tokio::test]
    async fn test_stats_include_trade_statistics() {
        let state = Arc::new(AppState::new());
        state
            .trades
            .insert(&sample_record("AAAUSDT", Level::Tp4, 20.0))
            .await
            .unwrap();

        let (status, body) = get(state, "/api/monitor/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trades"]["total_operations"], 1);
        assert_eq!(body["trades"]["tp4_count"], 1);
    }

    #[tokio::test]
    async fn test_window_unknown_symbol_is_404() {
        let (status, body) = get(Arc::new(AppState::new()), "/api/monitor/window/btcusdt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }
}
