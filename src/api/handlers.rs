use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::Action;
use crate::events::BusEvent;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub port: u16,
    pub uptime_secs: u64,
    pub features: FeatureFlags,
    pub endpoints: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct FeatureFlags {
    pub data_sanitization: bool,
    pub time_based_blocking: bool,
    pub caching: bool,
    pub policy_enforcement: bool,
    pub rate_limiting: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        port: state.bound_port.load(std::sync::atomic::Ordering::SeqCst),
        uptime_secs: state.started_at.elapsed().as_secs(),
        features: FeatureFlags {
            data_sanitization: state.config.enable_data_sanitization,
            time_based_blocking: state.config.enable_time_based_blocking,
            caching: state.config.enable_caching,
            policy_enforcement: state.config.enable_policy_enforcement,
            rate_limiting: state.config.enable_rate_limiting,
        },
        endpoints: vec![
            "/health",
            "/stats",
            "/logs",
            "/logs/:action",
            "/dashboard/metrics",
            "/dashboard/analytics",
            "/dashboard/rate-limits",
            "/dashboard/rate-limits/:id",
            "/events",
        ],
    })
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, crate::errors::AppError> {
    let stats = state.audit_store.stats().await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, crate::errors::AppError> {
    let rows = state.audit_store.recent(query.limit.unwrap_or(50)).await?;
    Ok(Json(rows))
}

pub async fn logs_by_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let action = parse_action(&action).ok_or(StatusCode::BAD_REQUEST)?;
    let rows = state
        .audit_store
        .by_action(action, query.limit.unwrap_or(50))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(rows))
}

fn parse_action(raw: &str) -> Option<Action> {
    match raw.to_uppercase().as_str() {
        "PROXIED" => Some(Action::Proxied),
        "BLOCKED_TIME" => Some(Action::BlockedTime),
        "BLOCKED_FINANCIAL" => Some(Action::BlockedFinancial),
        "BLOCKED_RATE_LIMIT" => Some(Action::BlockedRateLimit),
        "BLOCKED_SENSITIVE_DATA" => Some(Action::BlockedSensitiveData),
        "SERVED_FROM_CACHE" => Some(Action::ServedFromCache),
        _ => None,
    }
}

pub async fn dashboard_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cache_stats = state.cache.stats();
    Json(json!({
        "cache": {
            "hits": cache_stats.hits,
            "misses": cache_stats.misses,
            "size": cache_stats.size,
            "hit_rate": cache_stats.hit_rate(),
        },
        "rate_limiter": {
            "active_identities": state.rate_limiter.active_identities(),
        },
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn dashboard_analytics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, crate::errors::AppError> {
    let audit_stats = state.audit_store.stats().await?;
    let cache_stats = state.cache.stats();
    Ok(Json(json!({
        "audit": audit_stats,
        "cache_hit_rate": cache_stats.hit_rate(),
        "total_requests_observed": audit_stats.total,
    })))
}

pub async fn dashboard_rate_limits(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "active_identities": state.rate_limiter.active_identities() }))
}

pub async fn dashboard_rate_limit_get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let status = state.rate_limiter.status(&id);
    Json(json!({
        "remaining": status.remaining,
        "max_tokens": status.max_tokens,
        "reset_in_ms": status.reset_in_ms,
    }))
}

pub async fn dashboard_rate_limit_delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    state.rate_limiter.reset(&id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientCommand {
    #[serde(rename = "request-update")]
    RequestUpdate,
    #[serde(rename = "get-logs")]
    GetLogs { limit: Option<i64>, action: Option<String> },
    #[serde(rename = "get-stats")]
    GetStats,
}

pub async fn events(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_event_socket(socket, state))
}

/// Relays broadcast [`BusEvent`]s to the client and answers direct
/// client-initiated queries (`request-update`, `get-logs`, `get-stats`) on
/// the same socket. `WebSocket` implements both `Stream` and `Sink`
/// directly, so a single `select!` loop can read and write without
/// splitting the socket across two tasks.
async fn handle_event_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.event_bus.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(_) => break,
                };
                let payload = match &event {
                    BusEvent::Monitoring(snapshot) => json!({"type": "monitoring-update", "data": snapshot}),
                    BusEvent::Request(request_event) => json!({"type": "request-event", "data": request_event}),
                    BusEvent::Alert(alert) => json!({"type": "alert", "data": alert}),
                };
                if socket.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            message = socket.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    _ => break,
                };
                let Message::Text(text) = message else { continue };
                let Ok(command) = serde_json::from_str::<ClientCommand>(&text) else { continue };

                match command {
                    ClientCommand::RequestUpdate => {
                        state
                            .event_bus
                            .tick(&state.cache, &state.rate_limiter, &state.audit_store)
                            .await;
                    }
                    ClientCommand::GetLogs { limit, action } => {
                        let result = match action.as_deref().and_then(parse_action) {
                            Some(action) => state.audit_store.by_action(action, limit.unwrap_or(50)).await,
                            None => state.audit_store.recent(limit.unwrap_or(50)).await,
                        };
                        let payload = match result {
                            Ok(rows) => json!({"type": "get-logs", "data": rows}),
                            Err(err) => json!({"type": "get-logs", "error": err.to_string()}),
                        };
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    ClientCommand::GetStats => {
                        let payload = match state.audit_store.stats().await {
                            Ok(stats) => json!({"type": "get-stats", "data": stats}),
                            Err(err) => json!({"type": "get-stats", "error": err.to_string()}),
                        };
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
