//! Thin proxy handler: extracts the inbound request, routes it, and
//! delegates the rest to the [`Pipeline`](crate::pipeline::Pipeline).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::errors::AppError;
use crate::pipeline::{IncomingRequest, PipelineOutcome};
use crate::router;
use crate::AppState;

#[tracing::instrument(skip(state, headers, body), fields(method = %method, path = %uri.path()))]
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let method_str = method.to_string();

    let routed = match router::route(&state.provider_registry, &path) {
        Some(routed) => routed,
        None => {
            return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "unknown provider"}))).into_response();
        }
    };

    let binding = match state.provider_registry.get(&routed.provider) {
        Some(binding) => binding,
        None => return AppError::UnknownProvider(routed.provider).render(&method_str, &path),
    };

    let body_value: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&body).into_owned()))
    };

    let client_identity = IncomingRequest::client_identity(&headers, peer);
    let received_at = Instant::now();
    let query = uri.query().map(|q| q.to_string());

    let request = IncomingRequest {
        routed: routed.clone(),
        method: method.clone(),
        headers,
        body: body_value,
        client_identity,
        received_at,
        query,
    };

    let (outcome, mut audit) = state.pipeline.run(request, binding).await;

    if audit.response_time_ms.is_none() {
        audit.response_time_ms = Some(received_at.elapsed().as_millis() as i32);
    }

    let event = outcome.into_request_event(&routed.provider, &routed.upstream_path, audit.response_time_ms);
    state.audit_logger.log(audit);
    state.event_bus.publish_request_event(event);

    match outcome {
        PipelineOutcome::Proxied { status, headers, body } | PipelineOutcome::ServedFromCache { status, headers, body } => {
            render_upstream_response(status, headers, body)
        }
        PipelineOutcome::Blocked { error, .. } => error.render(&method_str, &path),
    }
}

fn render_upstream_response(status: u16, headers: Vec<(String, String)>, body: serde_json::Value) -> Response {
    let status = axum::http::StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(body)).into_response();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            axum::http::HeaderValue::from_str(&value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
