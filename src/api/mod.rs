use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Builds the read-side/dashboard surface mounted alongside the provider
/// proxy fallback. No admin-key gate is specified for these endpoints by
/// the core spec (that belongs to an out-of-scope management surface), so
/// none is added here.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/logs", get(handlers::logs))
        .route("/logs/:action", get(handlers::logs_by_action))
        .route("/dashboard/metrics", get(handlers::dashboard_metrics))
        .route("/dashboard/analytics", get(handlers::dashboard_analytics))
        .route("/dashboard/rate-limits", get(handlers::dashboard_rate_limits))
        .route(
            "/dashboard/rate-limits/:id",
            get(handlers::dashboard_rate_limit_get).delete(handlers::dashboard_rate_limit_delete),
        )
        .route("/events", get(handlers::events))
        .layer(TraceLayer::new_for_http())
}
