use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::any;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod audit;
mod cache;
mod clock;
mod config;
mod errors;
mod events;
mod handler;
mod jobs;
mod middleware;
mod pipeline;
mod providers;
mod rate_limiter;
mod router;
mod upstream;

use audit::logger::AuditLogger;
use audit::store::AuditStore;
use cache::ResponseCache;
use clock::SystemClock;
use events::EventBus;
use middleware::classifier::ClassifierClient;
use middleware::policy::PolicyClassifier;
use middleware::sanitize::{Sanitiser, SanitiserMode};
use pipeline::Pipeline;
use providers::ProviderRegistry;
use rate_limiter::RateLimiter;
use upstream::UpstreamClient;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Arc<config::Config>,
    pub provider_registry: ProviderRegistry,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub audit_store: Arc<AuditStore>,
    pub audit_logger: AuditLogger,
    pub event_bus: Arc<EventBus>,
    pub pipeline: Pipeline,
    pub started_at: Instant,
    /// The port actually bound by `run_server`'s EADDRINUSE probing loop,
    /// which may differ from `config.port`. Starts at `config.port` and is
    /// updated once, right after `TcpListener::bind` succeeds.
    pub bound_port: AtomicU16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "llm_security_proxy=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::load()?;
    let result = run_server(cfg).await;

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);

    tracing::info!("Connecting to database...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&cfg.database_url)
        .await?;

    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    let provider_registry = cfg.provider_registry();

    let classifier_http = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(std::time::Duration::from_secs(15))
        .build()?;
    let classifier = ClassifierClient::new(classifier_http, cfg.classifier_api_url.clone(), cfg.classifier_api_key.clone());

    let sanitiser = Arc::new(Sanitiser::new(SanitiserMode::DetectAndReject, classifier.clone()));
    let policy_classifier = Arc::new(PolicyClassifier::new(classifier, cfg.financial_detection_strict));

    let rate_limiter = Arc::new(RateLimiter::new(
        cfg.rate_limit_max_tokens,
        cfg.rate_limit_refill_rate,
        cfg.rate_limit_refill_interval_ms,
        Arc::new(SystemClock),
    ));
    let cache = Arc::new(ResponseCache::new());
    let upstream = Arc::new(UpstreamClient::new());

    let audit_store = Arc::new(AuditStore::new(pool));
    let audit_logger = AuditLogger::spawn(audit_store.clone());
    let event_bus = EventBus::new();

    let pipeline = Pipeline {
        config: cfg.clone(),
        rate_limiter: rate_limiter.clone(),
        clock: Arc::new(SystemClock),
        sanitiser,
        policy_classifier,
        cache: cache.clone(),
        upstream,
    };

    let state = Arc::new(AppState {
        config: cfg.clone(),
        provider_registry,
        rate_limiter: rate_limiter.clone(),
        cache: cache.clone(),
        audit_store: audit_store.clone(),
        audit_logger,
        event_bus: event_bus.clone(),
        pipeline,
        started_at: Instant::now(),
        bound_port: AtomicU16::new(cfg.port),
    });

    jobs::sweep::spawn(rate_limiter, cache);
    event_bus.spawn_ticker(state.cache.clone(), state.rate_limiter.clone(), audit_store);
    tracing::info!("background sweep and monitoring-tick jobs started");

    let app = axum::Router::new()
        .merge(api::api_router())
        .fallback(any(handler::proxy_handler))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer({
            let dashboard_origin =
                std::env::var("DASHBOARD_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                ])
                .allow_headers([
                    axum::http::HeaderName::from_static("content-type"),
                    axum::http::HeaderName::from_static("authorization"),
                    axum::http::HeaderName::from_static("x-request-id"),
                ])
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let host = "0.0.0.0";
    let mut port = state.config.port;
    let mut bound = None;
    for _ in 0..20 {
        let addr = format!("{host}:{port}");
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                tracing::info!("llm-security-proxy listening on {}", addr);
                state.bound_port.store(port, Ordering::SeqCst);
                bound = Some(listener);
                break;
            }
            Err(_) => {
                port = port.saturating_add(1);
                continue;
            }
        }
    }
    let listener = bound.ok_or_else(|| anyhow::anyhow!("failed to bind to any port starting at {}", state.config.port))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response, so clients
/// can correlate errors with proxy logs.
async fn request_id_middleware(req: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects standard defensive headers into every response.
async fn security_headers_middleware(req: axum::extract::Request, next: axum::middleware::Next) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.remove("Server");

    resp
}
