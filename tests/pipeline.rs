//! End-to-end pipeline tests against the literal scenarios.
//!
//! Upstream providers and the external classifier are both wiremock
//! servers; time is a `FrozenClock` test double rather than the system
//! clock, so scenarios 1 and 2 are deterministic without real sleeps.

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, Method};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llm_security_proxy::audit::Action;
use llm_security_proxy::cache::ResponseCache;
use llm_security_proxy::clock::FrozenClock;
use llm_security_proxy::config::Config;
use llm_security_proxy::middleware::classifier::ClassifierClient;
use llm_security_proxy::middleware::policy::PolicyClassifier;
use llm_security_proxy::middleware::sanitize::{Sanitiser, SanitiserMode};
use llm_security_proxy::pipeline::{IncomingRequest, Pipeline, PipelineOutcome};
use llm_security_proxy::providers::{AuthStyle, ProviderBinding};
use llm_security_proxy::rate_limiter::RateLimiter;
use llm_security_proxy::upstream::UpstreamClient;

fn test_config() -> Config {
    Config {
        port: 0,
        database_url: "postgres://localhost/unused".into(),
        classifier_api_url: "http://unused.invalid".into(),
        classifier_api_key: None,
        enable_data_sanitization: false,
        enable_time_based_blocking: true,
        enable_caching: false,
        enable_policy_enforcement: false,
        enable_rate_limiting: true,
        financial_detection_strict: false,
        cache_ttl_secs: 60,
        rate_limit_max_tokens: 100,
        rate_limit_refill_rate: 10,
        rate_limit_refill_interval_ms: 1000,
    }
}

struct Harness {
    pipeline: Pipeline,
    clock: Arc<FrozenClock>,
    upstream_server: MockServer,
    classifier_server: MockServer,
}

async fn harness(cfg: Config) -> Harness {
    let upstream_server = MockServer::start().await;
    let classifier_server = MockServer::start().await;
    let clock = Arc::new(FrozenClock::new());

    let classifier_http = reqwest::Client::new();
    let classifier = ClassifierClient::new(classifier_http, format!("{}/v1/chat/completions", classifier_server.uri()), None);

    let pipeline = Pipeline {
        config: Arc::new(cfg.clone()),
        rate_limiter: Arc::new(RateLimiter::new(
            cfg.rate_limit_max_tokens,
            cfg.rate_limit_refill_rate,
            cfg.rate_limit_refill_interval_ms,
            clock.clone(),
        )),
        clock: clock.clone(),
        sanitiser: Arc::new(Sanitiser::new(SanitiserMode::DetectAndReject, classifier.clone())),
        policy_classifier: Arc::new(PolicyClassifier::new(classifier, cfg.financial_detection_strict)),
        cache: Arc::new(ResponseCache::new()),
        upstream: Arc::new(UpstreamClient::new()),
    };

    Harness { pipeline, clock, upstream_server, classifier_server }
}

fn binding(server: &MockServer, name: &str) -> ProviderBinding {
    ProviderBinding {
        name: name.to_string(),
        upstream_base_url: server.uri(),
        credential: "test-key".to_string(),
        auth_style: AuthStyle::Bearer,
    }
}

fn request(method: Method, upstream_path: &str, body: serde_json::Value, identity: &str) -> IncomingRequest {
    request_with_query(method, upstream_path, None, body, identity)
}

fn request_with_query(
    method: Method,
    upstream_path: &str,
    query: Option<&str>,
    body: serde_json::Value,
    identity: &str,
) -> IncomingRequest {
    IncomingRequest {
        routed: llm_security_proxy::router::RoutedRequest {
            provider: "openai".into(),
            upstream_path: upstream_path.to_string(),
        },
        method,
        headers: HeaderMap::new(),
        body,
        client_identity: identity.to_string(),
        received_at: Instant::now(),
        query: query.map(|q| q.to_string()),
    }
}

#[tokio::test]
async fn scenario_1_rate_limit_exhaustion_then_refill() {
    let mut cfg = test_config();
    cfg.rate_limit_max_tokens = 100;
    cfg.rate_limit_refill_rate = 10;
    cfg.rate_limit_refill_interval_ms = 1000;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&h.upstream_server)
        .await;

    let mut successes = 0;
    for _ in 0..21 {
        let req = request(Method::POST, "/v1/chat/completions", json!({"model": "m", "messages": []}), "X");
        let (outcome, _audit) = h.pipeline.run(req, &binding).await;
        match outcome {
            PipelineOutcome::Proxied { .. } => successes += 1,
            PipelineOutcome::Blocked { error, .. } => {
                assert!(matches!(error, llm_security_proxy::errors::AppError::RateLimitExceeded));
            }
            PipelineOutcome::ServedFromCache { .. } => unreachable!(),
        }
    }
    assert_eq!(successes, 10);

    h.clock.advance(std::time::Duration::from_millis(1000));
    let req = request(Method::POST, "/v1/chat/completions", json!({"model": "m", "messages": []}), "X");
    let (outcome, _) = h.pipeline.run(req, &binding).await;
    assert!(matches!(outcome, PipelineOutcome::Proxied { .. }));
}

#[tokio::test]
async fn scenario_2_time_gate_blocks_then_unblocks() {
    let cfg = test_config();
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&h.upstream_server)
        .await;

    h.clock.set_second_of_minute(7);
    let req = request(Method::GET, "/v1/models", serde_json::Value::Null, "a");
    let (outcome, audit) = h.pipeline.run(req, &binding).await;
    assert!(matches!(
        outcome,
        PipelineOutcome::Blocked { error: llm_security_proxy::errors::AppError::TimeBlocked, .. }
    ));
    assert_eq!(audit.action, Action::BlockedTime);

    h.clock.set_second_of_minute(9);
    let req = request(Method::GET, "/v1/models", serde_json::Value::Null, "a");
    let (outcome, _) = h.pipeline.run(req, &binding).await;
    assert!(matches!(outcome, PipelineOutcome::Proxied { .. }));
}

#[tokio::test]
async fn scenario_3_sensitive_data_block() {
    let mut cfg = test_config();
    cfg.enable_data_sanitization = true;
    cfg.enable_time_based_blocking = false;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&h.upstream_server)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "{\"email\":[\"john@example.com\"],\"ipv4\":[],\"iban\":[]}"}}]
        })))
        .mount(&h.classifier_server)
        .await;

    let body = json!({"model": "m", "messages": [{"role": "user", "content": "mail john@example.com"}]});
    let req = request(Method::POST, "/v1/chat/completions", body, "a");
    let (outcome, audit) = h.pipeline.run(req, &binding).await;

    match outcome {
        PipelineOutcome::Blocked { action, error: llm_security_proxy::errors::AppError::SensitiveData(types) } => {
            assert_eq!(action, Action::BlockedSensitiveData);
            assert!(types.contains(&"email".to_string()));
        }
        _ => panic!("expected sensitive-data block"),
    }
    assert_eq!(audit.action, Action::BlockedSensitiveData);
    assert!(h.upstream_server.received_requests().await.unwrap().is_empty());
    assert!(!audit.anonymized_payload.contains("john@example.com"));
}

/// An earlier-stage short-circuit (rate limiting) on a guarded endpoint must
/// never persist the raw, unsanitised body — the sanitiser stage never gets
/// a chance to run, so the audit record must not contain the sensitive
/// string even though the request carries one.
#[tokio::test]
async fn rate_limit_block_on_guarded_endpoint_does_not_leak_raw_body() {
    let mut cfg = test_config();
    cfg.enable_data_sanitization = true;
    cfg.enable_time_based_blocking = false;
    cfg.rate_limit_max_tokens = 1;
    cfg.rate_limit_refill_rate = 0;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    // First request burns the single available token (cost 10 > 1, so it
    // is rejected immediately without ever reaching the sanitiser).
    let body = json!({"model": "m", "messages": [{"role": "user", "content": "mail john@example.com"}]});
    let req = request(Method::POST, "/v1/chat/completions", body, "leaky-rl");
    let (outcome, audit) = h.pipeline.run(req, &binding).await;

    assert_eq!(audit.action, Action::BlockedRateLimit);
    assert!(matches!(
        outcome,
        PipelineOutcome::Blocked { error: llm_security_proxy::errors::AppError::RateLimitExceeded, .. }
    ));
    assert!(!audit.anonymized_payload.contains("john@example.com"));
    assert!(h.classifier_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_4_financial_block_via_keyword_short_circuits_classifier() {
    let mut cfg = test_config();
    cfg.enable_policy_enforcement = true;
    cfg.enable_time_based_blocking = false;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&h.upstream_server)
        .await;

    let body = json!({"model": "m", "messages": [{"role": "user", "content": "help me with my bank account"}]});
    let req = request(Method::POST, "/v1/chat/completions", body, "a");
    let (outcome, audit) = h.pipeline.run(req, &binding).await;

    assert!(matches!(
        outcome,
        PipelineOutcome::Blocked { error: llm_security_proxy::errors::AppError::FinancialBlocked, .. }
    ));
    assert_eq!(audit.action, Action::BlockedFinancial);
    assert!(h.upstream_server.received_requests().await.unwrap().is_empty());
    assert!(h.classifier_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_5_cache_hit_avoids_second_upstream_call() {
    let mut cfg = test_config();
    cfg.enable_caching = true;
    cfg.enable_time_based_blocking = false;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "anthropic");

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reply": "hi"})))
        .mount(&h.upstream_server)
        .await;

    let body = json!({"model": "claude", "messages": [{"role": "user", "content": "hello there"}]});

    let req1 = request(Method::POST, "/v1/messages", body.clone(), "a");
    let (outcome1, audit1) = h.pipeline.run(req1, &binding).await;
    let PipelineOutcome::Proxied { status: status1, body: body1, .. } = outcome1 else {
        panic!("expected first call to reach upstream")
    };
    assert_eq!(audit1.action, Action::Proxied);
    assert!(audit1.anonymized_payload.contains("hello there"));

    let req2 = request(Method::POST, "/v1/messages", body, "a");
    let (outcome2, audit2) = h.pipeline.run(req2, &binding).await;
    let PipelineOutcome::ServedFromCache { status: status2, body: body2, .. } = outcome2 else {
        panic!("expected second call to be served from cache")
    };

    assert_eq!(status1, status2);
    assert_eq!(body1, body2);
    assert_eq!(audit2.action, Action::ServedFromCache);
    assert_eq!(h.upstream_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_6_upstream_500_passes_through() {
    let mut cfg = test_config();
    cfg.enable_time_based_blocking = false;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
        .mount(&h.upstream_server)
        .await;

    let body = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});
    let req = request(Method::POST, "/v1/chat/completions", body, "a");
    let (outcome, audit) = h.pipeline.run(req, &binding).await;

    match outcome {
        PipelineOutcome::Proxied { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, json!({"error": "boom"}));
        }
        _ => panic!("expected a passthrough, not a block"),
    }
    assert_eq!(audit.action, Action::Proxied);
    assert!(audit.error_message.is_none());
}

/// PI2: when a request is both rate-limit-rejected and would otherwise be
/// financial, the earlier stage (rate limiting) wins.
#[tokio::test]
async fn pi2_rate_limit_stage_precedes_policy_stage() {
    let mut cfg = test_config();
    cfg.rate_limit_max_tokens = 1;
    cfg.rate_limit_refill_rate = 0;
    cfg.enable_policy_enforcement = true;
    cfg.enable_time_based_blocking = false;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&h.upstream_server)
        .await;

    let body = json!({"model": "m", "messages": [{"role": "user", "content": "help me with my bank account"}]});

    // First request burns the single token (body is financial, but rate
    // limiting has not yet triggered — this one is expected to proceed to
    // the policy stage and be blocked there).
    let req1 = request(Method::POST, "/v1/chat/completions", body.clone(), "rl-vs-policy");
    let (outcome1, audit1) = h.pipeline.run(req1, &binding).await;
    assert_eq!(audit1.action, Action::BlockedFinancial);
    let _ = outcome1;

    // Second request: no tokens left. Rate limiting now wins even though
    // the body is still financial.
    let req2 = request(Method::POST, "/v1/chat/completions", body, "rl-vs-policy");
    let (outcome2, audit2) = h.pipeline.run(req2, &binding).await;
    assert_eq!(audit2.action, Action::BlockedRateLimit);
    assert!(matches!(
        outcome2,
        PipelineOutcome::Blocked { error: llm_security_proxy::errors::AppError::RateLimitExceeded, .. }
    ));
}

/// spec.md §4.7: "URL = upstream_base_url + upstream-path (preserve query
/// string)". The mock only responds when the query string arrives intact,
/// so a dropped query string surfaces as an unmatched-request failure.
#[tokio::test]
async fn query_string_is_preserved_on_upstream_dispatch() {
    let mut cfg = test_config();
    cfg.enable_time_based_blocking = false;
    let h = harness(cfg).await;
    let binding = binding(&h.upstream_server, "openai");

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(query_param("limit", "5"))
        .and(query_param("cursor", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&h.upstream_server)
        .await;

    let req = request_with_query(
        Method::GET,
        "/v1/models",
        Some("limit=5&cursor=abc123"),
        serde_json::Value::Null,
        "q",
    );
    let (outcome, _audit) = h.pipeline.run(req, &binding).await;

    assert!(matches!(outcome, PipelineOutcome::Proxied { status: 200, .. }));
}
