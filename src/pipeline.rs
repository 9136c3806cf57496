//! Request-processing pipeline: the fixed, totally-ordered sequence of
//! security checks every proxied request passes through.
//!
//! Decomposed into one method per stage, each returning a [`StageOutcome`],
//! in the spirit of the teacher's sequential numbered-comment handler but
//! without folding the whole thing into a single function.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use serde_json::Value;

use crate::audit::{Action, AuditRecord};
use crate::cache::{fingerprint, CacheEntry};
use crate::clock::Clock;
use crate::config::Config;
use crate::errors::AppError;
use crate::events::RequestEvent;
use crate::middleware::policy::PolicyClassifier;
use crate::middleware::sanitize::Sanitiser;
use crate::providers::ProviderBinding;
use crate::rate_limiter::{token_cost, RateLimiter};
use crate::router::RoutedRequest;

const TIME_GATE_BLOCKED_SECONDS: &[u32] = &[1, 2, 7, 8];

/// Endpoints subject to sanitisation, policy classification, and caching.
fn is_guarded_endpoint(upstream_path: &str) -> bool {
    upstream_path.ends_with("/chat/completions") || upstream_path.ends_with("/messages")
}

pub struct IncomingRequest {
    pub routed: RoutedRequest,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Value,
    pub client_identity: String,
    pub received_at: Instant,
    /// Raw query string (no leading `?`), if the inbound URI had one.
    /// Forwarded to the upstream request untouched; kept separate from
    /// `routed.upstream_path` so path-suffix checks elsewhere in the
    /// pipeline are unaffected by it.
    pub query: Option<String>,
}

impl IncomingRequest {
    pub fn client_identity(headers: &HeaderMap, peer: SocketAddr) -> String {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            let trimmed = real_ip.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        peer.to_string()
    }
}

/// Outcome of a single pipeline stage or the terminal outcome of the whole
/// pipeline.
pub enum PipelineOutcome {
    Proxied { status: u16, headers: Vec<(String, String)>, body: Value },
    ServedFromCache { status: u16, headers: Vec<(String, String)>, body: Value },
    Blocked { action: Action, error: AppError },
}

pub struct Pipeline {
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub clock: Arc<dyn Clock>,
    pub sanitiser: Arc<Sanitiser>,
    pub policy_classifier: Arc<PolicyClassifier>,
    pub cache: Arc<crate::cache::ResponseCache>,
    pub upstream: Arc<crate::upstream::UpstreamClient>,
}

impl Pipeline {
    pub async fn run(&self, request: IncomingRequest, binding: &ProviderBinding) -> (PipelineOutcome, AuditRecord) {
        let provider = request.routed.provider.clone();
        let upstream_path = request.routed.upstream_path.clone();
        let guarded = is_guarded_endpoint(&upstream_path);
        let mut audit = AuditRecord::new(provider.clone(), upstream_path.clone(), Action::Proxied);

        // Endpoints the sanitiser never inspects carry no risk of persisting
        // a sensitive string here. Guarded endpoints get a placeholder until
        // the sanitiser stage has actually run (below) — an early
        // short-circuit (rate limit, time gate) must never cause the raw,
        // unsanitised body to reach the audit store.
        audit.anonymized_payload = if guarded {
            "<pending sanitisation>".to_string()
        } else {
            serialise_payload(&request.body)
        };

        if self.config.enable_rate_limiting {
            let cost = token_cost(&upstream_path, &request.method);
            if !self.rate_limiter.try_consume(&request.client_identity, cost) {
                audit.action = Action::BlockedRateLimit;
                return (
                    PipelineOutcome::Blocked { action: Action::BlockedRateLimit, error: AppError::RateLimitExceeded },
                    audit,
                );
            }
        }

        if self.config.enable_time_based_blocking && TIME_GATE_BLOCKED_SECONDS.contains(&self.clock.second_of_minute()) {
            audit.action = Action::BlockedTime;
            return (
                PipelineOutcome::Blocked { action: Action::BlockedTime, error: AppError::TimeBlocked },
                audit,
            );
        }

        let mut body = request.body.clone();

        if guarded && self.config.enable_data_sanitization {
            let outcome = self.sanitiser.run(&body).await;
            if !outcome.detected.is_empty() {
                let detected: Vec<String> = outcome.detected.iter().map(|c| c.as_str().to_string()).collect();
                audit.action = Action::BlockedSensitiveData;
                audit.anonymized_payload = format!("<redacted: detected {}>", detected.join(", "));
                return (
                    PipelineOutcome::Blocked {
                        action: Action::BlockedSensitiveData,
                        error: AppError::SensitiveData(detected),
                    },
                    audit,
                );
            }
            body = outcome.tree;
            audit.anonymized_payload = serialise_payload(&body);
        } else if guarded {
            // Guarded endpoint, but the sanitiser is disabled: there is no
            // sanitised body to fall back to, so the placeholder set above
            // stands rather than persisting the raw body.
            audit.anonymized_payload = "<unsanitised: data sanitisation disabled>".to_string();
        }

        if guarded && self.config.enable_policy_enforcement {
            let text = extract_canonical_text(&body);
            if text.len() >= 10 && text.len() <= 2000 && self.policy_classifier.is_financial(&text).await {
                audit.action = Action::BlockedFinancial;
                return (
                    PipelineOutcome::Blocked { action: Action::BlockedFinancial, error: AppError::FinancialBlocked },
                    audit,
                );
            }
        }

        let fp = fingerprint(&provider, &upstream_path, &body);

        if guarded && self.config.enable_caching {
            if let Some(entry) = self.cache.get(&fp, Instant::now()) {
                audit.action = Action::ServedFromCache;
                return (
                    PipelineOutcome::ServedFromCache {
                        status: entry.status,
                        headers: entry.headers,
                        body: entry.body,
                    },
                    audit,
                );
            }
        }

        let inbound_headers: Vec<(String, String)> = request
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        let body_arg = if request.method == Method::GET || request.method == Method::HEAD {
            None
        } else {
            Some(&body)
        };

        let response = match self
            .upstream
            .forward(binding, &request.method, &upstream_path, request.query.as_deref(), &inbound_headers, body_arg)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                audit.action = Action::Proxied;
                audit.error_message = Some(err.to_string());
                return (PipelineOutcome::Blocked { action: Action::Proxied, error: AppError::Upstream(err.to_string()) }, audit);
            }
        };

        if guarded && self.config.enable_caching && response.status == 200 {
            let entry = CacheEntry::new(
                response.status,
                response.headers.clone(),
                response.body.clone(),
                Duration::from_secs(self.config.cache_ttl_secs),
                Instant::now(),
            );
            self.cache.put(fp, entry);
        }

        audit.response_time_ms = Some(request.received_at.elapsed().as_millis() as i32);

        (
            PipelineOutcome::Proxied {
                status: response.status,
                headers: response.headers,
                body: response.body,
            },
            audit,
        )
    }
}

/// Text form of the body stored in `AuditRecord.anonymized_payload`. Called
/// only with bodies that have already passed (or skipped) the sanitisation
/// stage, so no sensitive strings reach the store.
fn serialise_payload(body: &Value) -> String {
    serde_json::to_string(body).unwrap_or_default()
}

/// `.messages[*].content` concatenation, falling back to `.prompt`, `.input`,
/// or the serialised body.
fn extract_canonical_text(body: &Value) -> String {
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        let joined: String = messages
            .iter()
            .filter_map(|m| m.get("content").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
    }
    if let Some(prompt) = body.get("prompt").and_then(Value::as_str) {
        return prompt.to_string();
    }
    if let Some(input) = body.get("input").and_then(Value::as_str) {
        return input.to_string();
    }
    serde_json::to_string(body).unwrap_or_default()
}

impl PipelineOutcome {
    pub fn into_request_event(&self, provider: &str, endpoint: &str, response_time_ms: Option<i32>) -> RequestEvent {
        let action = match self {
            PipelineOutcome::Proxied { .. } => Action::Proxied,
            PipelineOutcome::ServedFromCache { .. } => Action::ServedFromCache,
            PipelineOutcome::Blocked { action, .. } => *action,
        };
        RequestEvent {
            provider: provider.to_string(),
            action: action.as_str().to_string(),
            endpoint: endpoint.to_string(),
            response_time_ms,
        }
    }
}
