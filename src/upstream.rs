//! HTTP client for forwarding requests to upstream provider APIs.
//! Uses reqwest-middleware for retries and tracing.

use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::Value;

use crate::errors::AppError;
use crate::providers::{AuthStyle, ProviderBinding};

/// Inbound headers copied through to the upstream request unchanged.
const FORWARDED_HEADERS: &[&str] = &["content-type", "user-agent", "accept", "cache-control", "pragma"];

/// Headers that can never be copied through as-is: they describe framing or
/// routing of the inbound connection, not the outbound one.
const STRIPPED_HEADERS: &[&str] = &["content-length", "transfer-encoding", "host", "connection", "keep-alive"];

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// `base_url + upstream_path`, with the inbound query string (if any)
/// reattached verbatim. spec.md §4.7: "URL = ... upstream-path (preserve
/// query string)".
fn build_url(base_url: &str, upstream_path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}{}", base_url.trim_end_matches('/'), upstream_path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

pub struct UpstreamClient {
    client: ClientWithMiddleware,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");

        // 3 retries, exponential backoff between 500ms and 10s.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client }
    }

    /// Build the outbound header set: a whitelist copy of the inbound
    /// headers, the provider's credential injected per its `auth_style`,
    /// `accept-encoding: identity` to avoid compression framing conflicts,
    /// and a default `content-type` for bodied requests.
    fn build_headers(&self, binding: &ProviderBinding, inbound: &[(String, String)], has_body: bool) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();

        for (name, value) in inbound {
            let lower = name.to_lowercase();
            if STRIPPED_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            if !FORWARDED_HEADERS.contains(&lower.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(lower.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        match binding.auth_style {
            AuthStyle::Bearer => {
                if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", binding.credential)) {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            AuthStyle::HeaderPair => {
                if let Ok(value) = reqwest::header::HeaderValue::from_str(&binding.credential) {
                    headers.insert("x-api-key", value);
                }
                headers.insert("anthropic-version", reqwest::header::HeaderValue::from_static("2023-06-01"));
            }
        }

        headers.insert("accept-encoding", reqwest::header::HeaderValue::from_static("identity"));

        if has_body && !headers.contains_key(reqwest::header::CONTENT_TYPE) {
            headers.insert(
                reqwest::header::CONTENT_TYPE,
                reqwest::header::HeaderValue::from_static("application/json"),
            );
        }

        headers
    }

    pub async fn forward(
        &self,
        binding: &ProviderBinding,
        method: &axum::http::Method,
        upstream_path: &str,
        query: Option<&str>,
        inbound_headers: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<UpstreamResponse, AppError> {
        let url = build_url(&binding.upstream_base_url, upstream_path, query);
        let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let has_body = body.is_some() && method != axum::http::Method::GET && method != axum::http::Method::HEAD;
        let headers = self.build_headers(binding, inbound_headers, has_body);

        let mut request = self.client.request(reqwest_method, &url).headers(headers);
        if has_body {
            if let Some(body) = body {
                request = request.json(body);
            }
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!("upstream request to {} failed after retries: {}", binding.name, e);
            AppError::Upstream(e.to_string())
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();

        let bytes = response.bytes().await.map_err(|e| AppError::Upstream(e.to_string()))?;
        let body = serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        Ok(UpstreamResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_headers_whitelist_excludes_framing_headers() {
        for h in STRIPPED_HEADERS {
            assert!(!FORWARDED_HEADERS.contains(h));
        }
    }

    #[test]
    fn build_url_preserves_query_string() {
        let url = build_url("https://api.openai.com", "/v1/models", Some("limit=5&cursor=abc123"));
        assert_eq!(url, "https://api.openai.com/v1/models?limit=5&cursor=abc123");
    }

    #[test]
    fn build_url_omits_question_mark_when_query_absent() {
        assert_eq!(build_url("https://api.openai.com", "/v1/models", None), "https://api.openai.com/v1/models");
        assert_eq!(build_url("https://api.openai.com", "/v1/models", Some("")), "https://api.openai.com/v1/models");
    }

    #[test]
    fn build_url_strips_trailing_slash_on_base() {
        assert_eq!(build_url("https://api.openai.com/", "/v1/models", None), "https://api.openai.com/v1/models");
    }
}
