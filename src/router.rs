//! Router: splits an inbound path of the form `/<provider>/<upstream-path>`
//! into a provider identity and the upstream path to forward, stripping the
//! leading `/<provider>` segment.

use crate::providers::ProviderRegistry;

/// The result of successfully recognising a provider prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedRequest {
    pub provider: String,
    /// Upstream path, always starting with `/`. This is `Uri::path()` after
    /// stripping the provider prefix, so it never includes a query string —
    /// path-suffix checks (guarded-endpoint detection, token cost) rely on
    /// that. The query string, if any, is threaded separately by the caller
    /// (see `IncomingRequest::query` / `UpstreamClient::forward`) and
    /// reattached only when building the outbound URL.
    pub upstream_path: String,
}

/// Recognise `path` against the registered provider set. Returns `None` if
/// the first segment is not a registered provider name (caller should
/// respond 404).
pub fn route(registry: &ProviderRegistry, path: &str) -> Option<RoutedRequest> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (provider, rest) = match trimmed.split_once('/') {
        Some((p, r)) => (p, r),
        None => (trimmed, ""),
    };

    if !registry.contains(provider) {
        return None;
    }

    let upstream_path = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{rest}")
    };

    Some(RoutedRequest {
        provider: provider.to_string(),
        upstream_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AuthStyle, ProviderBinding};

    fn registry() -> ProviderRegistry {
        let mut reg = ProviderRegistry::new();
        reg.register(ProviderBinding {
            name: "openai".into(),
            upstream_base_url: "https://api.openai.com".into(),
            credential: "k".into(),
            auth_style: AuthStyle::Bearer,
        });
        reg
    }

    #[test]
    fn strips_provider_prefix() {
        let reg = registry();
        let routed = route(&reg, "/openai/v1/chat/completions").unwrap();
        assert_eq!(routed.provider, "openai");
        assert_eq!(routed.upstream_path, "/v1/chat/completions");
    }

    #[test]
    fn unknown_provider_is_none() {
        let reg = registry();
        assert!(route(&reg, "/unknown/v1/models").is_none());
    }

    #[test]
    fn bare_provider_path_routes_to_root() {
        let reg = registry();
        let routed = route(&reg, "/openai").unwrap();
        assert_eq!(routed.upstream_path, "/");
    }
}
