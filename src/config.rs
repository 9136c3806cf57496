use serde::Deserialize;

use crate::providers::{AuthStyle, ProviderBinding, ProviderRegistry};

/// The closed set of provider names this deployment recognises. An operator
/// adds a third provider purely through environment variables named after an
/// entry in this list — no code change needed as long as the name is known.
pub const KNOWN_PROVIDERS: &[(&str, AuthStyle)] = &[
    ("openai", AuthStyle::Bearer),
    ("anthropic", AuthStyle::HeaderPair),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,

    /// External classifier endpoint used by the Sanitiser and PolicyClassifier.
    /// OpenAI-compatible `/v1/chat/completions` surface.
    pub classifier_api_url: String,
    pub classifier_api_key: Option<String>,

    pub enable_data_sanitization: bool,
    pub enable_time_based_blocking: bool,
    pub enable_caching: bool,
    pub enable_policy_enforcement: bool,
    pub enable_rate_limiting: bool,
    pub financial_detection_strict: bool,

    pub cache_ttl_secs: u64,

    pub rate_limit_max_tokens: u64,
    pub rate_limit_refill_rate: u64,
    pub rate_limit_refill_interval_ms: u64,
}

impl Config {
    pub fn provider_registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (name, auth_style) in KNOWN_PROVIDERS {
            let url_key = format!("{}_API_URL", name.to_uppercase());
            let key_key = format!("{}_API_KEY", name.to_uppercase());
            if let (Ok(url), Ok(credential)) = (std::env::var(&url_key), std::env::var(&key_key)) {
                registry.register(ProviderBinding {
                    name: name.to_string(),
                    upstream_base_url: url,
                    credential,
                    auth_style: *auth_style,
                });
            }
        }
        registry
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        port: env_u64("PORT", 3000) as u16,
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/llm_security_proxy".into()),
        classifier_api_url: std::env::var("CLASSIFIER_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".into()),
        classifier_api_key: std::env::var("CLASSIFIER_API_KEY").ok(),

        enable_data_sanitization: env_bool("ENABLE_DATA_SANITIZATION", true),
        enable_time_based_blocking: env_bool("ENABLE_TIME_BASED_BLOCKING", true),
        enable_caching: env_bool("ENABLE_CACHING", true),
        enable_policy_enforcement: env_bool("ENABLE_POLICY_ENFORCEMENT", true),
        enable_rate_limiting: env_bool("ENABLE_RATE_LIMITING", true),
        financial_detection_strict: env_bool("FINANCIAL_DETECTION_STRICT", false),

        cache_ttl_secs: env_u64("CACHE_TTL", 300),

        rate_limit_max_tokens: env_u64("RATE_LIMIT_MAX_TOKENS", 100),
        rate_limit_refill_rate: env_u64("RATE_LIMIT_REFILL_RATE", 10),
        rate_limit_refill_interval_ms: env_u64("RATE_LIMIT_REFILL_INTERVAL", 1000),
    })
}
