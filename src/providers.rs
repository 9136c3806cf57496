//! Provider registry: the static, closed set of upstream LLM services a
//! virtual namespace can be routed to.

use std::collections::HashMap;

/// How the provider's credential is injected into the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>` plus a fixed protocol-version header.
    HeaderPair,
}

#[derive(Debug, Clone)]
pub struct ProviderBinding {
    pub name: String,
    pub upstream_base_url: String,
    pub credential: String,
    pub auth_style: AuthStyle,
}

/// Immutable, constructed once at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    bindings: HashMap<String, ProviderBinding>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    pub fn register(&mut self, binding: ProviderBinding) {
        self.bindings.insert(binding.name.clone(), binding);
    }

    pub fn get(&self, name: &str) -> Option<&ProviderBinding> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}
