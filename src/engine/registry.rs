//! Registry of available model adapters, keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::adapter::{AdapterFactory, ModelAdapter};
use crate::engine::anthropic::{AnthropicAdapter, AnthropicConfig};
use crate::engine::mock::MockAdapter;

/// Resolves an adapter name (as carried on `AiProcessRequest.metadata.model`,
/// or a configured default) to a concrete [`ModelAdapter`].
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn ModelAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut adapters: HashMap<&'static str, Arc<dyn ModelAdapter>> = HashMap::new();
        adapters.insert("mock", Arc::new(MockAdapter::new()));
        Self { adapters }
    }

    /// Register the real Anthropic adapter using `api_key`. A no-op if
    /// `api_key` is empty, so the registry degrades to mock-only.
    #[must_use]
    pub fn with_anthropic(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        if !api_key.is_empty() {
            let adapter = AnthropicAdapter::new(AnthropicConfig::new(api_key))
                .expect("anthropic http client configuration is always valid");
            self.adapters.insert("anthropic", Arc::new(adapter));
        }
        self
    }

    #[must_use]
    pub fn mock_only() -> Self {
        Self::new()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for AdapterRegistry {
    fn create(&self, adapter_name: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(adapter_name).cloned()
    }

    fn available_names(&self) -> Vec<&'static str> {
        self.adapters.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_is_always_available() {
        let registry = AdapterRegistry::new();
        assert!(registry.create("mock").is_some());
    }

    #[test]
    fn unknown_adapter_returns_none() {
        let registry = AdapterRegistry::new();
        assert!(registry.create("does-not-exist").is_none());
    }

    #[test]
    fn empty_api_key_skips_anthropic_registration() {
        let registry = AdapterRegistry::new().with_anthropic("");
        assert!(registry.create("anthropic").is_none());
    }

    #[test]
    fn nonempty_api_key_registers_anthropic() {
        let registry = AdapterRegistry::new().with_anthropic("sk-test-key");
        assert!(registry.create("anthropic").is_some());
    }
}
