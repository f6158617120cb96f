use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use taskforge_types::OrchestratorError;

use crate::{CapabilityDescriptor, CompletionRequest, CompletionResponse, PricingEntry, Provider, ProviderConfig, TokenizerCache};

struct ProviderEntry {
    config: ProviderConfig,
    capabilities: CapabilityDescriptor,
    pricing: HashMap<String, PricingEntry>,
    provider: Arc<dyn Provider>,
    valid: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub name: String,
    pub capabilities: CapabilityDescriptor,
    pub valid: bool,
}

/// Registry mutation is serialised behind the single `RwLock`; reads take a
/// shared guard so concurrent `pick()` calls from the router never block
/// each other, only the (rare) `register`/`validate` writers.
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: Arc<RwLock<HashMap<String, ProviderEntry>>>,
    cache: Arc<TokenizerCache>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(TokenizerCache::default()),
        }
    }

    /// Idempotent; replaces any existing registration for `name` atomically.
    pub async fn register(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
        config: ProviderConfig,
        capabilities: CapabilityDescriptor,
        pricing: HashMap<String, PricingEntry>,
    ) {
        let name = name.into();
        let mut entries = self.entries.write().await;
        entries.insert(
            name,
            ProviderEntry {
                config,
                capabilities,
                pricing,
                provider,
                valid: false,
            },
        );
    }

    /// Credential round-trip; failures are non-fatal here. Returns the
    /// validity so the caller can decide whether *every* provider failed.
    pub async fn validate(&self, name: &str) -> Result<bool, OrchestratorError> {
        let provider = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .map(|e| e.provider.clone())
                .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?
        };
        let valid = provider.validate_credentials().await;
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.valid = valid;
        }
        Ok(valid)
    }

    /// Validates every registered provider; fatal (per spec §4.1) only when
    /// none of them come back valid.
    pub async fn validate_all(&self) -> Result<(), OrchestratorError> {
        let names: Vec<String> = {
            let entries = self.entries.read().await;
            entries.keys().cloned().collect()
        };
        if names.is_empty() {
            return Err(OrchestratorError::NoValidProviders);
        }
        let mut any_valid = false;
        for name in names {
            if self.validate(&name).await.unwrap_or(false) {
                any_valid = true;
            }
        }
        if any_valid {
            Ok(())
        } else {
            Err(OrchestratorError::NoValidProviders)
        }
    }

    pub async fn invoke(
        &self,
        name: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, OrchestratorError> {
        let provider = {
            let entries = self.entries.read().await;
            entries
                .get(name)
                .map(|e| e.provider.clone())
                .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?
        };
        let result = provider.complete(request).await;
        if let Err(OrchestratorError::ProviderAuth { .. }) = &result {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(name) {
                entry.valid = false;
            }
        }
        result
    }

    pub async fn tokenize(&self, name: &str, text: &str, model: &str) -> Result<u64, OrchestratorError> {
        let entries = self.entries.read().await;
        if !entries.contains_key(name) {
            return Err(OrchestratorError::NotFound(name.to_string()));
        }
        drop(entries);
        Ok(self.cache.tokenize(&format!("{name}:{model}"), text))
    }

    pub async fn pricing_for(&self, name: &str, model: &str) -> Option<PricingEntry> {
        let entries = self.entries.read().await;
        entries.get(name)?.pricing.get(model).cloned()
    }

    pub async fn capabilities_for(&self, name: &str) -> Option<CapabilityDescriptor> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.capabilities)
    }

    pub async fn config_for(&self, name: &str) -> Option<ProviderConfig> {
        let entries = self.entries.read().await;
        entries.get(name).map(|e| e.config.clone())
    }

    /// Lock-free-feeling snapshot for the router: one read-lock acquisition,
    /// then plain owned data.
    pub async fn snapshot(&self) -> Vec<ProviderSnapshot> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(name, entry)| ProviderSnapshot {
                name: name.clone(),
                capabilities: entry.capabilities,
                valid: entry.valid,
            })
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysValid;

    #[async_trait]
    impl Provider for AlwaysValid {
        fn name(&self) -> &str {
            "always-valid"
        }
        async fn validate_credentials(&self) -> bool {
            true
        }
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, OrchestratorError> {
            Ok(CompletionResponse {
                text: format!("echo: {}", request.prompt),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    struct AlwaysInvalid;

    #[async_trait]
    impl Provider for AlwaysInvalid {
        fn name(&self) -> &str {
            "always-invalid"
        }
        async fn validate_credentials(&self) -> bool {
            false
        }
        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, OrchestratorError> {
            Err(OrchestratorError::ProviderAuth {
                target: taskforge_types::Target::new("always-invalid", "m"),
            })
        }
    }

    #[tokio::test]
    async fn validate_all_succeeds_if_any_provider_is_valid() {
        let registry = ProviderRegistry::new();
        registry
            .register(
                "good",
                Arc::new(AlwaysValid),
                ProviderConfig::default(),
                CapabilityDescriptor::default(),
                HashMap::new(),
            )
            .await;
        registry
            .register(
                "bad",
                Arc::new(AlwaysInvalid),
                ProviderConfig::default(),
                CapabilityDescriptor::default(),
                HashMap::new(),
            )
            .await;
        assert!(registry.validate_all().await.is_ok());
    }

    #[tokio::test]
    async fn validate_all_fails_fatally_when_every_provider_invalid() {
        let registry = ProviderRegistry::new();
        registry
            .register(
                "bad",
                Arc::new(AlwaysInvalid),
                ProviderConfig::default(),
                CapabilityDescriptor::default(),
                HashMap::new(),
            )
            .await;
        assert!(matches!(
            registry.validate_all().await,
            Err(OrchestratorError::NoValidProviders)
        ));
    }

    #[tokio::test]
    async fn invoke_marks_provider_invalid_on_auth_failure() {
        let registry = ProviderRegistry::new();
        registry
            .register(
                "bad",
                Arc::new(AlwaysInvalid),
                ProviderConfig::default(),
                CapabilityDescriptor::default(),
                HashMap::new(),
            )
            .await;
        registry.validate("bad").await.ok();
        let request = CompletionRequest {
            model: "m".into(),
            prompt: "hi".into(),
            max_output_tokens: 10,
        };
        let _ = registry.invoke("bad", &request).await;
        let snapshot = registry.snapshot().await;
        let entry = snapshot.iter().find(|e| e.name == "bad").unwrap();
        assert!(!entry.valid);
    }
}
