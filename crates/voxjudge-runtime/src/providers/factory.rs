//! Provider factory pattern for dynamic LLM provider registration.
//!
//! Pipeline slots name a provider type as a string; the registry maps
//! that string to a factory that builds the provider from the slot's
//! settings.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create(&config.evaluator_a)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{LlmProvider, ProviderError, ScriptedProvider};
use crate::config::SlotConfig;

/// Factory for creating LLM providers from slot settings.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier for this provider type.
    ///
    /// Examples: "anthropic", "openai", "scripted"
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance for a slot.
    fn create(&self, settings: &SlotConfig) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Validate settings without creating a provider.
    ///
    /// Use this for fast config validation during startup.
    fn validate_config(&self, settings: &SlotConfig) -> Result<(), ProviderError>;

    /// Human-readable description of this provider.
    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory.
    ///
    /// If a factory with the same type already exists, it will be replaced.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    /// Create the provider a slot asks for.
    pub fn create(&self, settings: &SlotConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(&settings.provider)?.create(settings)
    }

    /// Validate a slot's settings against its provider type.
    pub fn validate(&self, settings: &SlotConfig) -> Result<(), ProviderError> {
        self.factory(&settings.provider)?.validate_config(settings)
    }

    /// List available provider types.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a provider type is registered.
    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Description of a registered provider type.
    pub fn description(&self, provider_type: &str) -> Option<&'static str> {
        self.factories.get(provider_type).map(|f| f.description())
    }

    /// Create a registry with all built-in providers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptedProviderFactory));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

/// Builds a [`ScriptedProvider`] that replays `scripted_responses`.
pub struct ScriptedProviderFactory;

impl ProviderFactory for ScriptedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, settings: &SlotConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate_config(settings)?;
        let provider = settings
            .scripted_responses
            .iter()
            .fold(
                ScriptedProvider::new(format!("scripted:{}", settings.model)),
                |p, r| p.respond(r.clone()),
            );
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, settings: &SlotConfig) -> Result<(), ProviderError> {
        if settings.scripted_responses.is_empty() {
            return Err(ProviderError::NotConfigured(
                "scripted provider needs at least one entry in 'scripted_responses'".to_string(),
            ));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Replays canned responses; for dry runs and tests"
    }
}
