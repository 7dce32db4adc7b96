//! Cost resolution with a per-model GPU requirement cache.
//!
//! The registry is asked at most once per model for the lifetime of a
//! workflow. Each later quote for that model is computed from the cached
//! GPU count and the current pricing.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::model::ModelId;
use crate::pricing::{CostQuote, PricingConfig};
use crate::providers::{ModelRegistry, RegistryError};

/// GPU requirements keyed by model.
#[derive(Debug, Clone, Default)]
pub struct GpuRequirementCache {
    entries: HashMap<ModelId, u64>,
}

impl GpuRequirementCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, model: &ModelId) -> Option<u64> {
        self.entries.get(model).copied()
    }

    pub fn insert(&mut self, model: ModelId, gpus: u64) {
        self.entries.insert(model, gpus);
    }

    /// Drop the entry for `model`. Returns whether there was one.
    pub fn invalidate(&mut self, model: &ModelId) -> bool {
        self.entries.remove(model).is_some()
    }
}

/// Turns model identifiers into cost quotes.
#[derive(Debug, Clone)]
pub struct CostResolver {
    pricing: PricingConfig,
    cache: GpuRequirementCache,
}

impl CostResolver {
    #[must_use]
    pub fn new(pricing: PricingConfig) -> Self {
        Self {
            pricing,
            cache: GpuRequirementCache::new(),
        }
    }

    /// Quote for `model` if its GPU requirement is already known.
    #[must_use]
    pub fn cached(&self, model: &ModelId) -> Option<CostQuote> {
        self.cache.get(model).map(|gpus| self.pricing.quote(gpus))
    }

    /// Quote for `model`, asking the registry only on a cache miss.
    ///
    /// # Errors
    /// Returns the registry's error unchanged. Nothing is cached on failure
    /// and nothing is retried.
    pub async fn resolve(
        &mut self,
        registry: &dyn ModelRegistry,
        model: &ModelId,
    ) -> Result<CostQuote, RegistryError> {
        if let Some(quote) = self.cached(model) {
            debug!(model = %model, gpus = quote.gpu_count, "GPU requirement cache hit");
            return Ok(quote);
        }

        let gpus = registry.register_model(model).await?;
        Ok(self.record(model.clone(), gpus))
    }

    /// Store a GPU requirement learned elsewhere and return its quote.
    pub fn record(&mut self, model: ModelId, gpus: u64) -> CostQuote {
        info!(model = %model, gpus, "GPU requirement resolved");
        self.cache.insert(model, gpus);
        self.pricing.quote(gpus)
    }

    /// Forget `model`'s requirement.
    pub fn invalidate(&mut self, model: &ModelId) {
        if self.cache.invalidate(model) {
            debug!(model = %model, "GPU requirement invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::pricing::Credits;

    struct CountingRegistry {
        gpus: u64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelRegistry for CountingRegistry {
        async fn register_model(&self, model: &ModelId) -> Result<u64, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if model.as_str().ends_with("/missing") {
                return Err(RegistryError::Rejected {
                    model: model.to_string(),
                    message: "Repository not found".to_string(),
                });
            }
            Ok(self.gpus)
        }
    }

    fn registry(gpus: u64) -> CountingRegistry {
        CountingRegistry {
            gpus,
            calls: AtomicUsize::new(0),
        }
    }

    fn resolver() -> CostResolver {
        CostResolver::new(PricingConfig::new(100, 4).unwrap())
    }

    #[tokio::test]
    async fn test_resolve_memoizes_per_model() {
        let registry = registry(4);
        let mut resolver = resolver();
        let a = ModelId::parse("org/a").unwrap();
        let b = ModelId::parse("org/b").unwrap();

        let quote = resolver.resolve(&registry, &a).await.unwrap();
        assert_eq!(quote.total, Credits(400));
        resolver.resolve(&registry, &a).await.unwrap();
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);

        resolver.resolve(&registry, &b).await.unwrap();
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let registry = registry(2);
        let mut resolver = resolver();
        let a = ModelId::parse("org/a").unwrap();

        resolver.resolve(&registry, &a).await.unwrap();
        resolver.invalidate(&a);
        assert!(resolver.cached(&a).is_none());
        resolver.resolve(&registry, &a).await.unwrap();
        assert_eq!(registry.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let registry = registry(2);
        let mut resolver = resolver();
        let missing = ModelId::parse("org/missing").unwrap();

        let err = resolver.resolve(&registry, &missing).await.unwrap_err();
        assert_eq!(err.model(), "org/missing");
        assert!(resolver.cached(&missing).is_none());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_record_and_cached() {
        let mut resolver = resolver();
        let a = ModelId::parse("org/a").unwrap();
        let quote = resolver.record(a.clone(), 3);
        assert_eq!(quote.total, Credits(300));
        assert_eq!(resolver.cached(&a), Some(quote));
    }
}
