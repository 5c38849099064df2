//! Verdict cache for voxjudge-runtime.
//!
//! Keeps definitive evaluator results in memory so that re-running an
//! identical turn does not pay for the same LLM call twice.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use voxjudge_core::{EvaluationRequest, EvaluationResult};

use crate::config::humantime_duration;

/// Cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    #[serde(default = "default_ttl", with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl: default_ttl(),
        }
    }
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

/// Cache key: the slot that produced the result plus the request fingerprint.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CacheKey {
    slot: String,
    fingerprint: u64,
}

impl CacheKey {
    pub fn new(slot: &str, request: &EvaluationRequest) -> Self {
        Self {
            slot: slot.to_string(),
            fingerprint: request.fingerprint(),
        }
    }
}

/// Evaluator verdict cache using moka.
pub struct VerdictCache {
    cache: Cache<CacheKey, EvaluationResult>,
}

impl VerdictCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self { cache }
    }

    /// Cached result for a slot, marked as a cache hit.
    pub async fn get(&self, key: &CacheKey) -> Option<EvaluationResult> {
        self.cache.get(key).await.map(EvaluationResult::into_cached)
    }

    /// Store a result. Only PASS/FAIL from a successful call is kept.
    pub async fn insert(&self, key: CacheKey, result: &EvaluationResult) {
        if result.is_definitive() {
            self.cache.insert(key, result.clone()).await;
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl std::fmt::Debug for VerdictCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxjudge_core::{EvaluationFailure, FailureKind, TokenUsage, Verdict};

    fn request() -> EvaluationRequest {
        EvaluationRequest::new("book a 2pm flight", "booked a 2pm flight to Boston").unwrap()
    }

    #[tokio::test]
    async fn test_cache_hit_is_marked() {
        let cache = VerdictCache::default();
        let key = CacheKey::new("evaluator_a", &request());

        assert!(cache.get(&key).await.is_none());

        let result = EvaluationResult::new(Verdict::Pass, 0.9, "2pm booked", "anthropic")
            .with_usage(TokenUsage {
                prompt_tokens: 800,
                completion_tokens: 40,
                ..Default::default()
            });
        cache.insert(key.clone(), &result).await;

        let cached = cache.get(&key).await.unwrap();
        assert!(cached.cached);
        assert_eq!(cached.verdict, Verdict::Pass);
        assert_eq!(cached.usage.total(), 0);
    }

    #[tokio::test]
    async fn test_slots_are_separate() {
        let cache = VerdictCache::default();
        let result = EvaluationResult::new(Verdict::Fail, 0.8, "wrong time", "openai");
        cache.insert(CacheKey::new("evaluator_b", &request()), &result).await;

        assert!(cache.get(&CacheKey::new("evaluator_a", &request())).await.is_none());
        assert!(cache.get(&CacheKey::new("evaluator_b", &request())).await.is_some());
    }

    #[tokio::test]
    async fn test_non_definitive_not_cached() {
        let cache = VerdictCache::default();
        let key = CacheKey::new("evaluator_a", &request());

        let uncertain = EvaluationResult::new(Verdict::Uncertain, 0.4, "unclear", "anthropic");
        cache.insert(key.clone(), &uncertain).await;

        let degraded = EvaluationResult::degraded(
            "anthropic",
            EvaluationFailure::new(FailureKind::Timeout, "timed out"),
        );
        cache.insert(key.clone(), &degraded).await;

        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn test_config_from_yaml() {
        let config: CacheConfig = serde_yaml::from_str("ttl: 10m").unwrap();
        assert_eq!(config.ttl, Duration::from_secs(600));
        assert_eq!(config.max_entries, 10_000);
    }
}
