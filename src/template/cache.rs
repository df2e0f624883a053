//! Bounded, time-limited cache for template texts.

use std::time::Duration;

use moka::sync::Cache;

/// Template text cache with TTL expiry and size-bounded eviction. Owned by
/// whoever constructs the provider; there is no global instance.
pub struct TemplateCache {
    inner: Option<Cache<String, String>>,
}

impl TemplateCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        if capacity == 0 || ttl.is_zero() {
            return Self::disabled();
        }
        let inner = Cache::builder()
            .max_capacity(capacity as u64)
            .time_to_live(ttl)
            .build();
        Self { inner: Some(inner) }
    }

    /// Cache that never retains anything.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.as_ref()?.get(key)
    }

    pub fn insert(&self, key: &str, text: &str) {
        if let Some(inner) = &self.inner {
            inner.insert(key.to_string(), text.to_string());
        }
    }

    /// Live entries, after pending evictions and expirations are applied.
    pub fn len(&self) -> usize {
        match &self.inner {
            Some(inner) => {
                inner.run_pending_tasks();
                inner.entry_count() as usize
            }
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_insert() {
        let cache = TemplateCache::new(4, Duration::from_secs(60));
        assert!(cache.get("prd.md").is_none());
        cache.insert("prd.md", "body");
        assert_eq!(cache.get("prd.md").as_deref(), Some("body"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = TemplateCache::new(2, Duration::from_secs(60));
        for key in ["a", "b", "c", "d", "e"] {
            cache.insert(key, "text");
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_insert_replaces_existing_text() {
        let cache = TemplateCache::new(2, Duration::from_secs(60));
        cache.insert("prd.md", "v1");
        cache.insert("prd.md", "v2");
        assert_eq!(cache.get("prd.md").as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entries_expire() {
        let cache = TemplateCache::new(4, Duration::from_millis(5));
        cache.insert("a", "1");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        for cache in [
            TemplateCache::disabled(),
            TemplateCache::new(0, Duration::from_secs(60)),
            TemplateCache::new(4, Duration::ZERO),
        ] {
            cache.insert("a", "1");
            assert!(cache.get("a").is_none());
            assert!(cache.is_empty());
        }
    }
}
