/// In-process L1 cache for code -> url lookups.
///
/// Bounded, admission-controlled and non-blocking. Positive entries live for
/// five minutes; negative sentinels for ten seconds. The positive TTL is kept
/// well below the remote tier's so invalidations converge across instances
/// within one L1 lifetime.
use super::NOT_FOUND_SENTINEL;
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

const POSITIVE_TTL: Duration = Duration::from_secs(5 * 60);
const NEGATIVE_TTL: Duration = Duration::from_secs(10);

struct SentinelAwareTtl;

impl Expiry<String, String> for SentinelAwareTtl {
    fn expire_after_create(&self, _key: &String, value: &String, _created_at: Instant) -> Option<Duration> {
        if value == NOT_FOUND_SENTINEL {
            Some(NEGATIVE_TTL)
        } else {
            Some(POSITIVE_TTL)
        }
    }
}

pub struct LocalCache {
    cache: Cache<String, String>,
}

impl LocalCache {
    /// `max_items` bounds the entry count (each entry has unit weight).
    pub fn new(max_items: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_items)
                .expire_after(SentinelAwareTtl)
                .build(),
        }
    }

    pub fn get(&self, code: &str) -> Option<String> {
        self.cache.get(code)
    }

    pub fn set(&self, code: &str, url: &str) {
        self.cache.insert(code.to_string(), url.to_string());
    }

    pub fn set_not_found(&self, code: &str) {
        self.cache
            .insert(code.to_string(), NOT_FOUND_SENTINEL.to_string());
    }

    pub fn del(&self, code: &str) {
        self.cache.invalidate(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let cache = LocalCache::new(100);
        cache.set("abc", "https://example.com");
        assert_eq!(cache.get("abc").as_deref(), Some("https://example.com"));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn test_negative_entries_hold_the_sentinel() {
        let cache = LocalCache::new(100);
        cache.set_not_found("ghost");
        assert_eq!(cache.get("ghost").as_deref(), Some(NOT_FOUND_SENTINEL));
    }

    #[test]
    fn test_delete() {
        let cache = LocalCache::new(100);
        cache.set("abc", "https://example.com");
        cache.del("abc");
        assert_eq!(cache.get("abc"), None);
    }

    #[test]
    fn test_overwrite_replaces_negative_entry() {
        let cache = LocalCache::new(100);
        cache.set_not_found("abc");
        cache.set("abc", "https://example.com");
        assert_eq!(cache.get("abc").as_deref(), Some("https://example.com"));
    }
}
