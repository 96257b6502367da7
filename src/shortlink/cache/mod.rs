/// Two-tier cache for code -> url resolution.
///
/// L1 is the in-process cache, L2 is Redis under the `sl:<code>` namespace.
/// A fixed sentinel value marks negative entries; it can never collide with a
/// stored URL because URLs are validated to carry an http(s) scheme.
pub mod bloom;
pub mod local;

pub use bloom::CodeFilter;
pub use local::LocalCache;

use crate::error::ApiResult;
use crate::metrics;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Negative-cache sentinel. Distinguishable from any valid URL and from the
/// empty string, which callers use to signal "no result".
pub const NOT_FOUND_SENTINEL: &str = "__nil__";

const POSITIVE_TTL: Duration = Duration::from_secs(3600);
const NEGATIVE_TTL: Duration = Duration::from_secs(30);

fn remote_key(code: &str) -> String {
    format!("sl:{}", code)
}

pub struct ShortlinkCache {
    client: ConnectionManager,
    local: Option<LocalCache>,
}

impl ShortlinkCache {
    pub fn new(client: ConnectionManager, local: Option<LocalCache>) -> Self {
        Self { client, local }
    }

    /// Read through both tiers. Returns the URL, the sentinel, or None on a
    /// full miss. A remote hit back-fills the local tier.
    pub async fn get(&self, code: &str) -> ApiResult<Option<String>> {
        if let Some(local) = &self.local {
            if let Some(value) = local.get(code) {
                if value == NOT_FOUND_SENTINEL {
                    metrics::record_cache_op("l1", "hit_negative");
                } else {
                    metrics::record_cache_op("l1", "hit");
                }
                return Ok(Some(value));
            }
        }

        let mut conn = self.client.clone();
        let value: Option<String> = conn.get(remote_key(code)).await?;
        let Some(value) = value else {
            metrics::record_cache_op("l2", "miss");
            return Ok(None);
        };

        if value == NOT_FOUND_SENTINEL {
            metrics::record_cache_op("l2", "hit_negative");
        } else {
            metrics::record_cache_op("l2", "hit");
        }

        if let Some(local) = &self.local {
            if value == NOT_FOUND_SENTINEL {
                local.set_not_found(code);
            } else {
                local.set(code, &value);
            }
        }
        Ok(Some(value))
    }

    /// Write-through set of a positive mapping.
    pub async fn set(&self, code: &str, url: &str) -> ApiResult<()> {
        if let Some(local) = &self.local {
            local.set(code, url);
        }
        let mut conn = self.client.clone();
        conn.set_ex::<_, _, ()>(remote_key(code), url, POSITIVE_TTL.as_secs())
            .await?;
        Ok(())
    }

    /// Record a lookup miss with the short negative TTL.
    pub async fn set_not_found(&self, code: &str) -> ApiResult<()> {
        if let Some(local) = &self.local {
            local.set_not_found(code);
        }
        let mut conn = self.client.clone();
        conn.set_ex::<_, _, ()>(remote_key(code), NOT_FOUND_SENTINEL, NEGATIVE_TTL.as_secs())
            .await?;
        Ok(())
    }

    /// Drop both tiers for a code. Other instances converge once their L1
    /// entries expire.
    pub async fn delete(&self, code: &str) -> ApiResult<()> {
        if let Some(local) = &self.local {
            local.del(code);
        }
        let mut conn = self.client.clone();
        conn.del::<_, ()>(remote_key(code)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_key_namespace() {
        assert_eq!(remote_key("abc"), "sl:abc");
    }

    #[test]
    fn test_sentinel_is_not_a_url() {
        // The sentinel must never validate as a storable URL.
        assert!(crate::shortlink::validate_url(NOT_FOUND_SENTINEL).is_err());
        assert!(!NOT_FOUND_SENTINEL.is_empty());
    }

    #[test]
    fn test_ttl_ordering() {
        // The negative TTL must stay short relative to positives, and the L1
        // positive TTL below the L2 positive TTL for cross-instance
        // convergence.
        assert!(NEGATIVE_TTL < POSITIVE_TTL);
        assert!(Duration::from_secs(5 * 60) < POSITIVE_TTL);
    }
}
