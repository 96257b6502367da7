/// Distributed sliding-window rate limiter backed by Redis.
///
/// Per-key state is a sorted set of request timestamps; one atomic Lua
/// script evaluates and records each call, so concurrent instances share
/// the same window. A denied call removes its own member again: denials do
/// not consume quota.
use crate::error::ApiResult;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SLIDING_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

local windowStart = now - window
redis.call("ZREMRANGEBYSCORE", key, 0, windowStart)
redis.call("ZADD", key, now, member)
local count = redis.call("ZCARD", key)
redis.call("PEXPIRE", key, window)

if count <= limit then
  return {1, 0}
end

redis.call("ZREM", key, member)

local oldest = redis.call("ZRANGE", key, 0, 0, "WITHSCORES")
if oldest[2] ~= nil then
  local oldestScore = tonumber(oldest[2])
  local retryAfter = (oldestScore + window) - now
  if retryAfter < 0 then retryAfter = 0 end
  return {0, retryAfter}
end
return {0, window}
"#;

/// Outcome of one limiter evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    /// Meaningful only when denied.
    pub retry_after: Duration,
}

pub struct SlidingWindowLimiter {
    conn: ConnectionManager,
    script: Script,
}

static MEMBER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a sorted-set member that is unique per call even when the clock
/// does not advance between calls. A duplicate member would overwrite its
/// score and silently shrink the window.
pub fn next_member() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = MEMBER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", nanos, seq)
}

impl SlidingWindowLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(SLIDING_WINDOW_LUA),
        }
    }

    /// Evaluate and record one request against `key`.
    pub async fn allow(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
        member: &str,
    ) -> ApiResult<Decision> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let window_ms = window.as_millis() as i64;

        let mut conn = self.conn.clone();
        let (allowed, retry_after_ms): (i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(Decision {
            allowed: allowed == 1,
            retry_after: Duration::from_millis(retry_after_ms.max(0) as u64),
        })
    }
}

/// Key layout for per-(route, client) budgets.
pub fn limiter_key(prefix: &str, client_ip: &str) -> String {
    format!("rl:{}:{}", prefix, client_ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_limiter_key_layout() {
        assert_eq!(limiter_key("create", "203.0.113.9"), "rl:create:203.0.113.9");
    }

    #[test]
    fn test_members_are_unique_under_contention() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(next_member()));
        }
    }

    #[test]
    fn test_members_unique_across_threads() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let member = next_member();
                        assert!(seen.lock().unwrap().insert(member));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_script_removes_denied_member() {
        // The denial branch must give the quota back and report the oldest
        // member's expiry as the retry hint.
        assert!(SLIDING_WINDOW_LUA.contains(r#"redis.call("ZREM", key, member)"#));
        assert!(SLIDING_WINDOW_LUA.contains("PEXPIRE"));
        assert!(SLIDING_WINDOW_LUA.contains("ZREMRANGEBYSCORE"));
    }
}
