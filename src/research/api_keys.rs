/// API key issuance and verification for the research API.
///
/// The plain key is returned exactly once at creation and never stored;
/// lookup goes through (prefix, hash) where the prefix is the first 8 hex
/// chars of the SHA-256 of the plain key.
use crate::error::{ApiError, ApiResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::timeout;

const DB_DEADLINE: Duration = Duration::from_secs(3);
const VERIFY_DEADLINE: Duration = Duration::from_millis(200);
const KEY_PREFIX: &str = "gsk_";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ApiKeyRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub prefix: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ApiKeyIdentity {
    pub user_id: i64,
    pub api_key_id: i64,
}

pub struct ApiKeysRepo {
    db: PgPool,
}

impl ApiKeysRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Mint a key for the user. Returns the plain key and the stored row.
    pub async fn create(&self, user_id: i64, name: &str) -> ApiResult<(String, ApiKeyRow)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::InvalidInput("empty name".to_string()));
        }

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let plain = format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(secret));

        let (prefix, hash) = hash_key(&plain);

        let row = timeout(
            DB_DEADLINE,
            sqlx::query_as::<_, ApiKeyRow>(
                "INSERT INTO ai_api_keys (user_id, name, prefix, hash)
                 VALUES ($1, $2, $3, $4)
                 RETURNING id, user_id, name, prefix, created_at, revoked_at",
            )
            .bind(user_id)
            .bind(name)
            .bind(&prefix)
            .bind(&hash)
            .fetch_one(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("api key insert"))??;

        Ok((plain, row))
    }

    pub async fn list(&self, user_id: i64, limit: i64) -> ApiResult<Vec<ApiKeyRow>> {
        let limit = if (1..=200).contains(&limit) { limit } else { 100 };
        let rows = timeout(
            DB_DEADLINE,
            sqlx::query_as::<_, ApiKeyRow>(
                "SELECT id, user_id, name, prefix, created_at, revoked_at
                 FROM ai_api_keys
                 WHERE user_id=$1
                 ORDER BY id DESC
                 LIMIT $2",
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("api key list"))??;
        Ok(rows)
    }

    /// Revoke one of the user's keys. Revoking a foreign, unknown or
    /// already-revoked key reports NotFound.
    pub async fn revoke(&self, user_id: i64, key_id: i64) -> ApiResult<()> {
        let result = timeout(
            DB_DEADLINE,
            sqlx::query(
                "UPDATE ai_api_keys
                 SET revoked_at = now()
                 WHERE id=$1 AND user_id=$2 AND revoked_at IS NULL",
            )
            .bind(key_id)
            .bind(user_id)
            .execute(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("api key revoke"))??;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    /// Verify a plain key. Failures of any kind surface as NotFound so
    /// callers map them uniformly to 401.
    pub async fn verify(&self, api_key: &str) -> ApiResult<ApiKeyIdentity> {
        let api_key = api_key.trim();
        if api_key.is_empty() || api_key.len() > 256 {
            return Err(ApiError::NotFound);
        }
        let (prefix, hash) = hash_key(api_key);

        let row: Option<(i64, i64)> = timeout(
            VERIFY_DEADLINE,
            sqlx::query_as(
                "SELECT id, user_id
                 FROM ai_api_keys
                 WHERE prefix=$1 AND hash=$2 AND revoked_at IS NULL
                 LIMIT 1",
            )
            .bind(&prefix)
            .bind(&hash)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("api key verify"))??;

        match row {
            Some((api_key_id, user_id)) => Ok(ApiKeyIdentity {
                user_id,
                api_key_id,
            }),
            None => Err(ApiError::NotFound),
        }
    }
}

/// Derive the lookup pair for a plain key.
fn hash_key(plain: &str) -> (String, String) {
    let digest = Sha256::digest(plain.as_bytes());
    let hash = hex::encode(digest);
    let prefix = hash[..8].to_string();
    (prefix, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_shape() {
        let (prefix, hash) = hash_key("gsk_example");
        assert_eq!(prefix.len(), 8);
        assert_eq!(hash.len(), 64);
        assert!(hash.starts_with(&prefix));
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_key_deterministic() {
        assert_eq!(hash_key("gsk_a"), hash_key("gsk_a"));
        assert_ne!(hash_key("gsk_a").1, hash_key("gsk_b").1);
    }

    #[test]
    fn test_plain_key_format() {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let plain = format!("{}{}", KEY_PREFIX, URL_SAFE_NO_PAD.encode(secret));
        assert!(plain.starts_with("gsk_"));
        // 32 bytes base64url without padding is 43 chars.
        assert_eq!(plain.len(), KEY_PREFIX.len() + 43);
    }
}
