/// User registration and lookup
use crate::error::{ApiError, ApiResult};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::timeout;

const DB_DEADLINE: Duration = Duration::from_secs(3);
const FIND_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

pub struct UsersRepo {
    db: PgPool,
}

impl UsersRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn find_by_username(&self, username: &str) -> ApiResult<User> {
        let username = username.trim();
        let user = timeout(
            FIND_DEADLINE,
            sqlx::query_as::<_, User>(
                "SELECT id, username, password_hash, role FROM users WHERE username=$1 LIMIT 1",
            )
            .bind(username)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("user lookup"))??;

        user.ok_or(ApiError::NotFound)
    }

    /// Register a new user with the `user` role. The password is hashed with
    /// a cost-bounded one-way hash on a blocking thread.
    pub async fn register(&self, username: &str, password: &str) -> ApiResult<i64> {
        let username = username.trim().to_string();
        if username.len() < 3 || username.len() > 32 {
            return Err(ApiError::InvalidUsername);
        }
        // Upper bound matches the bcrypt input limit.
        if password.len() < 8 || password.len() > 72 {
            return Err(ApiError::InvalidPassword);
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || {
            bcrypt::hash(password, bcrypt::DEFAULT_COST)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))?;

        let id: Option<i64> = timeout(
            DB_DEADLINE,
            sqlx::query_scalar(
                "INSERT INTO users (username, password_hash, role) VALUES ($1, $2, 'user')
                 ON CONFLICT (username) DO NOTHING
                 RETURNING id",
            )
            .bind(&username)
            .bind(&password_hash)
            .fetch_optional(&self.db),
        )
        .await
        .map_err(|_| ApiError::Timeout("user insert"))??;

        id.ok_or(ApiError::UserAlreadyExists)
    }

    /// Constant-style bcrypt verification, off the async executor.
    pub async fn verify_password(&self, password: &str, password_hash: &str) -> ApiResult<bool> {
        let password = password.to_string();
        let hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| ApiError::Internal(format!("verify task failed: {}", e)))?
            .map_err(|e| ApiError::Internal(format!("password verify failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_validation_bounds() {
        // Validation runs before any database access, so a disconnected pool
        // is fine for these cases.
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let repo = UsersRepo::new(pool);

        assert!(matches!(
            repo.register("ab", "password123").await,
            Err(ApiError::InvalidUsername)
        ));
        assert!(matches!(
            repo.register(&"x".repeat(33), "password123").await,
            Err(ApiError::InvalidUsername)
        ));
        assert!(matches!(
            repo.register("alice12", "short").await,
            Err(ApiError::InvalidPassword)
        ));
        assert!(matches!(
            repo.register("alice12", &"p".repeat(73)).await,
            Err(ApiError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn test_password_hash_roundtrip() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        let repo = UsersRepo::new(pool);

        let hash = bcrypt::hash("password123", 4).unwrap();
        assert!(repo.verify_password("password123", &hash).await.unwrap());
        assert!(!repo.verify_password("wrong-password", &hash).await.unwrap());
    }
}
