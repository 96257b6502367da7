/// Unified error types for the shortlink API
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis errors (cache, limiter, queue)
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Input validation errors
    #[error("invalid url")]
    InvalidUrl,

    #[error("invalid code")]
    InvalidCode,

    #[error("{0}")]
    InvalidInput(String),

    #[error("username is not allowed")]
    InvalidUsername,

    #[error("password is not allowed")]
    InvalidPassword,

    /// Authentication errors
    #[error("{0}")]
    Unauthenticated(&'static str),

    /// Authorization errors
    #[error("{0}")]
    Forbidden(&'static str),

    /// Lookup misses
    #[error("shortlink not found")]
    ShortlinkNotFound,

    #[error("not found")]
    NotFound,

    /// Conflicts
    #[error("shortlink already disabled")]
    AlreadyDisabled,

    #[error("shortlink code already exists")]
    CodeAlreadyExists,

    #[error("shortlink url already has different code")]
    UrlHasDifferentCode,

    #[error("username already exists")]
    UserAlreadyExists,

    /// Limiter denial
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    /// Enqueue / token-signer failures
    #[error("{0}")]
    UpstreamUnavailable(&'static str),

    /// Deadline expired on a guarded call
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Internal server errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire shape of every error response.
///
/// `request_id` is filled in by the request-id middleware, which rewrites the
/// body of any response carrying this struct as an extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    /// Stable machine-readable error code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidUrl
            | ApiError::InvalidCode
            | ApiError::InvalidInput(_)
            | ApiError::InvalidUsername
            | ApiError::InvalidPassword => "InvalidInput",
            ApiError::Unauthenticated(_) => "Unauthenticated",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::ShortlinkNotFound | ApiError::NotFound => "NotFound",
            ApiError::AlreadyDisabled
            | ApiError::CodeAlreadyExists
            | ApiError::UrlHasDifferentCode
            | ApiError::UserAlreadyExists => "Conflict",
            ApiError::RateLimited { .. } => "RateLimited",
            ApiError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            ApiError::Database(_)
            | ApiError::Redis(_)
            | ApiError::Timeout(_)
            | ApiError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidUrl
            | ApiError::InvalidCode
            | ApiError::InvalidInput(_)
            | ApiError::InvalidUsername
            | ApiError::InvalidPassword => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::ShortlinkNotFound | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyDisabled
            | ApiError::CodeAlreadyExists
            | ApiError::UrlHasDifferentCode
            | ApiError::UserAlreadyExists => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_)
            | ApiError::Redis(_)
            | ApiError::Timeout(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Don't leak infrastructure details to clients.
        let message = match &self {
            ApiError::Database(_)
            | ApiError::Redis(_)
            | ApiError::Timeout(_)
            | ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorBody {
            code: self.code().to_string(),
            message,
            request_id: String::new(),
        };

        let mut res = (status, Json(body.clone())).into_response();
        res.extensions_mut().insert(body);

        if let ApiError::RateLimited { retry_after } = self {
            if !retry_after.is_zero() {
                // Retry-After is whole seconds, rounded up.
                let secs = (retry_after.as_millis() + 999) / 1000;
                if let Ok(v) = secs.to_string().parse() {
                    res.headers_mut().insert(header::RETRY_AFTER, v);
                }
            }
        }

        res
    }
}

/// Result type alias for service operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Unauthenticated("missing").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("no permission").status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::ShortlinkNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::CodeAlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::AlreadyDisabled.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::UpstreamUnavailable("enqueue failed").status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let res = ApiError::Internal("connection refused to 10.0.0.3".into()).into_response();
        let body = res.extensions().get::<ErrorBody>().unwrap();
        assert_eq!(body.message, "internal error");
        assert_eq!(body.code, "Internal");
    }

    #[test]
    fn test_retry_after_is_ceiled_to_seconds() {
        let res = ApiError::RateLimited {
            retry_after: Duration::from_millis(1200),
        }
        .into_response();
        let header = res.headers().get(header::RETRY_AFTER).unwrap();
        assert_eq!(header, "2");
    }

    #[test]
    fn test_conflict_code() {
        assert_eq!(ApiError::UrlHasDifferentCode.code(), "Conflict");
        assert_eq!(ApiError::UserAlreadyExists.code(), "Conflict");
    }
}
