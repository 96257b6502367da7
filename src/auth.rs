/// JWT token service and request identity
use crate::error::{ApiError, ApiResult};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Authenticated identity attached to a request by the auth middleware.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    iss: String,
    iat: i64,
    exp: i64,
}

/// HS256 token signer/verifier.
///
/// Issuer and expiry are always validated; tokens signed with any other
/// algorithm are rejected.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, issuer: &str, ttl: Duration) -> ApiResult<Self> {
        if secret.is_empty() {
            return Err(ApiError::Internal("jwt secret is empty".to_string()));
        }
        if issuer.is_empty() {
            return Err(ApiError::Internal("jwt issuer is empty".to_string()));
        }
        if ttl.is_zero() {
            return Err(ApiError::Internal("jwt ttl must be > 0".to_string()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            ttl,
        })
    }

    pub fn sign(&self, user_id: &str, role: &str) -> ApiResult<String> {
        if user_id.is_empty() {
            return Err(ApiError::Internal("empty user id".to_string()));
        }
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("jwt sign failed: {}", e)))
    }

    pub fn verify(&self, token: &str) -> ApiResult<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| ApiError::Unauthenticated("invalid token"))?;

        Ok(Identity {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("0123456789abcdef0123456789abcdef", "gee-api", Duration::from_secs(3600))
            .unwrap()
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let ts = service();
        let token = ts.sign("42", "user").unwrap();
        let id = ts.verify(&token).unwrap();
        assert_eq!(id.user_id, "42");
        assert_eq!(id.role, "user");
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let ts = service();
        let other =
            TokenService::new("0123456789abcdef0123456789abcdef", "other", Duration::from_secs(3600))
                .unwrap();
        let token = other.sign("42", "user").unwrap();
        assert!(ts.verify(&token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let ts = service();
        let other = TokenService::new("another-secret-another-secret-xx", "gee-api", Duration::from_secs(3600))
            .unwrap();
        let token = other.sign("42", "user").unwrap();
        assert!(ts.verify(&token).is_err());
    }

    #[test]
    fn test_empty_config_rejected() {
        assert!(TokenService::new("", "iss", Duration::from_secs(1)).is_err());
        assert!(TokenService::new("secret", "", Duration::from_secs(1)).is_err());
        assert!(TokenService::new("secret", "iss", Duration::ZERO).is_err());
    }

    #[test]
    fn test_admin_role_preserved() {
        let ts = service();
        let token = ts.sign("1", "admin").unwrap();
        assert_eq!(ts.verify(&token).unwrap().role, "admin");
    }
}
