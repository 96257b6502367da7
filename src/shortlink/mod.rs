/// Shortlink domain: validation rules and code generation
pub mod cache;
pub mod codec;
pub mod repo;

use crate::error::{ApiError, ApiResult};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CODE_RE: Regex = Regex::new(r"^[A-Za-z0-9]{3,32}$").unwrap();
}

/// Codes that collide with routes served by this process.
const RESERVED_CODES: &[&str] = &["api", "healthz", "_astro", "favicon"];

/// Validate a target URL: http/https scheme and a non-empty host.
pub fn validate_url(raw: &str) -> ApiResult<()> {
    let parsed = url::Url::parse(raw).map_err(|_| ApiError::InvalidUrl)?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => return Err(ApiError::InvalidUrl),
    }
    if parsed.host_str().map_or(true, |h| h.trim().is_empty()) {
        return Err(ApiError::InvalidUrl);
    }
    Ok(())
}

/// Validate a user-supplied custom code: alphanumeric, 3..=32 chars,
/// and not one of the reserved route prefixes.
pub fn validate_code(code: &str) -> ApiResult<()> {
    let code = code.trim();
    if !CODE_RE.is_match(code) {
        return Err(ApiError::InvalidCode);
    }
    let lower = code.to_ascii_lowercase();
    if RESERVED_CODES.contains(&lower.as_str()) {
        return Err(ApiError::InvalidCode);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url("https://example.com/x").is_ok());
        assert!(validate_url("http://example.com").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_other_schemes() {
        assert!(validate_url("ftp://x").is_err());
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn test_validate_code_length_bounds() {
        assert!(validate_code("ab").is_err());
        assert!(validate_code("abc").is_ok());
        assert!(validate_code(&"a".repeat(32)).is_ok());
        assert!(validate_code(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_validate_code_charset() {
        assert!(validate_code("abc-def").is_err());
        assert!(validate_code("abc def").is_err());
        assert!(validate_code("Abc123").is_ok());
    }

    #[test]
    fn test_reserved_codes_rejected() {
        assert!(validate_code("api").is_err());
        assert!(validate_code("API").is_err());
        assert!(validate_code("healthz").is_err());
        assert!(validate_code("favicon").is_err());
    }
}
