/// HTTP middleware: request ids, access logging, metrics, panic recovery,
/// rate limiting and authentication.
use crate::auth::Identity;
use crate::context::AppContext;
use crate::error::{ApiError, ApiResult, ErrorBody};
use crate::metrics;
use crate::ratelimit::{limiter_key, next_member, SlidingWindowLimiter};
use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};
use uuid::Uuid;

const X_REQUEST_ID: &str = "x-request-id";
const LIMITER_DEADLINE: Duration = Duration::from_millis(50);

/// Correlation id carried through request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Outermost middleware: establish the request id, echo it on the response
/// and stamp it into error bodies produced further down the chain.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let rid = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    req.extensions_mut().insert(RequestId(rid.clone()));
    let res = next.run(req).await;
    finalize_response(res, &rid)
}

fn finalize_response(res: Response, rid: &str) -> Response {
    let (mut parts, body) = res.into_parts();
    if let Ok(value) = HeaderValue::from_str(rid) {
        parts.headers.insert(X_REQUEST_ID, value);
    }

    if let Some(err) = parts.extensions.get::<ErrorBody>() {
        let payload = ErrorBody {
            request_id: rid.to_string(),
            ..err.clone()
        };
        if let Ok(bytes) = serde_json::to_vec(&payload) {
            parts
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            return Response::from_parts(parts, Body::from(bytes));
        }
    }
    Response::from_parts(parts, body)
}

/// One structured log line per request, correlated by request id.
pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let rid = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    let ip = client_ip(&req);

    let start = Instant::now();
    let res = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = res.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        client_ip = %ip,
        request_id = %rid,
        "request"
    );
    res
}

/// Per-request counters and latency, labeled by the matched route pattern
/// so cardinality stays bounded.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "UNMATCHED".to_string());

    metrics::HTTP_INFLIGHT_REQUESTS.inc();
    let start = Instant::now();
    let res = next.run(req).await;
    metrics::HTTP_INFLIGHT_REQUESTS.dec();

    metrics::HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method.as_str(), route.as_str()])
        .observe(start.elapsed().as_secs_f64());
    metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), route.as_str(), res.status().as_str()])
        .inc();
    res
}

/// Recovery: a panic in the handler chain becomes a 500 if nothing was
/// written yet. Plugged in through tower-http's CatchPanicLayer.
#[derive(Clone, Copy)]
pub struct PanicResponder;

impl tower_http::catch_panic::ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(
        &mut self,
        err: Box<dyn std::any::Any + Send + 'static>,
    ) -> axum::http::Response<Body> {
        let detail = if let Some(s) = err.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = err.downcast_ref::<&str>() {
            (*s).to_string()
        } else {
            "unknown panic".to_string()
        };
        error!(panic = %detail, "handler panicked");
        ApiError::Internal(format!("panic: {}", detail)).into_response()
    }
}

/// Per-route rate limit configuration handed to the middleware as state.
#[derive(Clone)]
pub struct RouteLimit {
    pub limiter: Option<Arc<SlidingWindowLimiter>>,
    pub prefix: &'static str,
    pub limit: i64,
    pub window: Duration,
}

impl RouteLimit {
    pub fn per_minute(
        limiter: Option<Arc<SlidingWindowLimiter>>,
        prefix: &'static str,
        limit: i64,
    ) -> Self {
        Self {
            limiter,
            prefix,
            limit,
            window: Duration::from_secs(60),
        }
    }
}

/// Admit or deny against the shared sliding window. Limiter errors and
/// deadline overruns fail open: the request proceeds.
pub async fn rate_limit(State(rl): State<RouteLimit>, req: Request, next: Next) -> Response {
    let Some(limiter) = rl.limiter.clone() else {
        return next.run(req).await;
    };

    let ip = client_ip(&req);
    let key = limiter_key(rl.prefix, &ip);
    let member = next_member();

    match timeout(LIMITER_DEADLINE, limiter.allow(&key, rl.limit, rl.window, &member)).await {
        Ok(Ok(decision)) => {
            if decision.allowed {
                next.run(req).await
            } else {
                ApiError::RateLimited {
                    retry_after: decision.retry_after,
                }
                .into_response()
            }
        }
        Ok(Err(e)) => {
            error!(error = %e, key = %key, "rate limit check failed");
            next.run(req).await
        }
        Err(_) => {
            error!(key = %key, "rate limit check timed out");
            next.run(req).await
        }
    }
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut fields = value.split_whitespace();
    let scheme = fields.next()?;
    let token = fields.next()?;
    if fields.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.to_string())
}

/// Reject requests without a valid JWT; attach the identity otherwise.
pub async fn auth_required(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let has_header = req.headers().contains_key(header::AUTHORIZATION);
    let token = bearer_token(req.headers()).ok_or(if has_header {
        ApiError::Unauthenticated("invalid authorization format")
    } else {
        ApiError::Unauthenticated("missing authorization header")
    })?;

    let identity = ctx.tokens.verify(&token)?;
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Attach the identity when a valid token is present; continue silently
/// otherwise. For endpoints that differentiate anonymous behavior.
pub async fn auth_optional(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(req.headers()) {
        if let Ok(identity) = ctx.tokens.verify(&token) {
            req.extensions_mut().insert(identity);
        }
    }
    next.run(req).await
}

/// Require the admin role on an already-authenticated request.
pub async fn require_admin(req: Request, next: Next) -> ApiResult<Response> {
    let identity = req
        .extensions()
        .get::<Identity>()
        .ok_or(ApiError::Unauthenticated("unauthorized"))?;
    if identity.role != "admin" {
        return Err(ApiError::Forbidden("forbidden"));
    }
    Ok(next.run(req).await)
}

/// Require a valid research API key via the X-API-Key header.
pub async fn api_key_required(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if key.is_empty() {
        return Err(ApiError::Unauthenticated("missing X-API-Key"));
    }

    let identity = ctx
        .api_keys
        .verify(&key)
        .await
        .map_err(|_| ApiError::Unauthenticated("invalid api key"))?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Best-guess client IP for rate limiting and click attribution.
///
/// Forwarding headers are honored only when the TCP peer is a trusted
/// proxy; anything else could spoof them to escape per-IP budgets.
pub fn client_ip(req: &Request) -> String {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    client_ip_from(req.headers(), remote)
}

pub fn client_ip_from(headers: &HeaderMap, remote: Option<IpAddr>) -> String {
    let Some(remote) = remote else {
        return "unknown".to_string();
    };
    if !is_trusted_proxy(remote) {
        return remote.to_string();
    }

    // Cloudflare -> reverse proxy -> app: CF-Connecting-IP carries the real
    // client address.
    if let Some(ip) = header_ip(headers, "cf-connecting-ip") {
        return ip;
    }

    // First entry of X-Forwarded-For is the original client; proxies append.
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = xff.split(',').next().unwrap_or("").trim();
        if first.parse::<IpAddr>().is_ok() {
            return first.to_string();
        }
    }

    if let Some(ip) = header_ip(headers, "x-real-ip") {
        return ip;
    }

    remote.to_string()
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.parse::<IpAddr>().is_ok() {
        Some(value.to_string())
    } else {
        None
    }
}

/// Loopback, RFC1918 IPv4 ranges, and IPv6 ULA fc00::/7.
fn is_trusted_proxy(ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let v4 = match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };
    match v4 {
        Some(v4) => {
            let octets = v4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
        }
        None => match ip {
            IpAddr::V6(v6) => (v6.octets()[0] & 0xfe) == 0xfc,
            IpAddr::V4(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_trusted_proxy_predicate() {
        assert!(is_trusted_proxy("127.0.0.1".parse().unwrap()));
        assert!(is_trusted_proxy("::1".parse().unwrap()));
        assert!(is_trusted_proxy("10.1.2.3".parse().unwrap()));
        assert!(is_trusted_proxy("172.16.0.1".parse().unwrap()));
        assert!(is_trusted_proxy("172.31.255.255".parse().unwrap()));
        assert!(is_trusted_proxy("192.168.1.1".parse().unwrap()));
        assert!(is_trusted_proxy("fc00::1".parse().unwrap()));
        assert!(is_trusted_proxy("fd12:3456::1".parse().unwrap()));

        assert!(!is_trusted_proxy("8.8.8.8".parse().unwrap()));
        assert!(!is_trusted_proxy("172.32.0.1".parse().unwrap()));
        assert!(!is_trusted_proxy("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_untrusted_peer_headers_are_ignored() {
        let h = headers(&[("x-forwarded-for", "1.2.3.4"), ("x-real-ip", "5.6.7.8")]);
        let ip = client_ip_from(&h, Some("203.0.113.9".parse().unwrap()));
        assert_eq!(ip, "203.0.113.9");
    }

    #[test]
    fn test_trusted_peer_header_precedence() {
        let h = headers(&[
            ("cf-connecting-ip", "9.9.9.9"),
            ("x-forwarded-for", "1.2.3.4, 10.0.0.1"),
            ("x-real-ip", "5.6.7.8"),
        ]);
        let ip = client_ip_from(&h, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(ip, "9.9.9.9");
    }

    #[test]
    fn test_xff_first_token_wins() {
        let h = headers(&[("x-forwarded-for", "1.2.3.4, 10.0.0.1, 172.16.0.2")]);
        let ip = client_ip_from(&h, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(ip, "1.2.3.4");
    }

    #[test]
    fn test_unparsable_forward_headers_fall_back() {
        let h = headers(&[("x-forwarded-for", "not-an-ip"), ("x-real-ip", "also-bad")]);
        let ip = client_ip_from(&h, Some("192.168.0.7".parse().unwrap()));
        assert_eq!(ip, "192.168.0.7");
    }

    #[test]
    fn test_bearer_token_parsing() {
        let h = headers(&[("authorization", "Bearer abc.def.ghi")]);
        assert_eq!(bearer_token(&h).as_deref(), Some("abc.def.ghi"));

        let h = headers(&[("authorization", "bearer lowercase")]);
        assert_eq!(bearer_token(&h).as_deref(), Some("lowercase"));

        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert_eq!(bearer_token(&h), None);

        let h = headers(&[("authorization", "Bearer a b")]);
        assert_eq!(bearer_token(&h), None);

        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
