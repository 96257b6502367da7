/// Shortlink handlers: create, redirect, metadata, disable
use super::middleware::client_ip_from;
use super::{require_user_id, ApiJson};
use crate::auth::Identity;
use crate::context::AppContext;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::shortlink;
use crate::stats::ClickEvent;
use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateShortlinkRequest {
    pub url: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateShortlinkResponse {
    pub code: String,
    pub short_url: String,
    pub url: String,
}

pub async fn create(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    identity: Option<Extension<Identity>>,
    ApiJson(req): ApiJson<CreateShortlinkRequest>,
) -> ApiResult<Json<CreateShortlinkResponse>> {
    shortlink::validate_url(&req.url)?;

    let custom_code = req.code.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Some(code) = custom_code {
        shortlink::validate_code(code)?;
    }

    let created_by = match identity {
        Some(Extension(id)) => Some(require_user_id(&id)?),
        None => None,
    };

    let code = match custom_code {
        Some(custom) => {
            ctx.shortlinks
                .create_with_custom_code(&req.url, custom, created_by)
                .await?
        }
        None => ctx.shortlinks.create(&req.url, created_by).await?,
    };

    Ok(Json(CreateShortlinkResponse {
        short_url: short_url(&headers, &code),
        code,
        url: req.url,
    }))
}

/// Resolve and redirect, recording the click off the request path.
pub async fn redirect(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let Some(url) = ctx.shortlinks.resolve(&code).await else {
        return ApiError::ShortlinkNotFound.into_response();
    };

    metrics::SHORTLINK_REDIRECTS.inc();

    ctx.collector.collect(ClickEvent {
        code,
        clicked_at: Utc::now(),
        ip: client_ip_from(&headers, remote.map(|c| c.0.ip())),
        user_agent: header_str(&headers, header::USER_AGENT),
        referer: header_str(&headers, header::REFERER),
    });

    (StatusCode::FOUND, [(header::LOCATION, url)]).into_response()
}

pub async fn find(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
) -> ApiResult<Json<crate::shortlink::repo::ShortlinkMetadata>> {
    let metadata = ctx.shortlinks.find_by_code(&code).await?;
    Ok(Json(metadata))
}

pub async fn disable(
    State(ctx): State<AppContext>,
    Path(code): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.shortlinks.disable_by_code(&code).await?;
    Ok(StatusCode::OK)
}

fn short_url(headers: &HeaderMap, code: &str) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("http");
    match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) if !host.is_empty() => format!("{}://{}/{}", scheme, host, code),
        _ => format!("/{}", code),
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_url_uses_host_and_forwarded_proto() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "sho.rt".parse().unwrap());
        assert_eq!(short_url(&headers, "abc"), "http://sho.rt/abc");

        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(short_url(&headers, "abc"), "https://sho.rt/abc");
    }

    #[test]
    fn test_short_url_without_host_is_path_only() {
        assert_eq!(short_url(&HeaderMap::new(), "abc"), "/abc");
    }

    #[test]
    fn test_create_request_rejects_unknown_fields() {
        let err = serde_json::from_str::<CreateShortlinkRequest>(
            r#"{"url":"https://e.com","surprise":true}"#,
        );
        assert!(err.is_err());
    }
}
