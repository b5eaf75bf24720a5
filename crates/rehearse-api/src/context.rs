//! Request context extraction and authentication middleware.
//!
//! In debug mode, the caller identity is supplied via headers for local
//! development. In production mode, a verified HS256 JWT is required; the
//! user identifier comes from a configurable claim (default `sub`).
//!
//! The raw credential (bearer token or debug API key) is retained on the
//! context as the rate-limit subject. It is never logged.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use ulid::Ulid;

use crate::error::ApiError;
use crate::server::AppState;

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request context derived from authentication and headers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The presented credential (bearer token or debug API key); the
    /// rate-limit subject. Treated as opaque and kept out of logs.
    pub credential: String,
    /// Authenticated user identifier, when present.
    pub user_id: Option<String>,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id =
            request_id_from_headers(headers).unwrap_or_else(|| Ulid::new().to_string());

        let (credential, user_id) = if state.config.debug {
            let api_key = header_string(headers, "X-Api-Key").ok_or_else(|| {
                ApiError::unauthorized("missing X-Api-Key header (debug mode)")
                    .with_request_id(request_id.clone())
            })?;
            (api_key, header_string(headers, "X-User-Id"))
        } else {
            extract_from_jwt(headers, state, &request_id)?
        };

        let ctx = Self {
            credential,
            user_id,
            request_id,
        };

        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

fn extract_from_jwt(
    headers: &HeaderMap,
    state: &AppState,
    request_id: &str,
) -> Result<(String, Option<String>), ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::missing_auth().with_request_id(request_id.to_string()))?;

    let Some(secret) = state.config.jwt.hs256_secret.as_deref() else {
        return Err(
            ApiError::internal("jwt.hs256_secret is required when debug=false")
                .with_request_id(request_id.to_string()),
        );
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_nbf = true;
    if let Some(iss) = state.config.jwt.issuer.as_deref() {
        validation.set_issuer(&[iss]);
    }
    if let Some(aud) = state.config.jwt.audience.as_deref() {
        validation.set_audience(&[aud]);
    }

    let data = jsonwebtoken::decode::<Value>(
        &token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::invalid_token().with_request_id(request_id.to_string()))?;

    let Some(obj) = data.claims.as_object() else {
        return Err(ApiError::invalid_token().with_request_id(request_id.to_string()));
    };

    let user_id = obj
        .get(&state.config.jwt.user_claim)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_token().with_request_id(request_id.to_string()))?;

    Ok((token, Some(user_id)))
}

fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    header_string(headers, "X-Request-Id").or_else(|| header_string(headers, "X-Request-ID"))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, "Authorization")?;
    let token = raw.strip_prefix("Bearer ")?;
    Some(token.to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

/// Authentication middleware.
///
/// Runs before rate limiting and injects a verified [`RequestContext`] into
/// request extensions; the request ID is echoed on every response.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let ctx = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic dXNlcg=="));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn request_id_header_is_case_tolerant() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Request-Id", HeaderValue::from_static("01ARZ3NDEKTSV4"));
        assert_eq!(
            request_id_from_headers(&headers).as_deref(),
            Some("01ARZ3NDEKTSV4")
        );
    }
}
