//! Bearer-token authentication for handlers.

use crate::error::ApiError;
use crate::AppState;
use api_shared::AuthError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use prism_core::Identity;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The authenticated caller of a request.
///
/// Extraction fails with 401 when the `Authorization: Bearer` token is missing, invalid or
/// expired. Category checks happen later, in the core services.
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        let claims = state.keys.verify(token)?;

        let identity = match origin(&parts.headers) {
            Some(origin) => claims.identity().with_origin(origin),
            None => claims.identity(),
        };
        Ok(Caller(identity))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// First hop of `X-Forwarded-For`, if present.
fn origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
