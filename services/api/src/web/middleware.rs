//! services/api/src/web/middleware.rs
//!
//! Learner identification for routes that act on behalf of a learner.
//!
//! The identity provider in front of this service asserts who the learner is
//! through the `x-user-id` header (and optionally `x-user-email`).

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use course_platform_core::Learner;
use tracing::warn;
use uuid::Uuid;

pub const LEARNER_ID_HEADER: &str = "x-user-id";
pub const LEARNER_EMAIL_HEADER: &str = "x-user-email";

/// Reads the learner from the request headers.
///
/// Returns `Ok(None)` when no learner header is present and `400 Bad Request`
/// when one is present but is not a UUID.
pub fn learner_from_headers(headers: &HeaderMap) -> Result<Option<Learner>, StatusCode> {
    let Some(raw) = headers.get(LEARNER_ID_HEADER) else {
        return Ok(None);
    };
    let id = raw
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| {
            warn!("Rejected malformed {} header", LEARNER_ID_HEADER);
            StatusCode::BAD_REQUEST
        })?;

    let learner = match headers
        .get(LEARNER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|email| !email.is_empty())
    {
        Some(email) => Learner::new(id).with_email(email),
        None => Learner::new(id),
    };
    Ok(Some(learner))
}

/// Middleware that requires a learner identity.
///
/// If valid, inserts the `Learner` into request extensions for handlers to use.
/// If missing, returns 401 Unauthorized.
pub async fn require_learner(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let learner = learner_from_headers(req.headers())?.ok_or(StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(learner);
    Ok(next.run(req).await)
}
