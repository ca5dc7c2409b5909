//! Bearer-token guard for the `/api` and `/ws` routes

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::protocol::ApiError;

/// Result of checking a request against the gateway token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    /// No token configured
    Open,
    Accepted,
    Missing,
    Rejected,
}

impl AuthCheck {
    pub fn allowed(self) -> bool {
        matches!(self, Self::Open | Self::Accepted)
    }
}

/// Check the `Authorization: Bearer` header against `expected`
pub fn authorize(expected: &str, headers: &HeaderMap) -> AuthCheck {
    if expected.is_empty() {
        return AuthCheck::Open;
    }
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_credential);
    match presented {
        None => AuthCheck::Missing,
        Some(token) if tokens_match(expected, token) => AuthCheck::Accepted,
        Some(_) => AuthCheck::Rejected,
    }
}

fn bearer_credential(header_value: &str) -> Option<&str> {
    let (scheme, credential) = header_value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(credential.trim()).filter(|c| !c.is_empty())
}

/// Equal-length tokens are compared without an early exit
fn tokens_match(expected: &str, presented: &str) -> bool {
    let (expected, presented) = (expected.as_bytes(), presented.as_bytes());
    expected.len() == presented.len()
        && expected
            .iter()
            .zip(presented)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub async fn require_auth(
    State(token): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let check = authorize(&token, request.headers());
    if check.allowed() {
        return next.run(request).await;
    }
    if check == AuthCheck::Missing {
        debug!("No bearer token on {}", request.uri().path());
    } else {
        warn!("Wrong bearer token on {}", request.uri().path());
    }
    ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}
