//! Bearer-token authentication middleware

use axum::{
    body::Body,
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::SandboxError;

use super::GatewayState;

/// Authenticate every request with `Authorization: Bearer <key>`.
///
/// A missing or malformed header is 401; a well-formed header with the
/// wrong key is 403.
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, SandboxError> {
    let path = request.uri().path().to_string();

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(auth_header) = auth_header else {
        debug!(path = %path, "Auth failed: no Authorization header");
        return Err(SandboxError::Unauthorized);
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        debug!(path = %path, "Auth failed: expected 'Bearer <key>'");
        return Err(SandboxError::Unauthorized);
    };

    if token != state.api_key.as_str() {
        debug!(path = %path, "Auth failed: key mismatch");
        return Err(SandboxError::Forbidden);
    }

    Ok(next.run(request).await)
}
