//! Authentication gate. Full JWT/session-token plumbing is explicitly out
//! of scope (the principal's identity is owned by an external collaborator);
//! this middleware only extracts a principal id from the request and decides
//! whether the request may proceed at all, following the sliding-window
//! limiter's own description of a principal as "user id or API key".

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{api_state::ApiState, error::ApiError};

const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// The caller's identity for this request, as resolved by [`authenticate`].
/// Carried as a request extension rather than re-parsed by every handler.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

pub async fn authenticate(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = match extract_credential(&request) {
        Some(credential) => Principal(credential),
        None if state.config.auth_allow_anonymous => Principal(ANONYMOUS_PRINCIPAL.to_string()),
        None => {
            return Err(ApiError::Unauthorized(
                "missing X-API-Key or Authorization header".to_string(),
            ))
        }
    };

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

fn extract_credential(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer "))
                .map(str::trim)
                .map(str::to_string)
        })
}
