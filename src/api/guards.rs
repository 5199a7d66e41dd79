use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::{header, request::Parts};

use crate::api::errors::ApiError;
use crate::core::state::AppState;

/// Caller presented the reporting bearer token. An empty configured token
/// disables the check; strict config refuses to start without one.
pub(crate) struct ReportingAccess;

#[async_trait]
impl FromRequestParts<AppState> for ReportingAccess {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let expected = app_state.settings().reporting().api_token.as_str();
        if expected.is_empty() {
            return Ok(ReportingAccess);
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        if !tokens_match(token.trim(), expected) {
            return Err(ApiError::Unauthorized("Invalid authentication credentials"));
        }

        Ok(ReportingAccess)
    }
}

fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided.iter().zip(expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
