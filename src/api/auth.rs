// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// Validates `Authorization: Bearer <token>` against the admin token held in
// AppState (PUMP_SNIPER_ADMIN_TOKEN at startup). Comparison is constant time.
//
//   async fn handler(_auth: AuthBearer, State(state): State<Arc<AppState>>) { ... }
//
// A missing, malformed or wrong token short-circuits with 403 before the
// handler body runs. Without a configured token every request is rejected.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

/// Compare two byte slices in constant time for equal lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Validate a presented token against the configured one.
pub fn validate_token(expected: Option<&str>, presented: &str) -> bool {
    match expected {
        Some(expected) if !expected.is_empty() => {
            constant_time_eq(presented.as_bytes(), expected.as_bytes())
        }
        _ => false,
    }
}

pub struct AuthBearer(pub String);

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

impl AuthRejection {
    fn forbidden(message: &'static str) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message,
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthBearer {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token() else {
            warn!("PUMP_SNIPER_ADMIN_TOKEN is not set — rejecting authenticated request");
            return Err(AuthRejection::forbidden("Server authentication not configured"));
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            warn!("Missing or malformed Authorization header");
            return Err(AuthRejection::forbidden("Missing or invalid authorization token"));
        };

        if !validate_token(Some(expected), token) {
            warn!("Invalid admin token presented");
            return Err(AuthRejection::forbidden("Invalid authorization token"));
        }

        Ok(AuthBearer(token.to_string()))
    }
}
