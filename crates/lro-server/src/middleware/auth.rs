//! Authentication middleware for lro-server.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::state::{AppState, digest};

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (error, code) = match self {
            AuthError::MissingToken => ("Missing authentication token", "MISSING_TOKEN"),
            AuthError::InvalidToken => ("Invalid authentication token", "INVALID_TOKEN"),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        });

        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}

/// Bearer-token check. A server without a configured token accepts every request.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.token_digest else {
        return Ok(next.run(request).await);
    };

    let token = match request.headers().get(header::AUTHORIZATION) {
        Some(value) => value.to_str().map_err(|_| AuthError::InvalidToken)?,
        None => return Err(AuthError::MissingToken),
    };
    let token = token.trim_start_matches("Bearer ").trim();

    // Compare digests so the comparison does not depend on the token length
    if digest(token) != expected {
        debug!("Rejected request with invalid token");
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}
