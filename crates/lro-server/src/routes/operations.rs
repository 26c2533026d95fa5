//! Operation endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lro_core::api::AcceptedResponse;
use lro_core::{Error, ErrorKind, ResultView, Submission, WorkPayload};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/operations", post(submit_operation))
        .route(
            "/operations/{id}",
            get(get_operation).delete(release_operation),
        )
}

/// Submit work. `200` with the canonical result, or `202` with a location to poll.
pub async fn submit_operation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WorkPayload>,
) -> Result<Response, ApiError> {
    match state.orchestrator.submit(payload).await? {
        Submission::Completed {
            operation_id,
            result,
        } => {
            info!(operation_id = %operation_id, "Submission completed synchronously");
            Ok((StatusCode::OK, Json(result.as_ref())).into_response())
        }
        Submission::Pending(ticket) => {
            let op = ticket.snapshot();
            let retry_after = state.orchestrator.config().poll.initial_interval();
            let body = AcceptedResponse {
                operation_id: op.operation_id.clone(),
                status: op.status,
                poll_count: op.poll_count,
            };
            info!(operation_id = %op.operation_id, "Submission accepted");

            state.tickets.hold(ticket).await;
            Ok(accepted(body, retry_after, true))
        }
    }
}

/// Fetch an operation's result.
pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.orchestrator.get_result(&id) {
        Ok(ResultView::Processing {
            operation_id,
            status,
            poll_count,
            retry_after,
        }) => {
            debug!(operation_id = %operation_id, poll_count = poll_count, "Still processing");
            let body = AcceptedResponse {
                operation_id,
                status,
                poll_count,
            };
            Ok(accepted(body, retry_after, false))
        }
        Ok(ResultView::Completed(result)) => {
            state.tickets.release_all(&id).await;
            Ok((StatusCode::OK, Json(result.as_ref())).into_response())
        }
        Err(e) => {
            if is_terminal_error(&e) {
                state.tickets.release_all(&id).await;
            }
            Err(e.into())
        }
    }
}

/// Release one caller's interest in an operation; other callers stay attached.
pub async fn release_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let released = state.tickets.release_one(&id).await;
    if !released && !state.orchestrator.contains(&id) {
        return Err(Error::OperationNotFound(id).into());
    }

    info!(operation_id = %id, released = released, "Caller detached");
    Ok(StatusCode::NO_CONTENT)
}

fn is_terminal_error(error: &Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Validation | ErrorKind::Transient | ErrorKind::UpstreamFailure | ErrorKind::Timeout
    )
}

fn accepted(body: AcceptedResponse, retry_after: Duration, with_location: bool) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
        headers.insert(header::RETRY_AFTER, value);
    }
    if with_location {
        if let Ok(value) = HeaderValue::from_str(&format!("/api/operations/{}", body.operation_id)) {
            headers.insert(header::LOCATION, value);
        }
    }

    (StatusCode::ACCEPTED, headers, Json(body)).into_response()
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(delay: Duration) -> u64 {
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    secs.max(1)
}
