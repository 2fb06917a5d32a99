use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

/// `POST /api/v1/purge`
///
/// Replies with the invalidation API's status code and result body. The
/// purge runs on its own task, so a caller that hangs up does not cancel it.
pub async fn purge(
    State(state): State<Arc<ServerState>>,
    request: Request,
) -> ServerResult<Response> {
    let limit = state.config.app.server.max_body_size();
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, limit)
        .await
        .map_err(|_| ServerError::PayloadTooLarge(limit))?;

    let outcome = state.purger.run(parts.headers, body).await?;
    Ok((outcome.status, Json(outcome.result)).into_response())
}
