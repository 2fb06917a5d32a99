use akapurge::PurgeError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Json};
use serde_json::json;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
///
/// Every variant renders as `{"error": "<message>"}` with its status code.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Purge(#[from] PurgeError),

    #[error("Payload too large: max {0} bytes allowed")]
    PayloadTooLarge(usize),

    #[error("Request timeout")]
    Timeout,

    #[error("Not found")]
    NotFound,

    /// Failure inside a middleware layer. The detail is logged, not returned.
    #[error("Internal server error")]
    Internal(String),
}

impl ServerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Purge(err) => err.status_code(),
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Internal(detail) = &self {
            tracing::error!(error = %detail, "middleware failure");
        }
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// Map errors from fallible tower layers onto the JSON error shape.
pub async fn handle_layer_error(err: BoxError) -> ServerError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ServerError::Timeout
    } else {
        ServerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_errors_keep_their_status_and_message() {
        let err = ServerError::from(PurgeError::InvalidPurgeType);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid purge type");

        let err = ServerError::from(PurgeError::UpstreamDecodeFailed);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_is_404() {
        assert_eq!(ServerError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ServerError::NotFound.to_string(), "Not found");
    }

    #[tokio::test]
    async fn elapsed_layers_become_request_timeout() {
        let err = handle_layer_error(tower::timeout::error::Elapsed::new().into()).await;
        assert!(matches!(err, ServerError::Timeout));
        assert_eq!(err.status_code(), StatusCode::REQUEST_TIMEOUT);

        let err = handle_layer_error("connection reset".into()).await;
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");
    }
}
