use http::StatusCode;
use thiserror::Error;

pub type PurgeResult<T> = Result<T, PurgeError>;

/// Terminal failures of a purge call.
///
/// The display strings are what callers see in the `error` field, so they
/// carry no internal detail; the cause is logged where the error is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PurgeError {
    #[error("Invalid request payload")]
    InvalidPayload,

    #[error("Invalid content type")]
    InvalidContentType,

    #[error("Invalid purge type")]
    InvalidPurgeType,

    #[error("Failed to sign the request with given credentials")]
    SigningFailed,

    #[error("Failed to communicate with Akamai")]
    UpstreamUnreachable,

    #[error("Failed to decode Akamai response")]
    UpstreamDecodeFailed,
}

impl PurgeError {
    pub fn status_code(&self) -> StatusCode {
        if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PurgeError::InvalidPayload | PurgeError::InvalidContentType | PurgeError::InvalidPurgeType
        )
    }

    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            PurgeError::InvalidPayload => "invalid_payload",
            PurgeError::InvalidContentType => "invalid_content_type",
            PurgeError::InvalidPurgeType => "invalid_purge_type",
            PurgeError::SigningFailed => "signing_failed",
            PurgeError::UpstreamUnreachable => "upstream_unreachable",
            PurgeError::UpstreamDecodeFailed => "upstream_decode_failed",
        }
    }
}
