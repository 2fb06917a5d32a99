//! API route handlers
//!
//! - `health`: liveness and Prometheus metrics
//! - `purge`: the purge endpoint

pub mod health;
pub mod purge;

use crate::error::ServerError;

/// 404 Not Found handler
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
