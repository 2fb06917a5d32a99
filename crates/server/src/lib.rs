//! Akamai purge gateway - HTTP surface
//!
//! Exposes the purge pipeline from the `akapurge` crate over axum:
//!
//! - `POST /api/v1/purge` - validate, route, sign and forward a purge; the
//!   reply mirrors the invalidation API's status and body
//! - `GET /health` - liveness check
//! - `GET /metrics` - Prometheus metrics
//!
//! Every request may also be written to the access log, with fields picked
//! by the configured tag templates.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     server::start_server(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{Cli, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use logging::{AccessLogLayer, ACCESS_LOG_TARGET};
pub use server::{build_router, start_server};
pub use state::ServerState;
