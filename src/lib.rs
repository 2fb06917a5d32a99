//! Akamai purge gateway core.
//!
//! Accepts purge intents, routes them to the Fast Purge (CCU v3) API, signs
//! them with EdgeGrid credentials and relays the result. Around that sits a
//! small tag language (`${REQUEST:method}`, `RESPONSE_HEADER:etag`, ...) used
//! to pick access-log fields out of each request/response pair.
//!
//! The HTTP surface lives in the `akapurge-server` crate.

pub mod config;
pub mod error;
pub mod fields;
pub mod purge;
pub mod signer;
pub mod tags;
pub mod warmer;

pub use config::{AppConfig, ConfigLoadError};
pub use error::{PurgeError, PurgeResult};
pub use fields::{FieldExtractor, JwtUser, LogFieldSet};
pub use purge::{PurgeOrchestrator, PurgeOutcome, PurgeRequest, UpstreamResult};
pub use signer::{provision_edgerc, EdgeCredentials, RequestSigner, SignError};
#[cfg(feature = "edgegrid")]
pub use signer::EdgeGridSigner;
pub use tags::{RequestSnapshot, ResponseSnapshot, Tag, Template};
pub use warmer::{Warmer, SETTLE_DELAY};
