//! Outbound request signing.
//!
//! The orchestrator only sees [`RequestSigner`]. The default implementation,
//! [`EdgeGridSigner`], applies Akamai's EG1-HMAC-SHA256 scheme using
//! credentials read from an `.edgerc` file on every call, so rotating the
//! file takes effect without a restart.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("failed to read credentials from {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },

    #[error("credentials are missing `{0}`")]
    MissingCredential(&'static str),

    #[error("request body must be buffered to be signed")]
    StreamingBody,

    #[error("authorization header could not be built: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),

    #[error("signing failed: {0}")]
    Other(String),
}

/// Attaches authentication to an outbound request.
#[async_trait]
pub trait RequestSigner: Send + Sync {
    async fn sign(&self, request: reqwest::Request) -> Result<reqwest::Request, SignError>;
}

/// The `[default]` section of an `.edgerc` file.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EdgeCredentials {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub client_token: String,
    #[serde(default)]
    pub access_token: String,
}

impl fmt::Debug for EdgeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeCredentials")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl EdgeCredentials {
    /// Render as an `.edgerc` document with a single `[default]` section.
    pub fn to_edgerc(&self) -> String {
        format!(
            "[default]\nhost = {}\nclient_secret = {}\nclient_token = {}\naccess_token = {}\n",
            self.host, self.client_secret, self.client_token, self.access_token
        )
    }

    fn ensure_complete(&self) -> Result<(), SignError> {
        let fields = [
            ("client_secret", &self.client_secret),
            ("client_token", &self.client_token),
            ("access_token", &self.access_token),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(SignError::MissingCredential(name));
            }
        }
        Ok(())
    }
}

/// Write `credentials` to `path` unless a file is already there.
///
/// Returns whether a file was written. An existing file is never touched.
pub fn provision_edgerc(path: &Path, credentials: &EdgeCredentials) -> io::Result<bool> {
    if path.exists() {
        tracing::info!(path = %path.display(), "credentials file already exists");
        return Ok(false);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, credentials.to_edgerc())?;
    tracing::info!(path = %path.display(), "credentials file created");
    Ok(true)
}

#[cfg(feature = "edgegrid")]
pub use edgegrid::{authorization_header, EdgeGridSigner};

#[cfg(feature = "edgegrid")]
mod edgegrid {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use http::header::AUTHORIZATION;
    use http::{HeaderValue, Method};
    use reqwest::Url;
    use sha2::{Digest, Sha256};

    use super::{EdgeCredentials, RequestSigner, SignError};

    type HmacSha256 = Hmac<Sha256>;

    /// Only this many body bytes are hashed, matching the API's `max_body`.
    const MAX_BODY: usize = 131_072;
    const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H:%M:%S+0000";

    impl EdgeCredentials {
        /// Read the `[default]` section of an `.edgerc` file.
        pub async fn from_edgerc(path: &Path) -> Result<Self, SignError> {
            let reason = |err: &dyn std::fmt::Display| SignError::Credentials {
                path: path.to_path_buf(),
                reason: err.to_string(),
            };
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|err| reason(&err))?;
            let parsed = config::Config::builder()
                .add_source(config::File::from_str(&contents, config::FileFormat::Ini))
                .build()
                .map_err(|err| reason(&err))?;
            let credentials: EdgeCredentials =
                parsed.get("default").map_err(|err| reason(&err))?;
            credentials.ensure_complete()?;
            Ok(credentials)
        }
    }

    /// EG1-HMAC-SHA256 signer bound to a credentials file.
    #[derive(Debug, Clone)]
    pub struct EdgeGridSigner {
        path: PathBuf,
    }

    impl EdgeGridSigner {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    #[async_trait]
    impl RequestSigner for EdgeGridSigner {
        async fn sign(&self, mut request: reqwest::Request) -> Result<reqwest::Request, SignError> {
            let credentials = EdgeCredentials::from_edgerc(&self.path).await?;
            let body = match request.body() {
                Some(body) => body.as_bytes().ok_or(SignError::StreamingBody)?,
                None => &[][..],
            };
            let timestamp = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
            let nonce = uuid::Uuid::new_v4().to_string();
            let header = authorization_header(
                &credentials,
                request.method(),
                request.url(),
                body,
                &timestamp,
                &nonce,
            )?;
            request
                .headers_mut()
                .insert(AUTHORIZATION, HeaderValue::from_str(&header)?);
            Ok(request)
        }
    }

    fn hmac_base64(key: &[u8], data: &[u8]) -> Result<String, SignError> {
        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|e| SignError::Other(e.to_string()))?;
        mac.update(data);
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn content_hash(method: &Method, body: &[u8]) -> String {
        if *method != Method::POST || body.is_empty() {
            return String::new();
        }
        let hashed = &body[..body.len().min(MAX_BODY)];
        STANDARD.encode(Sha256::digest(hashed))
    }

    /// Build the `Authorization` value for one request.
    ///
    /// Deterministic for fixed `timestamp` and `nonce`.
    pub fn authorization_header(
        credentials: &EdgeCredentials,
        method: &Method,
        url: &Url,
        body: &[u8],
        timestamp: &str,
        nonce: &str,
    ) -> Result<String, SignError> {
        let auth_prefix = format!(
            "EG1-HMAC-SHA256 client_token={};access_token={};timestamp={};nonce={};",
            credentials.client_token, credentials.access_token, timestamp, nonce
        );

        let mut host = url.host_str().unwrap_or_default().to_string();
        if let Some(port) = url.port() {
            host = format!("{host}:{port}");
        }
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path = format!("{path}?{query}");
        }

        let data_to_sign = [
            method.as_str(),
            url.scheme(),
            &host,
            &path,
            "",
            &content_hash(method, body),
            &auth_prefix,
        ]
        .join("\t");

        let signing_key = hmac_base64(credentials.client_secret.as_bytes(), timestamp.as_bytes())?;
        let signature = hmac_base64(signing_key.as_bytes(), data_to_sign.as_bytes())?;
        Ok(format!("{auth_prefix}signature={signature}"))
    }

}
