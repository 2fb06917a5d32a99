//! YAML configuration for the purge gateway.
//!
//! ## Example
//!
//! ```yaml
//! server:
//!   listenAddress: "0.0.0.0:8080"
//!
//! logs:
//!   showAccessLogs: true
//!   accessLogsFields:
//!     - REQUEST:method
//!     - REQUEST:path
//!     - REQUEST_HEADER:user-agent
//!     - RESPONSE:status
//!   jwtUser:
//!     enabled: true
//!     header: x-auth-token
//!     jwtField: email
//!
//! akamai:
//!   host: "$AKAMAI_HOST"
//!   clientSecret: "$AKAMAI_CLIENT_SECRET"
//!   clientToken: "$AKAMAI_CLIENT_TOKEN"
//!   accessToken: "$AKAMAI_ACCESS_TOKEN"
//!
//! postPurgeRequest:
//!   enabled: true
//!   headers:
//!     x-warmup: "1"
//! ```
//!
//! `$NAME` and `${NAME}` are replaced from the environment before parsing.
//! Tag tokens such as `${REQUEST:method}` are not variable names and survive.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signer::EdgeCredentials;

/// Well-known location of the EdgeGrid credentials file.
pub const DEFAULT_CREDENTIALS_PATH: &str = "/tmp/.edgerc";

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env reference pattern is valid")
});

/// Errors that can occur when loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub akamai: AkamaiConfig,

    #[serde(default)]
    pub post_purge_request: PostPurgeConfig,
}

impl AppConfig {
    /// Load a YAML configuration file, expanding environment references
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&expand_env(&content, |name| std::env::var(name).ok()))
    }

    /// Parse YAML configuration from a string, without env expansion
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.server.socket_addr()?;
        self.akamai.validate()?;
        self.logs.validate()?;
        self.post_purge_request.header_map()?;
        Ok(())
    }
}

/// Replace `$NAME` / `${NAME}` with `lookup(NAME)`, or nothing when unset.
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSection {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
        }
    }
}

impl ServerSection {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigLoadError> {
        self.listen_address.parse().map_err(|err| {
            ConfigLoadError::Validation(format!(
                "server.listenAddress `{}` is invalid: {err}",
                self.listen_address
            ))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get max body size in bytes
    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Access-log settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsConfig {
    #[serde(default)]
    pub show_access_logs: bool,

    /// Field templates, in output order
    #[serde(default)]
    pub access_logs_fields: Vec<String>,

    #[serde(default)]
    pub jwt_user: JwtUserConfig,
}

impl LogsConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.jwt_user.enabled {
            if self.jwt_user.header.trim().is_empty() {
                return Err(ConfigLoadError::Validation(
                    "logs.jwtUser.header is required when jwtUser is enabled".to_string(),
                ));
            }
            if self.jwt_user.jwt_field.trim().is_empty() {
                return Err(ConfigLoadError::Validation(
                    "logs.jwtUser.jwtField is required when jwtUser is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtUserConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Request header carrying the JWT
    #[serde(default)]
    pub header: String,

    /// Payload claim holding the user name
    #[serde(default)]
    pub jwt_field: String,
}

/// Invalidation API endpoint and EdgeGrid credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AkamaiConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default)]
    pub client_token: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

impl Default for AkamaiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            client_secret: String::new(),
            client_token: String::new(),
            access_token: String::new(),
            credentials_path: default_credentials_path(),
        }
    }
}

impl fmt::Debug for AkamaiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AkamaiConfig")
            .field("host", &self.host)
            .field("client_secret", &"<redacted>")
            .field("client_token", &"<redacted>")
            .field("access_token", &"<redacted>")
            .field("credentials_path", &self.credentials_path)
            .finish()
    }
}

impl AkamaiConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.host.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "akamai.host is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL for the invalidation API. A bare host gets `https://`.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }

    pub fn credentials(&self) -> EdgeCredentials {
        EdgeCredentials {
            host: self.host.clone(),
            client_secret: self.client_secret.clone(),
            client_token: self.client_token.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

/// Cache warming after a successful purge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPurgeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Static headers attached to every warming request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl PostPurgeConfig {
    pub fn header_map(&self) -> Result<HeaderMap, ConfigLoadError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigLoadError::Validation(format!(
                    "postPurgeRequest.headers: invalid header name `{name}`"
                ))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ConfigLoadError::Validation(format!(
                    "postPurgeRequest.headers: invalid value for `{name}`"
                ))
            })?;
            map.insert(header, value);
        }
        Ok(map)
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_size_mb() -> usize {
    10
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
akamai:
  host: akab-test.purge.akamaiapis.net
"#;

    #[test]
    fn test_load_minimal_yaml() {
        let config = AppConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0:8080");
        assert_eq!(config.server.timeout_secs, 30);
        assert!(!config.logs.show_access_logs);
        assert!(!config.post_purge_request.enabled);
        assert_eq!(
            config.akamai.credentials_path,
            PathBuf::from(DEFAULT_CREDENTIALS_PATH)
        );
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
server:
  listenAddress: "127.0.0.1:9000"
logs:
  showAccessLogs: true
  accessLogsFields:
    - REQUEST:method
    - ${RESPONSE:status}
  jwtUser:
    enabled: true
    header: x-auth-token
    jwtField: email
akamai:
  host: akab-test.purge.akamaiapis.net
  clientSecret: s3cr3t
  clientToken: akab-client
  accessToken: akab-access
  credentialsPath: /var/run/akapurge/.edgerc
postPurgeRequest:
  enabled: true
  headers:
    x-warmup: "1"
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.socket_addr().unwrap().port(), 9000);
        assert_eq!(
            config.logs.access_logs_fields,
            vec!["REQUEST:method", "${RESPONSE:status}"]
        );
        assert!(config.logs.jwt_user.enabled);
        assert_eq!(config.logs.jwt_user.jwt_field, "email");
        assert_eq!(config.akamai.client_token, "akab-client");
        assert_eq!(
            config.post_purge_request.header_map().unwrap()["x-warmup"],
            "1"
        );
    }

    #[test]
    fn test_missing_host_is_rejected() {
        let err = AppConfig::from_yaml("logs:\n  showAccessLogs: true\n").unwrap_err();
        assert!(err.to_string().contains("akamai.host"));
    }

    #[test]
    fn test_jwt_user_requires_header_and_field() {
        let yaml = format!("{MINIMAL}logs:\n  jwtUser:\n    enabled: true\n    header: x\n");
        let err = AppConfig::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("jwtField"));
    }

    #[test]
    fn test_invalid_listen_address() {
        let yaml = format!("{MINIMAL}server:\n  listenAddress: nowhere\n");
        assert!(matches!(
            AppConfig::from_yaml(&yaml),
            Err(ConfigLoadError::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_post_purge_header() {
        let yaml = format!("{MINIMAL}postPurgeRequest:\n  headers:\n    \"bad header\": x\n");
        assert!(AppConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_expand_env_leaves_tag_tokens() {
        let lookup = |name: &str| match name {
            "HOST" => Some("akab.example.net".to_string()),
            "TOKEN" => Some("t0k".to_string()),
            _ => None,
        };
        let input = "host: $HOST\ntoken: ${TOKEN}\nunset: '$NOPE'\nfield: ${REQUEST:method}";
        assert_eq!(
            expand_env(input, lookup),
            "host: akab.example.net\ntoken: t0k\nunset: ''\nfield: ${REQUEST:method}"
        );
    }

    #[test]
    fn test_max_body_size_saturates() {
        let yaml = format!("{MINIMAL}server:\n  maxBodySizeMb: {}\n", usize::MAX / 2);
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.server.max_body_size(), usize::MAX);

        let yaml = format!("{MINIMAL}server:\n  maxBodySizeMb: 2\n");
        let config = AppConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.server.max_body_size(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.akamai.host, "akab-test.purge.akamaiapis.net");
    }

    #[test]
    fn test_base_url() {
        let mut akamai = AkamaiConfig {
            host: "akab-test.purge.akamaiapis.net/".into(),
            ..Default::default()
        };
        assert_eq!(akamai.base_url(), "https://akab-test.purge.akamaiapis.net");
        akamai.host = "http://127.0.0.1:9999".into();
        assert_eq!(akamai.base_url(), "http://127.0.0.1:9999");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let akamai = AkamaiConfig {
            client_secret: "s3cr3t".into(),
            ..Default::default()
        };
        assert!(!format!("{akamai:?}").contains("s3cr3t"));
    }
}
