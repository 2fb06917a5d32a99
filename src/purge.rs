//! Purge requests and the pipeline that carries one to the invalidation API.
//!
//! Each inbound call moves through
//! `received → validated → routed → signed → forwarded → interpreted`, and
//! may finally hand its paths to the [`Warmer`]. Any step can end the call
//! with a [`PurgeError`]; nothing after a failed step runs.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PurgeError, PurgeResult};
use crate::signer::RequestSigner;
use crate::warmer::Warmer;

/// What kind of objects `paths` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeType {
    Urls,
    CacheTags,
}

impl PurgeType {
    pub fn parse(value: &str) -> PurgeResult<Self> {
        match value {
            "urls" => Ok(PurgeType::Urls),
            "cache-tags" => Ok(PurgeType::CacheTags),
            _ => Err(PurgeError::InvalidPurgeType),
        }
    }

    /// Path segment in the invalidation API.
    pub fn segment(&self) -> &'static str {
        match self {
            PurgeType::Urls => "url",
            PurgeType::CacheTags => "tag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Invalidate,
    Delete,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::Invalidate => "invalidate",
            ActionType::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        })
    }
}

/// A caller's purge intent.
///
/// `purge_type` stays a string until routing so that an unknown type is
/// reported as such rather than as a malformed payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    pub purge_type: String,
    pub action_type: ActionType,
    pub environment: Environment,
    pub paths: Vec<String>,
    #[serde(default)]
    pub post_purge_request: bool,
}

impl PurgeRequest {
    /// Parse and validate a request body.
    pub fn from_json(body: &[u8]) -> PurgeResult<Self> {
        let value: Value = serde_json::from_slice(body).map_err(|err| {
            tracing::error!(error = %err, "request body is not valid JSON");
            PurgeError::InvalidPayload
        })?;
        let request: PurgeRequest = serde_json::from_value(value).map_err(|err| {
            tracing::error!(error = %err, "failed to parse request");
            PurgeError::InvalidPayload
        })?;
        if request.paths.is_empty() {
            tracing::error!("purge request has no paths");
            return Err(PurgeError::InvalidPayload);
        }
        Ok(request)
    }

    /// Invalidation endpoint for this request under `base_url`.
    pub fn upstream_url(&self, base_url: &str) -> PurgeResult<String> {
        let purge_type = PurgeType::parse(&self.purge_type)?;
        Ok(format!(
            "{}/ccu/v3/{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.action_type,
            purge_type.segment(),
            self.environment
        ))
    }

    pub fn upstream_body(&self) -> Value {
        json!({ "objects": self.paths })
    }
}

/// Body returned by the invalidation API, passed back to the caller as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResult {
    #[serde(default)]
    pub http_status: u16,

    #[serde(default)]
    pub detail: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_seconds: Option<u64>,
}

/// Status and body to hand back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub status: StatusCode,
    pub result: UpstreamResult,
}

/// Rejects anything but `application/json`, parameters allowed.
pub fn ensure_json_content_type(headers: &HeaderMap) -> PurgeResult<()> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if mime.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        tracing::error!(content_type = %content_type, "unsupported content type");
        Err(PurgeError::InvalidContentType)
    }
}

/// Drives purge calls against one invalidation API.
pub struct PurgeOrchestrator {
    client: reqwest::Client,
    signer: Arc<dyn RequestSigner>,
    base_url: String,
    warmer: Option<Warmer>,
}

impl fmt::Debug for PurgeOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurgeOrchestrator")
            .field("base_url", &self.base_url)
            .field("post_purge", &self.warmer.is_some())
            .finish_non_exhaustive()
    }
}

impl PurgeOrchestrator {
    pub fn new(
        client: reqwest::Client,
        signer: Arc<dyn RequestSigner>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            signer,
            base_url: base_url.into(),
            warmer: None,
        }
    }

    /// Enable post-purge warming. Without a warmer, the per-request
    /// `postPurgeRequest` flag is ignored.
    pub fn with_warmer(mut self, warmer: Warmer) -> Self {
        self.warmer = Some(warmer);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run one inbound call to completion on its own task.
    ///
    /// The purge keeps going if the caller goes away: by the time the POST is
    /// out, the edge may already be purging.
    pub async fn run(self: &Arc<Self>, headers: HeaderMap, body: Bytes) -> PurgeResult<PurgeOutcome> {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.handle(&headers, &body).await });
        match task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                tracing::error!(error = %err, "purge task cancelled");
                Err(PurgeError::UpstreamUnreachable)
            }
        }
    }

    /// Validate the inbound call, then purge.
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> PurgeResult<PurgeOutcome> {
        let result = match ensure_json_content_type(headers)
            .and_then(|()| PurgeRequest::from_json(body))
        {
            Ok(request) => self.purge(&request).await,
            Err(err) => Err(err),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.outcome(),
        };
        metrics::counter!("akapurge_purge_requests_total", "outcome" => outcome).increment(1);
        result
    }

    /// Route, sign, forward and interpret a validated request.
    pub async fn purge(&self, request: &PurgeRequest) -> PurgeResult<PurgeOutcome> {
        let url = request.upstream_url(&self.base_url).inspect_err(|_| {
            tracing::error!(purge_type = %request.purge_type, "Invalid purge type");
        })?;

        let outbound = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.upstream_body().to_string())
            .build()
            .map_err(|err| {
                tracing::error!(url = %url, error = %err, "failed to create upstream request");
                PurgeError::UpstreamUnreachable
            })?;

        let signed = self.signer.sign(outbound).await.map_err(|err| {
            tracing::error!(error = %err, "failed to sign the request with given credentials");
            PurgeError::SigningFailed
        })?;

        let started = Instant::now();
        let response = self.client.execute(signed).await.map_err(|err| {
            tracing::error!(url = %url, error = %err, "failed to send request to Akamai");
            PurgeError::UpstreamUnreachable
        })?;
        metrics::histogram!("akapurge_upstream_latency_seconds")
            .record(started.elapsed().as_secs_f64());

        let status = response.status();
        let result: UpstreamResult = response.json().await.map_err(|err| {
            tracing::error!(status = status.as_u16(), error = %err, "failed to decode Akamai response");
            PurgeError::UpstreamDecodeFailed
        })?;
        tracing::info!(
            detail = %result.detail,
            status = result.http_status,
            "akamai-response"
        );

        if status.is_success() && request.post_purge_request {
            if let Some(warmer) = &self.warmer {
                warmer.schedule(request.paths.clone());
            }
        }

        Ok(PurgeOutcome { status, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::SignError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn body(purge_type: &str) -> Vec<u8> {
        json!({
            "purgeType": purge_type,
            "actionType": "invalidate",
            "environment": "staging",
            "paths": ["/a.jpg"],
        })
        .to_string()
        .into_bytes()
    }

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers
    }

    #[derive(Default)]
    struct CountingSigner(AtomicUsize);

    #[async_trait]
    impl RequestSigner for CountingSigner {
        async fn sign(&self, _: reqwest::Request) -> Result<reqwest::Request, SignError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SignError::Other("no credentials in tests".into()))
        }
    }

    fn orchestrator(signer: Arc<CountingSigner>) -> PurgeOrchestrator {
        PurgeOrchestrator::new(reqwest::Client::new(), signer, "http://127.0.0.1:9")
    }

    #[test]
    fn routes_urls_and_cache_tags() {
        let request = PurgeRequest::from_json(&body("urls")).unwrap();
        assert_eq!(
            request.upstream_url("https://akab.example.net").unwrap(),
            "https://akab.example.net/ccu/v3/invalidate/url/staging"
        );

        let mut request = PurgeRequest::from_json(&body("cache-tags")).unwrap();
        request.action_type = ActionType::Delete;
        request.environment = Environment::Production;
        assert_eq!(
            request.upstream_url("https://akab.example.net/").unwrap(),
            "https://akab.example.net/ccu/v3/delete/tag/production"
        );
    }

    #[test]
    fn unknown_purge_type_fails_at_routing() {
        let request = PurgeRequest::from_json(&body("cpcodes")).unwrap();
        assert_eq!(
            request.upstream_url("https://akab.example.net"),
            Err(PurgeError::InvalidPurgeType)
        );
    }

    #[test]
    fn payload_validation() {
        let cases = [
            &b"{not json"[..],
            br#"{"purgeType":"urls"}"#,
            br#"{"purgeType":"urls","actionType":"refresh","environment":"staging","paths":["/a"]}"#,
            br#"{"purgeType":"urls","actionType":"delete","environment":"qa","paths":["/a"]}"#,
            br#"{"purgeType":"urls","actionType":"delete","environment":"staging","paths":[]}"#,
        ];
        for case in cases {
            assert_eq!(
                PurgeRequest::from_json(case),
                Err(PurgeError::InvalidPayload),
                "{}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn post_purge_flag_defaults_off() {
        let request = PurgeRequest::from_json(&body("urls")).unwrap();
        assert!(!request.post_purge_request);
        assert_eq!(request.upstream_body(), json!({ "objects": ["/a.jpg"] }));
    }

    #[test]
    fn content_type_accepts_parameters_only_for_json() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "Application/JSON; charset=utf-8".parse().unwrap());
        assert!(ensure_json_content_type(&headers).is_ok());

        headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        assert_eq!(
            ensure_json_content_type(&headers),
            Err(PurgeError::InvalidContentType)
        );
        assert_eq!(
            ensure_json_content_type(&HeaderMap::new()),
            Err(PurgeError::InvalidContentType)
        );
    }

    #[test]
    fn upstream_result_omits_absent_optional_fields() {
        let result: UpstreamResult =
            serde_json::from_str(r#"{"httpStatus":201,"detail":"Request accepted"}"#).unwrap();
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"httpStatus":201,"detail":"Request accepted"}"#
        );

        let full: UpstreamResult = serde_json::from_str(
            r#"{"httpStatus":201,"detail":"ok","purgeId":"p-1","supportId":"s-1","estimatedSeconds":5}"#,
        )
        .unwrap();
        assert_eq!(full.purge_id.as_deref(), Some("p-1"));
        assert_eq!(full.estimated_seconds, Some(5));
    }

    #[tokio::test]
    async fn validation_failures_never_reach_the_signer() {
        let signer = Arc::new(CountingSigner::default());
        let purger = orchestrator(Arc::clone(&signer));

        let mut text = HeaderMap::new();
        text.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        assert_eq!(
            purger.handle(&text, &body("urls")).await,
            Err(PurgeError::InvalidContentType)
        );
        assert_eq!(
            purger.handle(&json_headers(), b"{oops").await,
            Err(PurgeError::InvalidPayload)
        );
        assert_eq!(
            purger.handle(&json_headers(), &body("everything")).await,
            Err(PurgeError::InvalidPurgeType)
        );
        assert_eq!(signer.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signing_failure_stops_before_forwarding() {
        let signer = Arc::new(CountingSigner::default());
        let purger = Arc::new(orchestrator(Arc::clone(&signer)));
        let result = purger
            .run(json_headers(), Bytes::from(body("urls")))
            .await;
        assert_eq!(result, Err(PurgeError::SigningFailed));
        assert_eq!(signer.0.load(Ordering::SeqCst), 1);
    }
}
