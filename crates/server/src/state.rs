use crate::config::ServerConfig;
use akapurge::{FieldExtractor, PurgeOrchestrator, RequestSigner, Warmer, SETTLE_DELAY};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Purge pipeline (shared across requests)
    pub purger: Arc<PurgeOrchestrator>,

    /// Access-log field templates, compiled once
    pub extractor: Arc<FieldExtractor>,

    /// Prometheus renderer, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    /// Create state that signs with the EdgeGrid credentials file.
    ///
    /// Must be called from within a tokio runtime when post-purge warming is
    /// enabled.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let signer = akapurge::EdgeGridSigner::new(config.app.akamai.credentials_path.clone());
        Self::new_with(config, Arc::new(signer), SETTLE_DELAY)
    }

    /// Create state around an arbitrary signer and warming delay.
    pub fn new_with(
        config: ServerConfig,
        signer: Arc<dyn RequestSigner>,
        settle_delay: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.app.server.timeout())
            .build()?;

        let mut purger =
            PurgeOrchestrator::new(client.clone(), signer, config.app.akamai.base_url());
        let post_purge = &config.app.post_purge_request;
        if post_purge.enabled {
            let headers = post_purge.header_map()?;
            purger = purger.with_warmer(Warmer::spawn_with_delay(client, headers, settle_delay));
        }

        let extractor = FieldExtractor::from_config(&config.app.logs);

        Ok(Self {
            config: Arc::new(config),
            purger: Arc::new(purger),
            extractor: Arc::new(extractor),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
