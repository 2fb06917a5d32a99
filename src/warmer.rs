//! Post-purge cache warming.
//!
//! After a successful purge the edge needs a moment before purged objects
//! can be refetched. Jobs are queued to a background worker which gives each
//! one its own timer, so a handler never waits for the settle window and a
//! burst of purges does not serialize behind each other's delays.

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Fixed wait between a successful purge and the first warming fetch.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct WarmJob {
    paths: Vec<String>,
    due: Instant,
}

/// Handle to the warming queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Warmer {
    tx: mpsc::UnboundedSender<WarmJob>,
    settle_delay: Duration,
}

impl Warmer {
    /// Start the worker. Production callers pass [`SETTLE_DELAY`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_with_delay(
        client: reqwest::Client,
        headers: HeaderMap,
        settle_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, client, Arc::new(headers)));
        Self { tx, settle_delay }
    }

    /// Queue one GET per path, sent in order once the settle delay elapses.
    ///
    /// Returns `false` if the worker is gone; the purge itself is unaffected.
    pub fn schedule(&self, paths: Vec<String>) -> bool {
        let job = WarmJob {
            paths,
            due: Instant::now() + self.settle_delay,
        };
        match self.tx.send(job) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("post-purge worker stopped; warming skipped");
                false
            }
        }
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<WarmJob>,
    client: reqwest::Client,
    headers: Arc<HeaderMap>,
) {
    while let Some(job) = rx.recv().await {
        tokio::spawn(warm(client.clone(), Arc::clone(&headers), job));
    }
}

async fn warm(client: reqwest::Client, headers: Arc<HeaderMap>, job: WarmJob) {
    tokio::time::sleep_until(job.due).await;

    for path in &job.paths {
        let result = client
            .get(path.as_str())
            .headers(HeaderMap::clone(&headers))
            .send()
            .await;
        match result {
            Ok(response) => {
                metrics::counter!("akapurge_post_purge_fetches_total", "outcome" => "ok")
                    .increment(1);
                tracing::debug!(
                    path = %path,
                    status = response.status().as_u16(),
                    "post-purge request sent"
                );
            }
            Err(err) => {
                metrics::counter!("akapurge_post_purge_fetches_total", "outcome" => "failed")
                    .increment(1);
                tracing::warn!(path = %path, error = %err, "post-purge request failed");
            }
        }
    }
}
