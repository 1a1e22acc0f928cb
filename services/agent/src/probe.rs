//! Readiness barriers.
//!
//! Blocking waits, bounded by a timeout, that confirm an external effect
//! before an action is reported complete: an HTTP endpoint answering, or a
//! device node appearing on the filesystem.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from readiness waits.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timed out after {timeout:?} waiting for {target}")]
    Timeout { target: String, timeout: Duration },

    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Readiness prober interface.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Wait until `url` answers any HTTP request.
    async fn wait_for_http(&self, url: &str, timeout: Duration) -> Result<(), ProbeError>;

    /// Wait until `path` exists.
    async fn wait_for_path(&self, path: &Path, timeout: Duration) -> Result<(), ProbeError>;
}

/// Prober that polls at a fixed interval.
pub struct PollingProbe {
    client: reqwest::Client,
    interval: Duration,
}

impl PollingProbe {
    pub fn new(interval: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self { client, interval })
    }
}

#[async_trait]
impl ReadinessProbe for PollingProbe {
    async fn wait_for_http(&self, url: &str, timeout: Duration) -> Result<(), ProbeError> {
        let poll = async {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match self.client.get(url).send().await {
                    Ok(response) => {
                        info!(url = %url, status = %response.status(), attempts, "Endpoint reachable");
                        return;
                    }
                    Err(e) => debug!(url = %url, error = %e, attempts, "Endpoint not reachable yet"),
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ProbeError::Timeout {
                target: url.to_string(),
                timeout,
            })
    }

    async fn wait_for_path(&self, path: &Path, timeout: Duration) -> Result<(), ProbeError> {
        let poll = async {
            loop {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    info!(path = %path.display(), "Path present");
                    return;
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ProbeError::Timeout {
                target: path.display().to_string(),
                timeout,
            })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn probe() -> PollingProbe {
        PollingProbe::new(Duration::from_millis(20)).unwrap()
    }

    #[tokio::test]
    async fn test_wait_for_path_appears() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("vol1");

        let create = {
            let device = device.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(60)).await;
                tokio::fs::write(&device, b"").await.unwrap();
            })
        };

        probe()
            .wait_for_path(&device, Duration::from_secs(5))
            .await
            .unwrap();
        create.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_path_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("never");

        let err = probe()
            .wait_for_path(&device, Duration::from_millis(100))
            .await
            .unwrap_err();
        match err {
            ProbeError::Timeout { target, .. } => assert!(target.ends_with("never")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_http_any_status_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/v1", server.uri());
        probe()
            .wait_for_http(&url, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_http_times_out() {
        let err = probe()
            .wait_for_http("http://127.0.0.1:1/v1", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("http://127.0.0.1:1/v1"));
    }
}
