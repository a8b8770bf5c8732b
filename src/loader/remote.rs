//! Remote pack fetch strategy over HTTP
//!
//! Uses a blocking HTTP client driven from `spawn_blocking`, wrapped in
//! the fixed-delay retry loop. Failures are split retryable vs fatal by
//! the injected classifier; 5xx and 429 retry, other statuses do not.

use crate::config::schema::RetryConfig;
use crate::error::{DepotError, DepotResult};
use crate::loader::retry::{default_classifier, with_retry, RetryClassifier};
use crate::loader::{verify_checksum, PackLoader, Priority, Uri};
use crate::manifest::PackDescriptor;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Fetches pack images from an HTTP(S) source with retry
pub struct RemoteLoader {
    agent: ureq::Agent,
    retry: RetryConfig,
    classifier: RetryClassifier,
}

impl RemoteLoader {
    pub fn new(retry: RetryConfig) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs_f64(
                retry.timeout_seconds.max(0.1),
            )))
            .http_status_as_error(false)
            .build();

        Self {
            agent: config.new_agent(),
            retry,
            classifier: default_classifier(),
        }
    }

    /// Replace the retryable-vs-fatal classifier
    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    fn blocking_fetch(agent: &ureq::Agent, url: &str) -> DepotResult<Vec<u8>> {
        let mut response = agent
            .get(url)
            .call()
            .map_err(|e| DepotError::network(url, e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(DepotError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| DepotError::network(url, e.to_string()))
    }
}

#[async_trait]
impl PackLoader for RemoteLoader {
    async fn fetch_pack(
        &self,
        descriptor: &PackDescriptor,
        uri: &Uri,
        _priority: Priority,
    ) -> DepotResult<Vec<u8>> {
        let Uri::Http(url) = uri else {
            return Err(DepotError::Internal(format!(
                "remote loader given non-http uri {uri}"
            )));
        };

        debug!(pack = %descriptor.id, url, "downloading pack image");
        let bytes = with_retry(&self.retry, &self.classifier, |_attempt| {
            let agent = self.agent.clone();
            let url = url.clone();
            async move {
                tokio::task::spawn_blocking(move || Self::blocking_fetch(&agent, &url))
                    .await
                    .map_err(|e| DepotError::Internal(format!("fetch task failed: {e}")))?
            }
        })
        .await?;

        verify_checksum(descriptor, &bytes)?;
        Ok(bytes)
    }

    fn strategy_name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_file_uri() {
        let loader = RemoteLoader::new(RetryConfig::default());
        let descriptor = PackDescriptor {
            id: "p".to_string(),
            path: "p.pack".to_string(),
            items: vec![],
            dependencies: vec![],
            sha256: None,
        };
        let err = loader
            .fetch_pack(
                &descriptor,
                &Uri::File("p.pack".into()),
                Priority::Normal,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DepotError::Internal(_)));
    }
}
