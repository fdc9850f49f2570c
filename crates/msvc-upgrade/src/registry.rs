//! Registry (exchange) client seam
//!
//! The engine talks to the exchange through [`RegistryClient`]. Retrying
//! transient failures is the job of [`RetryingRegistry`], which wraps any
//! client; callers cancel a retry loop by dropping its future.

use crate::config::EngineConfig;
use crate::error::RegistryError;
use async_trait::async_trait;
use msvc_model::{ExchangeMicroservice, ExchangeNode, NodePut, VersionRange};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exchange operations used by the upgrade engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Highest version of (spec ref, org, arch) inside `range`
    async fn highest_matching_version(
        &self,
        spec_ref: &str,
        org: &str,
        range: &VersionRange,
        arch: &str,
    ) -> Result<ExchangeMicroservice, RegistryError>;

    /// Read a node record
    async fn get_node(&self, node_id: &str) -> Result<ExchangeNode, RegistryError>;

    /// Replace a node record
    async fn put_node(&self, node_id: &str, body: &NodePut) -> Result<(), RegistryError>;
}

#[async_trait]
impl<T: RegistryClient + ?Sized> RegistryClient for Arc<T> {
    async fn highest_matching_version(
        &self,
        spec_ref: &str,
        org: &str,
        range: &VersionRange,
        arch: &str,
    ) -> Result<ExchangeMicroservice, RegistryError> {
        (**self).highest_matching_version(spec_ref, org, range, arch).await
    }

    async fn get_node(&self, node_id: &str) -> Result<ExchangeNode, RegistryError> {
        (**self).get_node(node_id).await
    }

    async fn put_node(&self, node_id: &str, body: &NodePut) -> Result<(), RegistryError> {
        (**self).put_node(node_id, body).await
    }
}

/// Retry policy for [`RetryingRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed pause between attempts
    pub delay: Duration,
    /// Total attempts including the first; `None` never gives up
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            delay: config.registry_retry_delay(),
            max_attempts: config.registry_max_attempts,
        }
    }
}

/// Client wrapper that retries transient failures with a fixed delay
pub struct RetryingRegistry<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: RegistryClient> RetryingRegistry<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Wrapped client
    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, RegistryError>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "registry call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    if self.policy.max_attempts.is_some_and(|max| attempt >= max) {
                        warn!(operation, attempt, error = %err, "giving up on registry call");
                        return Err(err);
                    }
                    warn!(
                        operation,
                        attempt,
                        error = %err,
                        delay_ms = u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
                        "transient registry error, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<C: RegistryClient> RegistryClient for RetryingRegistry<C> {
    async fn highest_matching_version(
        &self,
        spec_ref: &str,
        org: &str,
        range: &VersionRange,
        arch: &str,
    ) -> Result<ExchangeMicroservice, RegistryError> {
        self.retry("highest_matching_version", || {
            self.inner.highest_matching_version(spec_ref, org, range, arch)
        })
        .await
    }

    async fn get_node(&self, node_id: &str) -> Result<ExchangeNode, RegistryError> {
        self.retry("get_node", || self.inner.get_node(node_id)).await
    }

    async fn put_node(&self, node_id: &str, body: &NodePut) -> Result<(), RegistryError> {
        self.retry("put_node", || self.inner.put_node(node_id, body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(1),
            max_attempts,
        }
    }

    #[test]
    fn policy_from_config() {
        let config = EngineConfig::new()
            .with_registry_retry_delay_ms(250)
            .with_registry_max_attempts(Some(4));
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.delay, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(RetryPolicy::from(&EngineConfig::default()), RetryPolicy::default());
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut mock = MockRegistryClient::new();
        mock.expect_get_node().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RegistryError::Transport("reset".into()))
            } else {
                Ok(ExchangeNode {
                    name: "node1".into(),
                    ..Default::default()
                })
            }
        });

        let client = RetryingRegistry::new(mock, quick(None));
        let node = client.get_node("acme/node1").await.unwrap();
        assert_eq!(node.name, "node1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let mut mock = MockRegistryClient::new();
        mock.expect_get_node()
            .times(1)
            .returning(|_| Err(RegistryError::Decode("bad json".into())));

        let client = RetryingRegistry::new(mock, quick(None));
        assert_eq!(
            client.get_node("acme/node1").await.unwrap_err(),
            RegistryError::Decode("bad json".into())
        );
    }

    #[tokio::test]
    async fn attempt_bound_is_honoured() {
        let mut mock = MockRegistryClient::new();
        mock.expect_put_node().times(3).returning(|_, _| {
            Err(RegistryError::Status {
                status: 503,
                message: "busy".into(),
            })
        });

        let client = RetryingRegistry::new(mock, quick(Some(3)));
        let err = client
            .put_node("acme/node1", &NodePut::new("tok", "node1"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unbounded_retry_is_cancellable() {
        let mut mock = MockRegistryClient::new();
        mock.expect_get_node()
            .returning(|_| Err(RegistryError::Transport("down".into())));

        let client = RetryingRegistry::new(mock, quick(None));
        let outcome =
            tokio::time::timeout(Duration::from_millis(30), client.get_node("acme/node1")).await;
        assert!(outcome.is_err());
    }
}
