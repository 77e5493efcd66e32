//! Provider wrapper with a single retry.
//!
//! A failed completion is retried once after a short pause; a second failure
//! propagates so the orchestrator can degrade the reply instead of erroring.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use classpulse_core::error::Result;
use classpulse_core::provider::{CompletionRequest, LlmProvider};

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Wraps any [`LlmProvider`] and retries a failed completion once.
pub struct RetryProvider<P: LlmProvider> {
    inner: P,
}

impl<P: LlmProvider> RetryProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for RetryProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        match self.inner.complete(request.clone()).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(provider = self.inner.name(), error = %e, "completion failed; retrying once");
                tokio::time::sleep(RETRY_DELAY).await;
                self.inner.complete(request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use classpulse_core::error::ClassPulseError;

    struct CountingProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl LlmProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn default_model(&self) -> &str {
            "test"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(ClassPulseError::UpstreamUnavailable("boom".into()))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_retries_once_on_failure() {
        let provider = RetryProvider::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });
        let reply = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_failure_propagates() {
        let provider = RetryProvider::new(CountingProvider {
            calls: AtomicU32::new(0),
            fail_first: 5,
        });
        let err = provider.complete(CompletionRequest::default()).await;
        assert!(err.is_err());
        // Exactly one retry; never more.
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 2);
    }
}
