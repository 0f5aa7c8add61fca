use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::network_throttler::NetworkThrottler;
use crate::queue::{Processor, TaskResult};

/// Runs an inner processor through a `NetworkThrottler`, using the payload
/// itself as the request URL.
pub struct ThrottledProcessor<P, R> {
    inner: Arc<dyn Processor<P, R>>,
    throttler: Arc<NetworkThrottler>,
    method: String,
    priority: i32,
    max_retries: u32,
    _marker: PhantomData<fn() -> R>,
}

impl<P, R> ThrottledProcessor<P, R> {
    pub fn new(inner: Arc<dyn Processor<P, R>>, throttler: Arc<NetworkThrottler>) -> Self {
        Self {
            inner,
            throttler,
            method: "GET".to_string(),
            priority: 0,
            max_retries: 0,
            _marker: PhantomData,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Throttler-level retries, on top of the queue's own attempt budget
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl<P, R> Processor<P, R> for ThrottledProcessor<P, R>
where
    P: AsRef<str> + Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    async fn process(&self, payload: P) -> TaskResult<R> {
        let url = payload.as_ref().to_string();
        let result = self
            .throttler
            .throttle_request(
                || self.inner.process(payload.clone()),
                &url,
                &self.method,
                self.priority,
                self.max_retries,
            )
            .await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BoxError;
    use crate::throttle::ThrottleConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_payload_becomes_request_url() {
        let throttler = Arc::new(NetworkThrottler::new(ThrottleConfig {
            delay_between_requests: Duration::ZERO,
            ..Default::default()
        }));
        let inner: Arc<dyn Processor<String, usize>> =
            Arc::new(|url: String| async move { Ok::<_, BoxError>(url.len()) });
        let processor = ThrottledProcessor::new(inner, throttler.clone()).method("HEAD");

        let len = processor.process("https://example.com".to_string()).await.unwrap();
        assert_eq!(len, 19);

        let history = throttler.get_request_history();
        assert_eq!(history[0].url, "https://example.com");
        assert_eq!(history[0].method, "HEAD");
    }

    #[tokio::test]
    async fn test_exhausted_request_is_a_processor_error() {
        let throttler = Arc::new(NetworkThrottler::new(ThrottleConfig {
            delay_between_requests: Duration::ZERO,
            ..Default::default()
        }));
        let inner: Arc<dyn Processor<String, usize>> =
            Arc::new(|_url: String| async move { Err::<usize, BoxError>("dns failure".into()) });
        let processor = ThrottledProcessor::new(inner, throttler);

        let err = processor.process("https://nowhere.invalid".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("dns failure"));
    }
}
