//! Retry decorator for remote sources
//!
//! [`Retrying`] wraps any [`RemoteSource`] and repeats requests that fail with
//! a transient error, sleeping with exponential backoff between attempts.
//! Non-transient errors pass through untouched; exhausting the attempt budget
//! turns the last transient error into [`RemoteError::GaveUp`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::remote::{
    ChatListPage, ChatListRequest, HistoryPage, HistoryRequest, RemoteError, RemoteSource,
};

/// Backoff schedule for transient remote failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// First delay
    pub base: Duration,
    /// Delays double up to this cap
    pub max: Duration,
    /// Total attempts, including the first one
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(policy: &BackoffPolicy) -> Self {
        Self {
            max: policy.max,
            current: policy.base,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }
}

/// A remote source that retries transient failures
#[derive(Debug, Clone)]
pub struct Retrying<R> {
    inner: R,
    policy: BackoffPolicy,
}

impl<R> Retrying<R> {
    /// Wrap `inner` with `policy`
    pub fn new(inner: R, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped source
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Active backoff policy
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, operation: &'static str, attempt: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = Backoff::new(&self.policy);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if attempts >= max_attempts {
                warn!(target: "postmirror::backfill", operation, attempts, error = %err, "Remote retries exhausted");
                return Err(RemoteError::GaveUp {
                    attempts,
                    last: err.to_string(),
                });
            }
            let mut delay = backoff.next_delay();
            if let RemoteError::RateLimited { retry_after_ms } = &err {
                delay = delay.max(Duration::from_millis(*retry_after_ms));
            }
            debug!(target: "postmirror::backfill", operation, attempts, delay_ms = delay.as_millis() as u64, error = %err, "Retrying remote request");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl<R: RemoteSource> RemoteSource for Retrying<R> {
    async fn fetch_history(&self, request: &HistoryRequest) -> Result<HistoryPage, RemoteError> {
        self.run("fetch_history", || self.inner.fetch_history(request))
            .await
    }

    async fn fetch_list_page(
        &self,
        request: &ChatListRequest,
    ) -> Result<ChatListPage, RemoteError> {
        self.run("fetch_list_page", || self.inner.fetch_list_page(request))
            .await
    }
}
