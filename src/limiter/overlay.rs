//! Rate-Limiting Overlay
//!
//! Decorator that gates every capability call of a wrapped [`Driver`]
//! through one admission point, delaying callers that exceed the budget.

use crate::config::RateLimitSettings;
use crate::driver::{Driver, JsonMap, Params, PostResponse, TextResponse};
use crate::error::{Result, TransportError};
use crate::limiter::window::{RateWindow, WindowPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Requests per period used by [`RateLimited::with_defaults`]
pub const DEFAULT_REQUESTS_PER_PERIOD: u32 = 3;

/// Period used by [`RateLimited::with_defaults`]
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// A driver whose calls are admitted at most `capacity` times per `period`
pub struct RateLimited<D> {
    inner: D,

    /// Held across the admission delay; tokio's mutex queues waiters FIFO
    window: Mutex<RateWindow>,
}

impl<D: Driver> RateLimited<D> {
    /// Admit `requests_per_period` calls per `period`, sliding window
    pub fn new(inner: D, requests_per_period: u32, period: Duration) -> Self {
        Self::with_policy(inner, requests_per_period, period, WindowPolicy::default())
    }

    /// Like [`new`](Self::new) with an explicit window policy
    pub fn with_policy(
        inner: D,
        requests_per_period: u32,
        period: Duration,
        policy: WindowPolicy,
    ) -> Self {
        Self {
            inner,
            window: Mutex::new(RateWindow::new(requests_per_period, period, policy)),
        }
    }

    /// Three requests per second
    pub fn with_defaults(inner: D) -> Self {
        Self::new(inner, DEFAULT_REQUESTS_PER_PERIOD, DEFAULT_PERIOD)
    }

    pub fn from_settings(inner: D, settings: &RateLimitSettings) -> Self {
        Self::with_policy(
            inner,
            settings.requests_per_period,
            settings.period(),
            settings.policy,
        )
    }

    /// The wrapped driver
    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Wait until a call may proceed, or fail if the wrapped driver closes first
    async fn admit(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Err(TransportError::Closed.into());
        }

        tokio::select! {
            biased;
            _ = self.inner.closed() => {
                debug!("driver closed while waiting for admission");
                Err(TransportError::Closed.into())
            }
            _ = self.acquire() => Ok(()),
        }
    }

    async fn acquire(&self) {
        let mut window = self.window.lock().await;
        while let Some(wait) = window.try_admit(Instant::now()) {
            debug!(
                wait_ms = wait.as_millis() as u64,
                capacity = window.capacity(),
                "rate limit reached, delaying request"
            );
            tokio::time::sleep(wait).await;
        }
        trace!(admitted = window.count(), "request admitted");
    }
}

#[async_trait]
impl<D: Driver> Driver for RateLimited<D> {
    async fn fetch_json(&self, url: &str, params: &Params) -> Result<JsonMap> {
        self.admit().await?;
        self.inner.fetch_json(url, params).await
    }

    async fn fetch_text(&self, url: &str, params: &Params) -> Result<TextResponse> {
        self.admit().await?;
        self.inner.fetch_text(url, params).await
    }

    async fn fetch_binary(&self, url: &str, params: &Params) -> Result<Bytes> {
        self.admit().await?;
        self.inner.fetch_binary(url, params).await
    }

    async fn post_text(&self, url: &str, data: &Params) -> Result<PostResponse> {
        self.admit().await?;
        self.inner.post_text(url, data).await
    }

    fn close(&self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn closed(&self) {
        self.inner.closed().await
    }
}
