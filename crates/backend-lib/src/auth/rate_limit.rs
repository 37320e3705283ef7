// ============================
// crates/backend-lib/src/auth/rate_limit.rs
// ============================
//! Fixed-window rate limiting for verifier issuance.
//!
//! Each identity (an email address) gets a window that opens on its first
//! request. Requests inside the window are counted and denied once the count
//! exceeds the maximum. The first request after the window has elapsed opens
//! a fresh window with a count of one. A burst of up to twice the maximum is
//! possible across a window boundary.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::metrics::AUTH_RATE_LIMITED;
use crate::storage::{with_timeout, RateLimitStore};

/// Outcome of counting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

impl RateLimitDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

/// Counter state for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Window start, unix millis
    pub start: i64,
    /// Requests counted in the current window
    pub count: u32,
}

impl RateLimitEntry {
    /// An open window with nothing counted yet
    pub fn opened_at(now: DateTime<Utc>) -> Self {
        Self {
            start: now.timestamp_millis(),
            count: 0,
        }
    }

    pub fn window_elapsed(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        now.timestamp_millis().saturating_sub(self.start) >= window_ms
    }

    /// Count one request at `now`.
    ///
    /// Callers must hold exclusive access to the entry for the whole call.
    pub fn record(&mut self, now: DateTime<Utc>, window: Duration, max: u32) -> RateLimitDecision {
        if self.window_elapsed(now, window) {
            *self = Self::opened_at(now);
        }
        self.count = self.count.saturating_add(1);

        if self.count > max {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}

/// Rate limiter backed by a [`RateLimitStore`]
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    max_requests: u32,
    window: Duration,
    timeout: Duration,
}

impl RateLimiter {
    /** Create a rate limiter
    # Arguments
    * `store` - where the counters live
    * `max_requests` - requests allowed per window
    * `window` - window length
    * `timeout` - bound on each store call */
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        max_requests: u32,
        window: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            max_requests,
            window,
            timeout,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request for `key` and report whether it may proceed
    pub async fn allow(
        &self,
        key: &str,
        max: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let decision = with_timeout(
            self.timeout,
            self.store.increment_or_reset(key, window, max, now),
        )
        .await
        .map_err(AppError::from)?;

        if !decision.is_allowed() {
            tracing::debug!(key = %key, "rate limit exceeded");
            counter!(AUTH_RATE_LIMITED).increment(1);
        }
        Ok(decision.is_allowed())
    }

    /// Count a request against the configured limit
    pub async fn check(&self, key: &str, now: DateTime<Utc>) -> AppResult<bool> {
        self.allow(key, self.max_requests, self.window, now).await
    }

    /// Drop counters whose window has elapsed
    pub async fn cleanup(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let purged = with_timeout(self.timeout, self.store.purge_expired(self.window, now)).await?;
        if purged > 0 {
            tracing::debug!(purged, "purged expired rate limit entries");
        }
        Ok(purged)
    }
}
