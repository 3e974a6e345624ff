//! Rate Limiter
//!
//! Per-key counting over a rolling window. Buckets are created lazily, rolled
//! over when their window elapses, and swept periodically. Keys are fully
//! independent of one another.

use crate::error::{KeygateError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

/// Rate-limit policy: request count over a human-readable window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub requests: u32,

    /// Window duration string (`"30s"`, `"5m"`, `"1h"`, `"1d"`)
    pub window: String,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests: 100,
            window: "1h".to_string(),
        }
    }
}

impl RateLimitPolicy {
    /// Parse the window string to a duration; invalid strings fail fast
    pub fn window_duration(&self) -> Result<std::time::Duration> {
        humantime::parse_duration(&self.window).map_err(|e| {
            KeygateError::Configuration(format!(
                "Invalid rate-limit window '{}': {}",
                self.window, e
            ))
        })
    }
}

/// Outcome of a single `check` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Allowance remaining in the current window
    pub remaining: u32,

    /// The configured per-window limit
    pub limit: u32,

    /// When the current window rolls over
    pub reset_at: DateTime<Utc>,

    /// Milliseconds until reset; populated only on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
}

#[derive(Debug)]
struct Bucket {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Per-key rolling-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: chrono::Duration,
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Build a limiter from a policy; invalid window strings error
    pub fn new(policy: &RateLimitPolicy) -> Result<Self> {
        let window = policy.window_duration()?;
        let window = chrono::Duration::from_std(window).map_err(|e| {
            KeygateError::Configuration(format!("Rate-limit window out of range: {}", e))
        })?;
        Ok(Self {
            limit: policy.requests,
            window,
            buckets: Arc::new(RwLock::new(HashMap::new())),
            sweeper: std::sync::Mutex::new(None),
        })
    }

    /// Record an attempt for `key` and decide whether it is allowed
    ///
    /// Lazily creates the bucket, rolls the window when it has elapsed, and
    /// counts the attempt even when denying; a denial never rewinds the
    /// counter.
    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now = Utc::now();
        let mut buckets = self.buckets.write().await;

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            count: 0,
            reset_at: now + self.window,
        });

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + self.window;
        }

        bucket.count = bucket.count.saturating_add(1);

        if bucket.count <= self.limit {
            RateLimitDecision {
                allowed: true,
                remaining: self.limit - bucket.count,
                limit: self.limit,
                reset_at: bucket.reset_at,
                retry_after: None,
            }
        } else {
            let retry_after = (bucket.reset_at - now).num_milliseconds().max(1);
            debug!(key, retry_after, "rate limit exceeded");
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                limit: self.limit,
                reset_at: bucket.reset_at,
                retry_after: Some(retry_after),
            }
        }
    }

    /// Clear one key's bucket, restoring its full allowance
    pub async fn reset(&self, key: &str) {
        self.buckets.write().await.remove(key);
    }

    /// Number of live buckets
    pub async fn size(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Spawn the periodic sweep of expired buckets
    ///
    /// The sweep shares the bucket lock with request handling, so it
    /// interleaves safely with concurrent `check` calls. Calling this more
    /// than once replaces the previous sweeper.
    pub fn spawn_sweeper(&self, every: std::time::Duration) {
        let buckets = Arc::clone(&self.buckets);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let mut map = buckets.write().await;
                let before = map.len();
                map.retain(|_, b| b.reset_at > now);
                let swept = before - map.len();
                if swept > 0 {
                    debug!(swept, "swept expired rate-limit buckets");
                }
            }
        });
        let mut guard = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = guard.replace(handle) {
            old.abort();
        }
    }

    /// Clear every bucket and halt the periodic sweep
    ///
    /// Subsequent `size` calls report zero.
    pub async fn destroy(&self) {
        {
            let mut guard = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        self.buckets.write().await.clear();
    }
}
