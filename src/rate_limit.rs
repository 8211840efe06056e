//! Sliding-window admission control, keyed by client.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;

use crate::config::RateLimitConfig;

/// Key used when a request carries no `X-Forwarded-For` header.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Counts admissions per key over a trailing window.
///
/// A request is admitted while fewer than `max_requests` admissions for its key
/// fall inside the last `window`, inclusive of a stamp exactly `window` old.
/// Denied requests leave no trace. Every call sweeps expired stamps from all
/// keys, so the map only ever holds clients active within the last window.
pub struct SlidingWindowLimiter {
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        entries.retain(|_, stamps| {
            while stamps
                .front()
                .is_some_and(|t| now.saturating_duration_since(*t) > self.window)
            {
                stamps.pop_front();
            }
            !stamps.is_empty()
        });

        let count = entries.get(key).map_or(0, |s| s.len());
        if count >= self.max_requests {
            return false;
        }

        entries.entry(key.to_string()).or_default().push_back(now);
        true
    }

    /// Number of keys with live entries.
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// First `X-Forwarded-For` hop, or [`ANONYMOUS_CLIENT`].
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}
