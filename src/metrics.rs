//! Request outcome aggregation for `GET /metrics`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The terminal result of one chat or upload request.
///
/// `success` is false only for server-side failures. A request refused for
/// a client error is a success that still carries its `error` text.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub endpoint: &'static str,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
    /// Top-ranked source document, or the uploaded document.
    pub document_id: Option<String>,
    /// Estimated embedding tokens spent by this request.
    pub tokens_used: Option<u64>,
    /// Embedding provider calls made by this request.
    pub embedding_calls: u64,
}

impl Outcome {
    pub fn success(endpoint: &'static str, duration: Duration) -> Self {
        Self {
            endpoint,
            duration,
            success: true,
            error: None,
            document_id: None,
            tokens_used: None,
            embedding_calls: 0,
        }
    }

    /// A request turned away for a client error (bad input, nothing indexed).
    /// Counted and timed, but not a failure.
    pub fn rejected(endpoint: &'static str, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::success(endpoint, duration)
        }
    }

    pub fn failure(endpoint: &'static str, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            endpoint,
            duration,
            success: false,
            error: Some(error.into()),
            document_id: None,
            tokens_used: None,
            embedding_calls: 0,
        }
    }

    pub fn with_document(mut self, document_id: Option<String>) -> Self {
        self.document_id = document_id;
        self
    }

    pub fn with_embedding(mut self, tokens: u64, calls: u64) -> Self {
        self.tokens_used = Some(tokens);
        self.embedding_calls = calls;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingUsage {
    pub total_tokens: u64,
    pub total_calls: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    /// `(total - failed) / total`; `None` before the first request.
    pub success_rate: Option<f64>,
    pub document_access: BTreeMap<String, u64>,
    pub embedding: EmbeddingUsage,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    fn empty() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            average_latency_ms: 0.0,
            success_rate: None,
            document_access: BTreeMap::new(),
            embedding: EmbeddingUsage::default(),
            last_error: None,
            started_at: Utc::now(),
        }
    }
}

pub struct MetricsAggregator {
    state: Mutex<MetricsSnapshot>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsSnapshot::empty()),
        }
    }

    pub fn record(&self, outcome: &Outcome) {
        let latency_ms = outcome.duration.as_secs_f64() * 1000.0;

        {
            let mut m = self.state.lock().unwrap_or_else(|e| e.into_inner());
            m.total_requests += 1;
            let n = m.total_requests as f64;
            m.average_latency_ms = (m.average_latency_ms * (n - 1.0) + latency_ms) / n;

            if !outcome.success {
                m.failed_requests += 1;
                m.last_error = outcome.error.clone();
            }
            if let Some(doc) = &outcome.document_id {
                *m.document_access.entry(doc.clone()).or_insert(0) += 1;
            }
            m.embedding.total_tokens += outcome.tokens_used.unwrap_or(0);
            m.embedding.total_calls += outcome.embedding_calls;
            m.success_rate =
                Some((m.total_requests - m.failed_requests) as f64 / m.total_requests as f64);
        }

        if !outcome.success {
            tracing::warn!(
                endpoint = outcome.endpoint,
                latency_ms,
                error = outcome.error.as_deref(),
                "request failed"
            );
        } else if let Some(error) = outcome.error.as_deref() {
            tracing::info!(
                endpoint = outcome.endpoint,
                latency_ms,
                error,
                "request rejected"
            );
        } else {
            tracing::info!(
                endpoint = outcome.endpoint,
                latency_ms,
                document_id = outcome.document_id.as_deref(),
                tokens = outcome.tokens_used,
                embedding_calls = outcome.embedding_calls,
                "request completed"
            );
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_running_average() {
        let metrics = MetricsAggregator::new();
        for v in [100, 200, 300] {
            metrics.record(&Outcome::success("chat", ms(v)));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert!((snap.average_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(snap.success_rate, Some(1.0));
    }

    #[test]
    fn test_success_rate_and_last_error() {
        let metrics = MetricsAggregator::new();
        assert_eq!(metrics.snapshot().success_rate, None);

        metrics.record(&Outcome::success("chat", ms(10)));
        metrics.record(&Outcome::success("chat", ms(10)));
        metrics.record(&Outcome::success("upload", ms(10)));
        metrics.record(&Outcome::failure("chat", ms(10), "completion failed: timeout"));

        let snap = metrics.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.success_rate, Some(0.75));
        assert_eq!(snap.last_error.as_deref(), Some("completion failed: timeout"));
    }

    #[test]
    fn test_document_access_and_embedding_usage() {
        let metrics = MetricsAggregator::new();
        metrics.record(
            &Outcome::success("upload", ms(5))
                .with_document(Some("doc1".into()))
                .with_embedding(120, 3),
        );
        metrics.record(&Outcome::success("chat", ms(5)).with_document(Some("doc1".into())));
        metrics.record(&Outcome::success("chat", ms(5)).with_embedding(4, 1));

        let snap = metrics.snapshot();
        assert_eq!(snap.document_access.get("doc1"), Some(&2));
        assert_eq!(snap.embedding.total_tokens, 124);
        assert_eq!(snap.embedding.total_calls, 4);
    }

    #[test]
    fn test_rejections_are_not_failures() {
        let metrics = MetricsAggregator::new();
        metrics.record(&Outcome::rejected("chat", ms(20), "message is required"));
        metrics.record(&Outcome::rejected("upload", ms(40), "no file uploaded"));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.failed_requests, 0);
        assert_eq!(snap.success_rate, Some(1.0));
        assert!(snap.last_error.is_none());
        assert!((snap.average_latency_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(MetricsAggregator::new().snapshot()).unwrap();
        assert!(json.get("totalRequests").is_some());
        assert!(json.get("averageLatencyMs").is_some());
        assert!(json["successRate"].is_null());
        assert!(json["embedding"].get("totalCalls").is_some());
    }
}
