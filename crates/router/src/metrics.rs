//! Lock-free counters and histograms for the operation managers.

use common::{RequestKind, RouterError, RouterErrorCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Count, sum and max of recorded values.
#[derive(Debug, Default)]
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    pub fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            sum,
            max: self.max.load(Ordering::Relaxed),
            mean: if count == 0 {
                0.0
            } else {
                sum as f64 / count as f64
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub max: u64,
    pub mean: f64,
}

/// Signals for one request kind.
#[derive(Debug, Default)]
pub struct KindMetrics {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub ignored_responses: AtomicU64,
    pub aborted: AtomicU64,
    pub latency_ms: Histogram,
    pub poll_time_us: Histogram,
    pub handle_response_time_us: Histogram,
}

impl KindMetrics {
    fn snapshot(&self) -> KindSnapshot {
        KindSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ignored_responses: self.ignored_responses.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            latency_ms: self.latency_ms.snapshot(),
            poll_time_us: self.poll_time_us.snapshot(),
            handle_response_time_us: self.handle_response_time_us.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub ignored_responses: u64,
    pub aborted: u64,
    pub latency_ms: HistogramSnapshot,
    pub poll_time_us: HistogramSnapshot,
    pub handle_response_time_us: HistogramSnapshot,
}

#[derive(Debug, Default)]
pub struct RouterMetrics {
    put: KindMetrics,
    get: KindMetrics,
    delete: KindMetrics,
    errors: [AtomicU64; RouterErrorCode::ALL.len()],
    callback_panics: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self, kind: RequestKind) -> &KindMetrics {
        match kind {
            RequestKind::Put => &self.put,
            RequestKind::Get => &self.get,
            RequestKind::Delete => &self.delete,
        }
    }

    pub fn record_submitted(&self, kind: RequestKind) {
        self.kind(kind).submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self, kind: RequestKind, latency: Duration, error: Option<&RouterError>) {
        let metrics = self.kind(kind);
        metrics.completed.fetch_add(1, Ordering::Relaxed);
        metrics
            .latency_ms
            .record(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX));
        if let Some(error) = error {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            self.errors[error.code().index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_poll_time(&self, kind: RequestKind, elapsed: Duration) {
        self.kind(kind).poll_time_us.record(micros(elapsed));
    }

    pub fn record_handle_response_time(&self, kind: RequestKind, elapsed: Duration) {
        self.kind(kind).handle_response_time_us.record(micros(elapsed));
    }

    pub fn record_ignored_response(&self, kind: RequestKind) {
        self.kind(kind).ignored_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self, kind: RequestKind) {
        self.kind(kind).aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error_count(&self, code: RouterErrorCode) -> u64 {
        self.errors[code.index()].load(Ordering::Relaxed)
    }

    pub fn callback_panics(&self) -> u64 {
        self.callback_panics.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: RequestKind::ALL
                .iter()
                .map(|kind| (kind.as_str().to_string(), self.kind(*kind).snapshot()))
                .collect(),
            errors: RouterErrorCode::ALL
                .iter()
                .map(|code| (code.to_string(), self.error_count(*code)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            callback_panics: self.callback_panics(),
        }
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub operations: BTreeMap<String, KindSnapshot>,
    pub errors: BTreeMap<String, u64>,
    pub callback_panics: u64,
}

impl MetricsSnapshot {
    pub fn operation(&self, kind: RequestKind) -> Option<&KindSnapshot> {
        self.operations.get(kind.as_str())
    }
}
