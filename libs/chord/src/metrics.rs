use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters the node emits while serving traffic: one event per inbound
/// message, one per lookup that traverses the local state machine.
///
/// Snapshot formatting and persistence are the operator's concern; the node
/// only counts.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    messages: AtomicU64,
    lookups: AtomicU64,
    lookup_latency_micros: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.inner.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup(&self, latency: Duration) {
        self.inner.lookups.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lookup_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn message_count(&self) -> u64 {
        self.inner.messages.load(Ordering::Relaxed)
    }

    pub fn lookup_count(&self) -> u64 {
        self.inner.lookups.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let lookups = self.lookup_count();
        let total_micros = self.inner.lookup_latency_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            messages: self.message_count(),
            lookups,
            avg_lookup_latency: (lookups > 0)
                .then(|| Duration::from_micros(total_micros / lookups)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub lookups: u64,
    pub avg_lookup_latency: Option<Duration>,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages={} lookups={} avg_lookup_latency={}",
            self.messages,
            self.lookups,
            match self.avg_lookup_latency {
                Some(latency) => format!("{:?}", latency),
                None => "n/a".to_string(),
            }
        )
    }
}
