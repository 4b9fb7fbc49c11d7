//! Search and retrieval latency records with percentile summaries.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;

pub const DEFAULT_MAX_RECORDS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchMetric {
    pub timestamp: SystemTime,
    pub latency: Duration,
    pub result_count: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalMetric {
    pub timestamp: SystemTime,
    pub latency: Duration,
    pub context_size: usize,
    pub cache_hit: bool,
}

impl SearchMetric {
    #[must_use]
    pub fn now(latency: Duration, result_count: usize, cache_hit: bool) -> Self {
        Self {
            timestamp: SystemTime::now(),
            latency,
            result_count,
            cache_hit,
        }
    }
}

impl RetrievalMetric {
    #[must_use]
    pub fn now(latency: Duration, context_size: usize, cache_hit: bool) -> Self {
        Self {
            timestamp: SystemTime::now(),
            latency,
            context_size,
            cache_hit,
        }
    }
}

/// Both metric streams, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MetricsLog {
    pub searches: VecDeque<SearchMetric>,
    pub retrievals: VecDeque<RetrievalMetric>,
}

impl MetricsLog {
    #[must_use]
    pub fn len(&self) -> usize {
        self.searches.len() + self.retrievals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the oldest records from both streams in proportion to their
    /// size until at most `max_records` remain.
    fn trim(&mut self, max_records: usize) {
        let total = self.len();
        if total <= max_records {
            return;
        }
        let excess = total - max_records;
        let searches = self.searches.len();
        let retrievals = self.retrievals.len();
        let mut from_searches = (excess * searches + total / 2) / total;
        let mut from_retrievals = excess - from_searches.min(excess);
        if from_retrievals > retrievals {
            from_searches += from_retrievals - retrievals;
            from_retrievals = retrievals;
        }
        from_searches = from_searches.min(searches);
        self.searches.drain(..from_searches);
        self.retrievals.drain(..from_retrievals);
    }
}

/// Aggregate over one metric stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub cache_hit_rate: f64,
    /// Mean result count (searches) or context size (retrievals).
    pub mean_size: f64,
}

/// Value at sorted index `floor(n * p)`, clamped to the last element.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[allow(clippy::cast_precision_loss)]
fn summarize(records: impl Iterator<Item = (Duration, usize, bool)>) -> LatencyStats {
    let mut latencies = Vec::new();
    let mut hits = 0usize;
    let mut size_total = 0usize;
    for (latency, size, hit) in records {
        latencies.push(latency.as_secs_f64() * 1000.0);
        size_total += size;
        hits += usize::from(hit);
    }
    let count = latencies.len();
    if count == 0 {
        return LatencyStats::default();
    }
    latencies.sort_by(f64::total_cmp);
    let n = count as f64;
    LatencyStats {
        count,
        mean_ms: latencies.iter().sum::<f64>() / n,
        p95_ms: percentile(&latencies, 0.95),
        p99_ms: percentile(&latencies, 0.99),
        cache_hit_rate: hits as f64 / n,
        mean_size: size_total as f64 / n,
    }
}

/// Single-writer metrics sink; readers observe snapshots through the
/// returned watch receiver.
pub struct MetricsCollector {
    tx: watch::Sender<MetricsLog>,
    max_records: usize,
}

impl MetricsCollector {
    #[must_use]
    pub fn new(max_records: usize) -> (Self, watch::Receiver<MetricsLog>) {
        let (tx, rx) = watch::channel(MetricsLog::default());
        (
            Self {
                tx,
                max_records: max_records.max(1),
            },
            rx,
        )
    }

    pub fn record_search(&self, metric: SearchMetric) {
        let max = self.max_records;
        self.tx.send_modify(|log| {
            log.searches.push_back(metric);
            log.trim(max);
        });
    }

    pub fn record_retrieval(&self, metric: RetrievalMetric) {
        let max = self.max_records;
        self.tx.send_modify(|log| {
            log.retrievals.push_back(metric);
            log.trim(max);
        });
    }

    #[must_use]
    pub fn search_stats(&self) -> LatencyStats {
        let log = self.tx.borrow();
        summarize(
            log.searches
                .iter()
                .map(|m| (m.latency, m.result_count, m.cache_hit)),
        )
    }

    #[must_use]
    pub fn retrieval_stats(&self) -> LatencyStats {
        let log = self.tx.borrow();
        summarize(
            log.retrievals
                .iter()
                .map(|m| (m.latency, m.context_size, m.cache_hit)),
        )
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsLog {
        self.tx.borrow().clone()
    }

    pub fn clear(&self) {
        self.tx.send_modify(|log| {
            log.searches.clear();
            log.retrievals.clear();
        });
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS).0
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("max_records", &self.max_records)
            .field("records", &self.tx.borrow().len())
            .finish()
    }
}
