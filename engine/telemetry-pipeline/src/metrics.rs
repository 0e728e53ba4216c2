// Metrics collection for the telemetry pipeline

use crate::coordinator::PipelineStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the ingest path and the background tasks
#[derive(Debug)]
pub struct MetricsCollector {
    // Ingest path
    pub events_ingested_total: AtomicCounter,
    pub events_admitted_total: AtomicCounter,
    pub events_sampled_out_total: AtomicCounter,
    pub buffer_full_total: AtomicCounter,
    pub events_too_far_ahead_total: AtomicCounter,

    // Flush path
    pub flush_cycles_total: AtomicCounter,
    pub batches_written_total: AtomicCounter,
    pub events_written_total: AtomicCounter,
    pub sink_failures_total: AtomicCounter,
    pub flush_latency_us: AtomicHistogram,

    // Data loss
    pub batches_dropped_total: AtomicCounter,
    pub events_lost_total: AtomicCounter,

    // Real-time side
    pub realtime_push_failures_total: AtomicCounter,
    pub windows_evicted_total: AtomicCounter,

    pub uptime_start: Instant,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            events_ingested_total: AtomicCounter::new(),
            events_admitted_total: AtomicCounter::new(),
            events_sampled_out_total: AtomicCounter::new(),
            buffer_full_total: AtomicCounter::new(),
            events_too_far_ahead_total: AtomicCounter::new(),
            flush_cycles_total: AtomicCounter::new(),
            batches_written_total: AtomicCounter::new(),
            events_written_total: AtomicCounter::new(),
            sink_failures_total: AtomicCounter::new(),
            // 1ms buckets up to 10s
            flush_latency_us: AtomicHistogram::with_buckets(10_000, 1_000),
            batches_dropped_total: AtomicCounter::new(),
            events_lost_total: AtomicCounter::new(),
            realtime_push_failures_total: AtomicCounter::new(),
            windows_evicted_total: AtomicCounter::new(),
            uptime_start: Instant::now(),
        }
    }

    /// Get current uptime
    pub fn uptime(&self) -> std::time::Duration {
        self.uptime_start.elapsed()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe atomic counter
#[derive(Debug)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe atomic histogram for latency tracking
#[derive(Debug)]
pub struct AtomicHistogram {
    buckets: Vec<AtomicU64>,
    bucket_size: u64,
    max_value: u64,
}

impl AtomicHistogram {
    pub fn with_buckets(bucket_count: usize, bucket_size: u64) -> Self {
        let buckets = (0..bucket_count.max(1)).map(|_| AtomicU64::new(0)).collect();

        Self { buckets, bucket_size: bucket_size.max(1), max_value: (bucket_count as u64) * bucket_size }
    }

    pub fn record(&self, value: u64) {
        let bucket_index = if value >= self.max_value {
            self.buckets.len() - 1
        } else {
            (value / self.bucket_size) as usize
        };

        if let Some(bucket) = self.buckets.get(bucket_index) {
            bucket.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(|bucket| bucket.load(Ordering::Relaxed)).sum()
    }

    /// Lower bound of the bucket holding the `p`th percentile
    pub fn percentile(&self, p: f64) -> u64 {
        let total = self.total_count();
        if total == 0 {
            return 0;
        }

        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut count = 0;

        for (i, bucket) in self.buckets.iter().enumerate() {
            count += bucket.load(Ordering::Relaxed);
            if count >= target {
                return (i as u64) * self.bucket_size;
            }
        }

        self.max_value
    }
}

/// Read-only view of pipeline health
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub status: PipelineStatus,
    pub buffered_events: usize,
    pub retry_queue_batches: usize,
    pub retry_queue_events: usize,
    pub windows_retained: usize,
    pub events_ingested_total: u64,
    pub events_admitted_total: u64,
    pub events_sampled_out_total: u64,
    pub buffer_full_total: u64,
    pub events_too_far_ahead_total: u64,
    pub flush_cycles_total: u64,
    pub batches_written_total: u64,
    pub events_written_total: u64,
    pub sink_failures_total: u64,
    pub batches_dropped_total: u64,
    pub events_lost_total: u64,
    pub realtime_push_failures_total: u64,
    pub windows_evicted_total: u64,
    pub flush_latency_p50_us: u64,
    pub flush_latency_p99_us: u64,
    pub uptime_seconds: u64,
}

impl MetricsCollector {
    /// Counter half of a stats snapshot; the coordinator fills in live gauges
    pub fn get_stats(&self, status: PipelineStatus) -> PipelineStats {
        PipelineStats {
            status,
            buffered_events: 0,
            retry_queue_batches: 0,
            retry_queue_events: 0,
            windows_retained: 0,
            events_ingested_total: self.events_ingested_total.get(),
            events_admitted_total: self.events_admitted_total.get(),
            events_sampled_out_total: self.events_sampled_out_total.get(),
            buffer_full_total: self.buffer_full_total.get(),
            events_too_far_ahead_total: self.events_too_far_ahead_total.get(),
            flush_cycles_total: self.flush_cycles_total.get(),
            batches_written_total: self.batches_written_total.get(),
            events_written_total: self.events_written_total.get(),
            sink_failures_total: self.sink_failures_total.get(),
            batches_dropped_total: self.batches_dropped_total.get(),
            events_lost_total: self.events_lost_total.get(),
            realtime_push_failures_total: self.realtime_push_failures_total.get(),
            windows_evicted_total: self.windows_evicted_total.get(),
            flush_latency_p50_us: self.flush_latency_us.percentile(50.0),
            flush_latency_p99_us: self.flush_latency_us.percentile(99.0),
            uptime_seconds: self.uptime().as_secs(),
        }
    }
}
