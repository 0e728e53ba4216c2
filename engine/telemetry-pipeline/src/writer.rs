//! # Batch Writer
//!
//! Delivers drained batches to the durable sink, keeps failed batches for the
//! next flush cycle and forwards window snapshots to an optional real-time sink.

use crate::aggregator::TimeWindowSnapshot;
use crate::buffer::Batch;
use crate::error::{PipelineError, Result, SinkError};
use crate::event::Event;
use crate::metrics::MetricsCollector;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Authoritative store for events
#[async_trait::async_trait]
pub trait DurableSink: Send + Sync {
    /// Persist a batch of events.
    ///
    /// Retried batches are re-sent whole, so implementations should tolerate
    /// seeing the same event ids more than once.
    async fn write_events(&self, events: &[Event]) -> std::result::Result<(), SinkError>;
}

/// Best-effort live feed for dashboards
#[async_trait::async_trait]
pub trait RealtimeSink: Send + Sync {
    async fn push_window(&self, window: &TimeWindowSnapshot) -> std::result::Result<(), SinkError>;
}

/// Outcome of one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub retried_batches: usize,
    pub fresh_batches: usize,
    pub events_written: usize,
}

/// A `write` that stopped early
#[derive(Debug)]
pub struct WriteFailure {
    /// Batches delivered before the failing one
    pub partial: WriteReport,
    pub error: PipelineError,
}

/// Writes batches with a bounded FIFO retry queue
pub struct BatchWriter {
    durable: Arc<dyn DurableSink>,
    realtime: Option<Arc<dyn RealtimeSink>>,
    retry_queue: Mutex<VecDeque<Batch>>,
    retry_capacity: usize,
    write_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl BatchWriter {
    pub fn new(
        durable: Arc<dyn DurableSink>,
        realtime: Option<Arc<dyn RealtimeSink>>,
        retry_capacity: usize,
        write_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            durable,
            realtime,
            retry_queue: Mutex::new(VecDeque::with_capacity(retry_capacity)),
            retry_capacity,
            write_timeout,
            metrics,
        }
    }

    /// Deliver queued retries (oldest first), then `batch`.
    ///
    /// Callers must serialize calls; the coordinator holds its flush lock.
    /// On failure the report of what was already delivered is kept in
    /// [`WriteFailure::partial`].
    pub async fn write(&self, mut batch: Batch) -> std::result::Result<WriteReport, WriteFailure> {
        let mut report = WriteReport::default();

        loop {
            let next = self.retry_queue.lock().pop_front();
            let Some(mut pending) = next else {
                break;
            };

            match self.deliver(&pending).await {
                Ok(()) => {
                    tracing::info!(
                        "Retried batch of {} events delivered after {} failed attempts",
                        pending.len(),
                        pending.attempts()
                    );
                    report.retried_batches += 1;
                    report.events_written += pending.len();
                }
                Err(error) => {
                    pending.record_failure();
                    self.retry_queue.lock().push_front(pending);
                    // Never attempted, so its failure count stays as is
                    if !batch.is_empty() {
                        self.enqueue_retry(batch);
                    }
                    return Err(WriteFailure { partial: report, error });
                }
            }
        }

        if batch.is_empty() {
            return Ok(report);
        }

        match self.deliver(&batch).await {
            Ok(()) => {
                report.fresh_batches += 1;
                report.events_written += batch.len();
                Ok(report)
            }
            Err(error) => {
                batch.record_failure();
                self.enqueue_retry(batch);
                Err(WriteFailure { partial: report, error })
            }
        }
    }

    async fn deliver(&self, batch: &Batch) -> Result<()> {
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.write_timeout, self.durable.write_events(batch.events())).await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PipelineError::from(e)),
            Err(_) => Err(PipelineError::from(SinkError::Timeout(self.write_timeout))),
        };

        match &result {
            Ok(()) => {
                self.metrics.batches_written_total.inc();
                self.metrics.events_written_total.add(batch.len() as u64);
                self.metrics.flush_latency_us.record(started.elapsed().as_micros() as u64);
            }
            Err(e) => {
                self.metrics.sink_failures_total.inc();
                tracing::warn!("Durable write of {} events failed: {}", batch.len(), e);
            }
        }

        result
    }

    fn enqueue_retry(&self, batch: Batch) {
        let mut queue = self.retry_queue.lock();

        while queue.len() >= self.retry_capacity {
            let dropped = match queue.pop_front() {
                Some(oldest) => oldest,
                None => {
                    // Zero capacity: the failed batch itself is the loss
                    self.record_loss(batch.len());
                    return;
                }
            };
            self.record_loss(dropped.len());
        }

        queue.push_back(batch);
    }

    fn record_loss(&self, dropped_events: usize) {
        self.metrics.batches_dropped_total.inc();
        self.metrics.events_lost_total.add(dropped_events as u64);
        tracing::error!(
            "{} (total events lost: {})",
            PipelineError::RetryQueueFull { dropped_events },
            self.metrics.events_lost_total.get()
        );
    }

    /// Push windows to the real-time sink on a detached task.
    ///
    /// The caller never waits on the sink; failures are logged and counted,
    /// never retried. Returns `None` when there is nothing to push.
    pub fn publish(&self, windows: Vec<TimeWindowSnapshot>) -> Option<JoinHandle<()>> {
        let realtime = self.realtime.clone()?;
        if windows.is_empty() {
            return None;
        }
        let metrics = self.metrics.clone();
        let timeout = self.write_timeout;

        Some(tokio::spawn(async move {
            for window in &windows {
                let failure = match tokio::time::timeout(timeout, realtime.push_window(window)).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e,
                    Err(_) => SinkError::Timeout(timeout),
                };
                metrics.realtime_push_failures_total.inc();
                tracing::warn!("Real-time push for window {} failed: {}", window.bucket_key, failure);
            }
        }))
    }

    pub fn pending_batches(&self) -> usize {
        self.retry_queue.lock().len()
    }

    pub fn pending_events(&self) -> usize {
        self.retry_queue.lock().iter().map(Batch::len).sum()
    }
}
