//! # Pipeline Coordinator
//!
//! Owns the pipeline lifecycle, the flush and rotation tasks, and the public
//! ingestion and query API.

use crate::aggregator::{RealtimeAggregator, RecordOutcome, TimeWindowSnapshot, WindowSummary};
use crate::buffer::BatchBuffer;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::event::Event;
use crate::metrics::{MetricsCollector, PipelineStats};
use crate::sampling::SamplingGate;
use crate::writer::{BatchWriter, DurableSink, RealtimeSink, WriteReport};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Stopped,
    Initializing,
    Running,
    Draining,
}

impl PipelineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineStatus::Initializing,
            2 => PipelineStatus::Running,
            3 => PipelineStatus::Draining,
            _ => PipelineStatus::Stopped,
        }
    }
}

/// What happened to an ingested event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Recorded in the current window and buffered for the next flush
    Accepted,
    /// Dropped by the sampling gate
    SampledOut,
}

/// Result of a graceful shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub final_write: Option<WriteReport>,
    pub timed_out: bool,
    /// Events not confirmed written when shutdown returned
    pub events_discarded: usize,
}

/// Components built from one `initialize` call
struct Pipeline {
    config: PipelineConfig,
    gate: SamplingGate,
    buffer: BatchBuffer,
    aggregator: RealtimeAggregator,
    writer: BatchWriter,
    flush_lock: Mutex<()>,
    flush_notify: Notify,
}

impl Pipeline {
    /// One flush cycle: drain, retry queued batches, write, publish newest window.
    ///
    /// The flush lock covers drain and write only; the real-time push runs
    /// detached after it is released.
    async fn flush_cycle(&self, metrics: &MetricsCollector) -> Result<WriteReport> {
        let (drained, outcome) = {
            let _guard = self.flush_lock.lock().await;
            metrics.flush_cycles_total.inc();

            let batch = self.buffer.drain_for_flush();
            (batch.len(), self.writer.write(batch).await)
        };

        let result = match outcome {
            Ok(report) => {
                if report.events_written > 0 {
                    tracing::debug!(
                        "Flush cycle wrote {} events ({} retried batches)",
                        report.events_written,
                        report.retried_batches
                    );
                }
                Ok(report)
            }
            Err(failure) => {
                tracing::warn!(
                    "Flush cycle failed after writing {} events, {} batches pending retry: {}",
                    failure.partial.events_written,
                    self.writer.pending_batches(),
                    failure.error
                );
                Err(failure.error)
            }
        };

        if drained > 0 {
            self.writer.publish(self.aggregator.snapshot(1));
        }

        result
    }
}

/// Background task handles for one run
struct Workers {
    stop: watch::Sender<bool>,
    flush: JoinHandle<()>,
    rotation: JoinHandle<()>,
}

/// Process-wide ingestion pipeline.
///
/// Construct one at the composition root and share the `Arc` with producers.
pub struct PipelineCoordinator {
    durable: Arc<dyn DurableSink>,
    realtime: Option<Arc<dyn RealtimeSink>>,
    metrics: Arc<MetricsCollector>,
    status: AtomicU8,

    // Some only while Running; ingest holds the read side for its whole call
    ingress: RwLock<Option<Arc<Pipeline>>>,
    // Last started pipeline, kept for queries after shutdown
    current: RwLock<Option<Arc<Pipeline>>>,

    lifecycle: Mutex<Option<Workers>>,
}

impl PipelineCoordinator {
    pub fn new(
        durable: Arc<dyn DurableSink>,
        realtime: Option<Arc<dyn RealtimeSink>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            durable,
            realtime,
            metrics: Arc::new(MetricsCollector::new()),
            status: AtomicU8::new(PipelineStatus::Stopped as u8),
            ingress: RwLock::new(None),
            current: RwLock::new(None),
            lifecycle: Mutex::new(None),
        })
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: PipelineStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Validate `config`, build the components and start both timers.
    ///
    /// A no-op while already running. Must be called from a tokio runtime.
    pub async fn initialize(&self, config: PipelineConfig) -> Result<()> {
        let mut workers = self.lifecycle.lock().await;

        match self.status() {
            PipelineStatus::Running => {
                tracing::debug!("Pipeline already running, ignoring initialize");
                return Ok(());
            }
            PipelineStatus::Draining => return Err(PipelineError::ShuttingDown),
            PipelineStatus::Stopped | PipelineStatus::Initializing => {}
        }

        config.validate()?;
        let rates = config.resolved_sampling_rates()?;
        tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        self.set_status(PipelineStatus::Initializing);
        tracing::info!(
            "Initializing telemetry pipeline: flush every {}ms or {} events, {}ms windows x{}",
            config.flush_interval_ms,
            config.flush_batch_size,
            config.bucket_width_ms,
            config.window_retention_count
        );

        let writer = BatchWriter::new(
            self.durable.clone(),
            self.realtime.clone(),
            config.retry_queue_capacity,
            config.sink_write_timeout(),
            self.metrics.clone(),
        );
        let pipeline = Arc::new(Pipeline {
            gate: SamplingGate::new(rates),
            buffer: BatchBuffer::new(config.buffer_capacity),
            aggregator: RealtimeAggregator::new(config.bucket_width_ms, config.window_retention_count)
                .with_max_future_skew(config.max_future_skew_ms),
            writer,
            flush_lock: Mutex::new(()),
            flush_notify: Notify::new(),
            config,
        });

        let (stop, stop_rx) = watch::channel(false);
        let flush = tokio::spawn(Self::run_flush_loop(
            pipeline.clone(),
            self.metrics.clone(),
            stop_rx.clone(),
        ));
        let rotation =
            tokio::spawn(Self::run_rotation_loop(pipeline.clone(), self.metrics.clone(), stop_rx));
        *workers = Some(Workers { stop, flush, rotation });

        *self.current.write() = Some(pipeline.clone());
        *self.ingress.write() = Some(pipeline);
        self.set_status(PipelineStatus::Running);

        tracing::info!("Telemetry pipeline running");
        Ok(())
    }

    /// Admit, record and buffer one event. Never blocks on I/O.
    ///
    /// `BufferFull` is returned after the event has already been counted in
    /// the real-time window; the caller decides whether to drop or flush.
    pub fn ingest(&self, event: Event) -> Result<IngestOutcome> {
        let ingress = self.ingress.read();
        let pipeline = ingress.as_ref().ok_or(PipelineError::PipelineNotRunning)?;

        self.metrics.events_ingested_total.inc();

        if !pipeline.gate.should_admit(event.event_type()) {
            self.metrics.events_sampled_out_total.inc();
            return Ok(IngestOutcome::SampledOut);
        }
        self.metrics.events_admitted_total.inc();

        match pipeline.aggregator.record(&event) {
            RecordOutcome::Recorded { evicted } => {
                self.metrics.windows_evicted_total.add(evicted as u64);
            }
            RecordOutcome::TooFarAhead => self.metrics.events_too_far_ahead_total.inc(),
        }

        match pipeline.buffer.append(event) {
            Ok(len) => {
                if len >= pipeline.config.flush_batch_size {
                    pipeline.flush_notify.notify_one();
                }
                Ok(IngestOutcome::Accepted)
            }
            Err(e) => {
                self.metrics.buffer_full_total.inc();
                pipeline.flush_notify.notify_one();
                Err(e)
            }
        }
    }

    /// Run a flush cycle now instead of waiting for a trigger
    pub async fn flush(&self) -> Result<WriteReport> {
        let pipeline = self.ingress.read().clone().ok_or(PipelineError::PipelineNotRunning)?;
        pipeline.flush_cycle(&self.metrics).await
    }

    /// Newest `count` windows, newest first
    pub fn get_realtime_metrics(&self, count: usize) -> Vec<TimeWindowSnapshot> {
        match self.current.read().as_ref() {
            Some(pipeline) => pipeline.aggregator.snapshot(count),
            None => Vec::new(),
        }
    }

    /// Newest `count` windows folded into one summary
    pub fn get_metric_summary(&self, count: usize) -> WindowSummary {
        match self.current.read().as_ref() {
            Some(pipeline) => pipeline.aggregator.summarize(count),
            None => WindowSummary::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let mut stats = self.metrics.get_stats(self.status());
        if let Some(pipeline) = self.current.read().as_ref() {
            stats.buffered_events = pipeline.buffer.len();
            stats.retry_queue_batches = pipeline.writer.pending_batches();
            stats.retry_queue_events = pipeline.writer.pending_events();
            stats.windows_retained = pipeline.aggregator.window_count();
        }
        stats
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Stop accepting events, stop the timers and make one final flush.
    ///
    /// Bounded by `shutdown_timeout_ms`. An in-flight write is left to finish
    /// in the background rather than aborted.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let mut workers = self.lifecycle.lock().await;

        if self.status() != PipelineStatus::Running {
            return Ok(ShutdownReport::default());
        }

        self.set_status(PipelineStatus::Draining);
        let Some(pipeline) = self.ingress.write().take() else {
            self.set_status(PipelineStatus::Stopped);
            return Ok(ShutdownReport::default());
        };
        tracing::info!("Draining telemetry pipeline ({} events buffered)", pipeline.buffer.len());

        let timeout = pipeline.config.shutdown_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        let pending_at_close = pipeline.buffer.len() + pipeline.writer.pending_events();
        let mut report = ShutdownReport::default();

        if let Some(w) = workers.take() {
            let _ = w.stop.send(true);
            let joined = tokio::time::timeout_at(deadline, async {
                let _ = w.flush.await;
                let _ = w.rotation.await;
            })
            .await;
            if joined.is_err() {
                report.timed_out = true;
            }
        }

        if !report.timed_out {
            // Spawned so a write still in flight at the deadline keeps running
            let final_flush = tokio::spawn({
                let pipeline = pipeline.clone();
                let metrics = self.metrics.clone();
                async move { pipeline.flush_cycle(&metrics).await }
            });
            match tokio::time::timeout_at(deadline, final_flush).await {
                Ok(Ok(Ok(write))) => report.final_write = Some(write),
                Ok(Ok(Err(e))) => tracing::warn!("Final flush failed: {}", e),
                Ok(Err(e)) => tracing::error!("Final flush task panicked: {}", e),
                Err(_) => report.timed_out = true,
            }
        }

        let still_pending = pipeline.buffer.len() + pipeline.writer.pending_events();
        report.events_discarded =
            if report.timed_out { pending_at_close.max(still_pending) } else { still_pending };

        if report.timed_out {
            tracing::error!(
                "Shutdown timed out after {:?}; {} events were not confirmed written",
                timeout,
                report.events_discarded
            );
        } else if report.events_discarded > 0 {
            tracing::error!(
                "Shutdown left {} events unwritten after final flush",
                report.events_discarded
            );
        }

        self.set_status(PipelineStatus::Stopped);
        tracing::info!("Telemetry pipeline stopped");
        Ok(report)
    }

    async fn run_flush_loop(
        pipeline: Arc<Pipeline>,
        metrics: Arc<MetricsCollector>,
        mut stop: watch::Receiver<bool>,
    ) {
        let period = pipeline.config.flush_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
                _ = pipeline.flush_notify.notified() => {
                    ticker.reset();
                }
            }

            if let Err(e) = pipeline.flush_cycle(&metrics).await {
                tracing::debug!("Background flush left work for the next cycle: {}", e);
            }
        }

        tracing::debug!("Flush task stopped");
    }

    async fn run_rotation_loop(
        pipeline: Arc<Pipeline>,
        metrics: Arc<MetricsCollector>,
        mut stop: watch::Receiver<bool>,
    ) {
        let period = pipeline.config.rotation_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    let evicted = pipeline.aggregator.rotate_and_evict(Utc::now());
                    metrics.windows_evicted_total.add(evicted as u64);
                }
            }
        }

        tracing::debug!("Rotation task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            PipelineStatus::Stopped,
            PipelineStatus::Initializing,
            PipelineStatus::Running,
            PipelineStatus::Draining,
        ] {
            assert_eq!(PipelineStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_ingest_requires_running_pipeline() {
        let coordinator = PipelineCoordinator::new(Arc::new(crate::sinks::InMemorySink::new()), None);
        let event = Event::with_type(
            crate::event::EventType::GameStart,
            crate::event::Dimensions::at(Utc::now()),
            Default::default(),
            Default::default(),
        )
        .unwrap();

        assert_eq!(coordinator.status(), PipelineStatus::Stopped);
        assert!(matches!(coordinator.ingest(event), Err(PipelineError::PipelineNotRunning)));
        assert!(coordinator.get_realtime_metrics(5).is_empty());
    }
}
