//! # Telemetry Pipeline
//!
//! Event telemetry ingestion and real-time aggregation for the platform.
//!
//! Producers (UI instrumentation, API middleware, game-loop samplers) hand
//! validated [`Event`]s to a [`PipelineCoordinator`]. Admitted events are
//! buffered for batched writes to a [`DurableSink`] and folded into a ring of
//! fixed-width time windows that can be queried through
//! [`PipelineCoordinator::get_realtime_metrics`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telemetry_pipeline::{Dimensions, Event, InMemorySink, PipelineConfig, PipelineCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = Arc::new(InMemorySink::new());
//!     let pipeline = PipelineCoordinator::new(sink, None);
//!     pipeline.initialize(PipelineConfig::default()).await?;
//!
//!     let event = Event::new(
//!         "shot_taken",
//!         Dimensions::at(chrono::Utc::now()),
//!         [("value".to_string(), 10.0)].into_iter().collect(),
//!         Default::default(),
//!     )?;
//!     pipeline.ingest(event)?;
//!
//!     pipeline.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod metrics;
pub mod sampling;
pub mod sinks;
pub mod writer;


pub use aggregator::{
    MetricSummary, RealtimeAggregator, RecordOutcome, TimeWindowSnapshot, WindowSummary,
};
pub use buffer::{Batch, BatchBuffer};
pub use config::PipelineConfig;
pub use coordinator::{IngestOutcome, PipelineCoordinator, PipelineStatus, ShutdownReport};
pub use error::{PipelineError, Result, SinkError, ValidationError};
pub use event::{Dimensions, Event, EventType};
pub use metrics::{MetricsCollector, PipelineStats};
pub use sampling::SamplingGate;
pub use sinks::{InMemorySink, JsonLinesSink, LogRealtimeSink};
pub use writer::{BatchWriter, DurableSink, RealtimeSink, WriteFailure, WriteReport};

/// Current version of the telemetry pipeline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default time-based flush interval (30s)
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 30_000;

/// Default size-based flush threshold
pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 100;

/// Default real-time window width (1 minute)
pub const DEFAULT_BUCKET_WIDTH_MS: u64 = 60_000;

/// Default number of windows retained for queries
pub const DEFAULT_WINDOW_RETENTION_COUNT: usize = 5;

/// Default hard ceiling on buffered events
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Default number of failed batches kept for retry
pub const DEFAULT_RETRY_QUEUE_CAPACITY: usize = 5;

/// Default bound on graceful shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Default bound on a single sink call
pub const DEFAULT_SINK_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Default allowance for event timestamps ahead of the local clock (1 minute)
pub const DEFAULT_MAX_FUTURE_SKEW_MS: u64 = 60_000;
