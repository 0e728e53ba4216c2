//! # Configuration Management
//!
//! Configuration for the telemetry pipeline, loadable from TOML.

use crate::error::PipelineError;
use crate::event::EventType;
use crate::{
    DEFAULT_BUCKET_WIDTH_MS, DEFAULT_BUFFER_CAPACITY, DEFAULT_FLUSH_BATCH_SIZE,
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MAX_FUTURE_SKEW_MS, DEFAULT_RETRY_QUEUE_CAPACITY,
    DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_SINK_WRITE_TIMEOUT_MS, DEFAULT_WINDOW_RETENTION_COUNT,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Time-based flush interval in milliseconds
    pub flush_interval_ms: u64,

    /// Flush as soon as this many events are buffered
    pub flush_batch_size: usize,

    /// Width of each real-time window in milliseconds
    pub bucket_width_ms: u64,

    /// Number of windows retained for queries
    pub window_retention_count: usize,

    /// How far ahead of the local clock an event may be and still be aggregated
    pub max_future_skew_ms: u64,

    /// Admission rate per event type name; unlisted types are always admitted
    pub sampling_rates: BTreeMap<String, f64>,

    /// Hard ceiling on buffered events
    pub buffer_capacity: usize,

    /// Failed batches kept for the next flush cycle
    pub retry_queue_capacity: usize,

    /// Upper bound on graceful shutdown
    pub shutdown_timeout_ms: u64,

    /// Upper bound on a single sink call
    pub sink_write_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut sampling_rates = BTreeMap::new();
        sampling_rates.insert(EventType::PageView.as_str().to_string(), 1.0);
        sampling_rates.insert(EventType::PerformanceSample.as_str().to_string(), 0.1);

        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            flush_batch_size: DEFAULT_FLUSH_BATCH_SIZE,
            bucket_width_ms: DEFAULT_BUCKET_WIDTH_MS,
            window_retention_count: DEFAULT_WINDOW_RETENTION_COUNT,
            max_future_skew_ms: DEFAULT_MAX_FUTURE_SKEW_MS,
            sampling_rates,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            retry_queue_capacity: DEFAULT_RETRY_QUEUE_CAPACITY,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            sink_write_timeout_ms: DEFAULT_SINK_WRITE_TIMEOUT_MS,
        }
    }
}

impl PipelineConfig {
    /// Get flush interval as Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Get window width as Duration
    pub fn bucket_width(&self) -> Duration {
        Duration::from_millis(self.bucket_width_ms)
    }

    /// Windows are rotated once per bucket width
    pub fn rotation_interval(&self) -> Duration {
        self.bucket_width()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Get sink write timeout as Duration
    pub fn sink_write_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_write_timeout_ms)
    }

    /// Check value ranges and resolve sampling keys against the taxonomy
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.flush_interval_ms == 0 {
            return Err(PipelineError::config("flush_interval_ms must be greater than 0"));
        }

        if self.flush_batch_size == 0 {
            return Err(PipelineError::config("flush_batch_size must be greater than 0"));
        }

        if self.bucket_width_ms == 0 || self.bucket_width_ms > i64::MAX as u64 {
            return Err(PipelineError::config("bucket_width_ms must be a positive i64"));
        }

        if self.max_future_skew_ms > i64::MAX as u64 {
            return Err(PipelineError::config("max_future_skew_ms must fit in an i64"));
        }

        if self.window_retention_count == 0 {
            return Err(PipelineError::config("window_retention_count must be greater than 0"));
        }

        if self.buffer_capacity == 0 {
            return Err(PipelineError::config("buffer_capacity must be greater than 0"));
        }

        if self.shutdown_timeout_ms == 0 {
            return Err(PipelineError::config("shutdown_timeout_ms must be greater than 0"));
        }

        if self.sink_write_timeout_ms == 0 {
            return Err(PipelineError::config("sink_write_timeout_ms must be greater than 0"));
        }

        self.resolved_sampling_rates().map(|_| ())
    }

    /// Sampling rates keyed by event type
    pub fn resolved_sampling_rates(&self) -> Result<HashMap<EventType, f64>, PipelineError> {
        let mut rates = HashMap::with_capacity(self.sampling_rates.len());

        for (name, rate) in &self.sampling_rates {
            let event_type = name.parse::<EventType>().map_err(|_| {
                PipelineError::config(format!("sampling_rates: unknown event type {name}"))
            })?;

            if !rate.is_finite() || !(0.0..=1.0).contains(rate) {
                return Err(PipelineError::config(format!(
                    "sampling_rates.{name} must be within [0, 1], got {rate}"
                )));
            }

            rates.insert(event_type, *rate);
        }

        Ok(rates)
    }

    /// Load configuration from file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), anyhow::Error> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
