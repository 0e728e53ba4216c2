//! # Command Line Interface
//!
//! Runs the pipeline against synthetic traffic and manages config files.

use crate::config::PipelineConfig;
use crate::coordinator::PipelineCoordinator;
use crate::error::PipelineError;
use crate::event::{Dimensions, Event, EventType};
use crate::sinks::{JsonLinesSink, LogRealtimeSink};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const SYNTHETIC_TYPES: &[EventType] = &[
    EventType::PageView,
    EventType::GameStart,
    EventType::ShotTaken,
    EventType::GameEnd,
    EventType::ApiLatency,
    EventType::PerformanceSample,
];

const PLATFORMS: &[&str] = &["web", "ios", "android"];
const DEVICES: &[&str] = &["desktop", "mobile", "tablet"];

/// Telemetry pipeline CLI
#[derive(Parser)]
#[command(name = "telemetry-cli")]
#[command(about = "Telemetry ingestion pipeline driver")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Feed synthetic events through the pipeline
    Run {
        /// TOML config file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON-lines file receiving durable writes
        #[arg(short, long, default_value = "./telemetry_events.jsonl")]
        output: PathBuf,

        /// How long to generate traffic
        #[arg(long, default_value = "10")]
        duration_secs: u64,

        /// Synthetic events per second
        #[arg(long, default_value = "50")]
        rate: u32,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
    /// Load and validate a configuration file
    Validate {
        /// Config file to check
        path: PathBuf,
    },
}

/// CLI handler
pub struct CliHandler;

impl CliHandler {
    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Run { config, output, duration_secs, rate } => {
                let config = match config {
                    Some(path) => PipelineConfig::load_from_file(&path)
                        .with_context(|| format!("loading config from {:?}", path))?,
                    None => PipelineConfig::default(),
                };
                self.run(config, &output, Duration::from_secs(duration_secs), rate).await?;
            }
            Commands::DefaultConfig => {
                print!("{}", toml::to_string_pretty(&PipelineConfig::default())?);
            }
            Commands::Validate { path } => {
                self.validate(&path)?;
            }
        }
        Ok(())
    }

    async fn run(
        &self,
        config: PipelineConfig,
        output: &Path,
        duration: Duration,
        rate: u32,
    ) -> Result<()> {
        let durable = Arc::new(JsonLinesSink::new(output));
        let pipeline = PipelineCoordinator::new(durable, Some(Arc::new(LogRealtimeSink)));
        pipeline.initialize(config).await?;

        let period = Duration::from_secs(1) / rate.max(1);
        let mut ticker = tokio::time::interval(period);
        let stop_at = tokio::time::Instant::now() + duration;
        let mut rejected = 0u64;

        tracing::info!("Generating {} events/s for {:?} into {:?}", rate, duration, output);

        while tokio::time::Instant::now() < stop_at {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                    break;
                }
            }

            match pipeline.ingest(synthetic_event()?) {
                Ok(_) => {}
                Err(PipelineError::BufferFull { .. }) => rejected += 1,
                Err(e) => return Err(e.into()),
            }
        }

        let report = pipeline.shutdown().await?;
        if rejected > 0 {
            tracing::warn!("{} events rejected by backpressure", rejected);
        }

        let windows = pipeline.get_realtime_metrics(pipeline.stats().windows_retained);
        let summary = serde_json::json!({
            "shutdown": {
                "timed_out": report.timed_out,
                "events_discarded": report.events_discarded,
            },
            "stats": pipeline.stats(),
            "windows": windows,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);

        Ok(())
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let config = PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading config from {:?}", path))?;
        config.validate()?;

        println!("{:?} is valid", path);
        println!(
            "  flush: every {}ms or {} events",
            config.flush_interval_ms, config.flush_batch_size
        );
        println!(
            "  windows: {} x {}ms",
            config.window_retention_count, config.bucket_width_ms
        );
        for (name, rate) in &config.sampling_rates {
            println!("  sample {}: {}", name, rate);
        }
        Ok(())
    }
}

fn synthetic_event() -> Result<Event> {
    let mut rng = rand::thread_rng();
    let event_type = SYNTHETIC_TYPES.choose(&mut rng).copied().unwrap_or(EventType::PageView);

    let mut metrics = BTreeMap::new();
    match event_type {
        EventType::ShotTaken => {
            metrics.insert("value".to_string(), rng.gen_range(0.0..100.0));
        }
        EventType::GameEnd => {
            metrics.insert("duration".to_string(), rng.gen_range(60.0..1800.0));
            metrics.insert("score".to_string(), rng.gen_range(0..8) as f64);
        }
        EventType::ApiLatency => {
            metrics.insert("latency".to_string(), rng.gen_range(5.0..250.0));
        }
        EventType::PerformanceSample => {
            metrics.insert("duration".to_string(), rng.gen_range(1.0..32.0));
        }
        _ => {}
    }

    let dimensions = Dimensions {
        session_id: Some(format!("session-{}", rng.gen_range(0..20))),
        platform: PLATFORMS.choose(&mut rng).map(|p| p.to_string()),
        device_type: DEVICES.choose(&mut rng).map(|d| d.to_string()),
        ..Dimensions::at(Utc::now())
    };

    Ok(Event::with_type(event_type, dimensions, metrics, BTreeMap::new())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::parse_from([
            "telemetry-cli",
            "--json-logs",
            "run",
            "--output",
            "/tmp/out.jsonl",
            "--duration-secs",
            "3",
            "--rate",
            "10",
        ]);

        assert!(cli.json_logs);
        match cli.command {
            Commands::Run { config, output, duration_secs, rate } => {
                assert!(config.is_none());
                assert_eq!(output, PathBuf::from("/tmp/out.jsonl"));
                assert_eq!(duration_secs, 3);
                assert_eq!(rate, 10);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_synthetic_events_are_valid() {
        for _ in 0..200 {
            let event = synthetic_event().unwrap();
            assert!(SYNTHETIC_TYPES.contains(&event.event_type()));
            assert!(event.dimensions().platform.is_some());
            if event.event_type() == EventType::ShotTaken {
                assert!(event.metric("value").is_some());
            }
        }
    }

    #[test]
    fn test_validate_rejects_unknown_rate_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut config = PipelineConfig::default();
        config.sampling_rates.insert("not_a_type".to_string(), 0.5);
        config.save_to_file(&path).unwrap();

        assert!(CliHandler.validate(&path).is_err());

        PipelineConfig::default().save_to_file(&path).unwrap();
        assert!(CliHandler.validate(&path).is_ok());
    }
}
