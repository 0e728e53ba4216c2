//! Concrete sink implementations

use crate::aggregator::TimeWindowSnapshot;
use crate::error::SinkError;
use crate::event::Event;
use crate::writer::{DurableSink, RealtimeSink};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// In-memory durable sink (for testing and demos)
#[derive(Debug, Default)]
pub struct InMemorySink {
    batches: Mutex<Vec<Vec<Event>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivered batch, in delivery order
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// All delivered events flattened
    pub fn events(&self) -> Vec<Event> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait::async_trait]
impl DurableSink for InMemorySink {
    async fn write_events(&self, events: &[Event]) -> Result<(), SinkError> {
        self.batches.lock().push(events.to_vec());
        Ok(())
    }
}

/// Appends one JSON object per event to a local file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), file: tokio::sync::Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl DurableSink for JsonLinesSink {
    async fn write_events(&self, events: &[Event]) -> Result<(), SinkError> {
        let mut payload = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut payload, event)?;
            payload.push(b'\n');
        }

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            file.write_all(&payload).await?;
            file.flush().await?;
        }

        tracing::debug!("Appended {} events to {:?}", events.len(), self.path);
        Ok(())
    }
}

/// Real-time sink that reports each window through `tracing`
#[derive(Debug, Default)]
pub struct LogRealtimeSink;

#[async_trait::async_trait]
impl RealtimeSink for LogRealtimeSink {
    async fn push_window(&self, window: &TimeWindowSnapshot) -> Result<(), SinkError> {
        tracing::info!(
            "Window {} - {}: {} events across {} types",
            window.start.format("%H:%M:%S"),
            window.end.format("%H:%M:%S"),
            window.total_events,
            window.events_by_type.len()
        );
        Ok(())
    }
}
