//! # Batch Buffer
//!
//! Bounded accumulating queue drained by the flush path.

use crate::error::{PipelineError, Result};
use crate::event::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Smallest allocation made once the buffer starts filling
const MIN_STORAGE: usize = 64;

/// Ordered group of events awaiting one durable write
#[derive(Debug, Clone)]
pub struct Batch {
    events: Vec<Event>,
    drained_at: DateTime<Utc>,
    attempts: u32,
}

impl Batch {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events, drained_at: Utc::now(), attempts: 0 }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// When the batch was swapped out of the buffer
    pub fn drained_at(&self) -> DateTime<Utc> {
        self.drained_at
    }

    /// Failed delivery attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Thread-safe event buffer with a hard capacity ceiling.
///
/// `append` and `drain_for_flush` share one critical section, so an event is
/// either in the drained batch or left for the next one, never both.
#[derive(Debug)]
pub struct BatchBuffer {
    events: Mutex<Vec<Event>>,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { events: Mutex::new(Vec::new()), capacity }
    }

    /// Add an event, returning the buffered count afterwards.
    ///
    /// Fails with `BufferFull` at the ceiling instead of growing.
    pub fn append(&self, event: Event) -> Result<usize> {
        let mut events = self.events.lock();
        let len = events.len();

        if len >= self.capacity {
            return Err(PipelineError::BufferFull { capacity: self.capacity });
        }

        if len == events.capacity() {
            let target = (len * 2).max(MIN_STORAGE).min(self.capacity);
            events.reserve_exact(target - len);
        }

        events.push(event);
        Ok(events.len())
    }

    /// Swap the current batch for an empty one and hand it to the writer
    pub fn drain_for_flush(&self) -> Batch {
        let drained = std::mem::take(&mut *self.events.lock());
        Batch::new(drained)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Configured ceiling
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently allocated slots in the underlying storage
    pub fn storage_capacity(&self) -> usize {
        self.events.lock().capacity()
    }
}
