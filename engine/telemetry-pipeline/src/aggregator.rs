//! # Real-time Aggregation
//!
//! Ring of fixed-width time windows with per-type counts and metric summaries.

use crate::event::{Event, EventType};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Dimensions broken down per window
const TRACKED_DIMENSIONS: [&str; 3] = ["platform", "device_type", "geo"];

/// Streaming summary of one metric within a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    fn new(value: f64) -> Self {
        Self { count: 1, sum: value, min: value, max: value }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn merge(&mut self, other: &MetricSummary) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Arithmetic mean of the observed values
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Mutable window state, only reachable under the aggregator lock
#[derive(Debug, Clone)]
struct TimeWindow {
    bucket_key: i64,
    total_events: u64,
    events_by_type: BTreeMap<EventType, u64>,
    metrics: BTreeMap<String, MetricSummary>,
    dimension_counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl TimeWindow {
    fn new(bucket_key: i64) -> Self {
        Self {
            bucket_key,
            total_events: 0,
            events_by_type: BTreeMap::new(),
            metrics: BTreeMap::new(),
            dimension_counts: BTreeMap::new(),
        }
    }

    fn fold(&mut self, event: &Event) {
        self.total_events += 1;
        *self.events_by_type.entry(event.event_type()).or_insert(0) += 1;

        for (name, value) in event.metrics() {
            match self.metrics.get_mut(name) {
                Some(summary) => summary.observe(*value),
                None => {
                    self.metrics.insert(name.clone(), MetricSummary::new(*value));
                }
            }
        }

        let dims = event.dimensions();
        let tracked = [&dims.platform, &dims.device_type, &dims.geo];
        for (key, value) in TRACKED_DIMENSIONS.iter().zip(tracked) {
            if let Some(value) = value {
                *self
                    .dimension_counts
                    .entry((*key).to_string())
                    .or_default()
                    .entry(value.clone())
                    .or_insert(0) += 1;
            }
        }
    }

    fn snapshot(&self, width_ms: i64) -> TimeWindowSnapshot {
        TimeWindowSnapshot {
            bucket_key: self.bucket_key,
            start: millis_to_datetime(self.bucket_key),
            end: millis_to_datetime(self.bucket_key.saturating_add(width_ms)),
            total_events: self.total_events,
            events_by_type: self.events_by_type.clone(),
            metrics: self.metrics.clone(),
            dimension_counts: self.dimension_counts.clone(),
        }
    }
}

/// Immutable copy of a window handed to queries and real-time sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeWindowSnapshot {
    /// Bucket start in Unix milliseconds
    pub bucket_key: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_events: u64,
    pub events_by_type: BTreeMap<EventType, u64>,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub dimension_counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl TimeWindowSnapshot {
    pub fn count_for(&self, event_type: EventType) -> u64 {
        self.events_by_type.get(&event_type).copied().unwrap_or(0)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }
}

/// Roll-up of several retained windows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowSummary {
    pub windows: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub total_events: u64,
    pub events_by_type: BTreeMap<EventType, u64>,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub dimension_counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl WindowSummary {
    fn absorb(&mut self, window: &TimeWindowSnapshot) {
        self.windows += 1;
        self.start = Some(self.start.map_or(window.start, |s| s.min(window.start)));
        self.end = Some(self.end.map_or(window.end, |e| e.max(window.end)));
        self.total_events += window.total_events;

        for (event_type, count) in &window.events_by_type {
            *self.events_by_type.entry(*event_type).or_insert(0) += count;
        }
        for (name, summary) in &window.metrics {
            match self.metrics.get_mut(name) {
                Some(existing) => existing.merge(summary),
                None => {
                    self.metrics.insert(name.clone(), *summary);
                }
            }
        }
        for (dimension, values) in &window.dimension_counts {
            let merged = self.dimension_counts.entry(dimension.clone()).or_default();
            for (value, count) in values {
                *merged.entry(value.clone()).or_insert(0) += count;
            }
        }
    }
}

/// What `record` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Folded into its window; `evicted` windows were dropped to stay within retention
    Recorded { evicted: usize },
    /// Timestamp beyond the future-skew allowance; not aggregated
    TooFarAhead,
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Concurrent window ring keyed by truncated timestamp
#[derive(Debug)]
pub struct RealtimeAggregator {
    windows: RwLock<BTreeMap<i64, TimeWindow>>,
    width_ms: i64,
    retention: usize,
    max_future_skew_ms: i64,
}

impl RealtimeAggregator {
    /// `width_ms` and `retention` must be non-zero (checked by config validation)
    pub fn new(width_ms: u64, retention: usize) -> Self {
        let width_ms = i64::try_from(width_ms).unwrap_or(i64::MAX).max(1);
        Self {
            windows: RwLock::new(BTreeMap::new()),
            width_ms,
            retention: retention.max(1),
            max_future_skew_ms: width_ms,
        }
    }

    /// How far ahead of `now` an event may be and still get a window (one width by default)
    pub fn with_max_future_skew(mut self, skew_ms: u64) -> Self {
        self.max_future_skew_ms = i64::try_from(skew_ms).unwrap_or(i64::MAX);
        self
    }

    /// Newest bucket key that may exist when the clock reads `now`
    fn latest_allowed_key(&self, now: DateTime<Utc>) -> i64 {
        let limit = now.timestamp_millis().saturating_add(self.max_future_skew_ms);
        limit.div_euclid(self.width_ms) * self.width_ms
    }

    /// Start of the bucket containing `timestamp`, in Unix milliseconds
    pub fn bucket_key(&self, timestamp: DateTime<Utc>) -> i64 {
        timestamp.timestamp_millis().div_euclid(self.width_ms) * self.width_ms
    }

    /// Fold one event into its window, judged against the wall clock
    pub fn record(&self, event: &Event) -> RecordOutcome {
        self.record_at(event, Utc::now())
    }

    /// Fold one event into its window as of `now`.
    ///
    /// Events further ahead than the skew allowance are not aggregated, so a
    /// producer with a bad clock cannot push live windows out of the ring.
    pub fn record_at(&self, event: &Event, now: DateTime<Utc>) -> RecordOutcome {
        let key = self.bucket_key(event.timestamp());
        if key > self.latest_allowed_key(now) {
            tracing::debug!(
                "Skipping {} event at {} ahead of clock {}",
                event.event_type(),
                event.timestamp(),
                now
            );
            return RecordOutcome::TooFarAhead;
        }

        let mut windows = self.windows.write();
        windows.entry(key).or_insert_with(|| TimeWindow::new(key)).fold(event);

        RecordOutcome::Recorded { evicted: Self::evict_overflow(&mut windows, self.retention) }
    }

    /// Drop windows outside `[current - (retention - 1) * width, now + skew]`
    pub fn rotate_and_evict(&self, now: DateTime<Utc>) -> usize {
        let current = self.bucket_key(now);
        let span = self.width_ms.saturating_mul(self.retention as i64 - 1);
        let horizon = current.saturating_sub(span);
        let latest = self.latest_allowed_key(now);

        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|key, _| *key >= horizon && *key <= latest);
        let expired = before - windows.len();

        let evicted = expired + Self::evict_overflow(&mut windows, self.retention);
        if evicted > 0 {
            tracing::debug!(
                "Rotated windows at bucket {}: evicted {}, retained {}",
                current,
                evicted,
                windows.len()
            );
        }
        evicted
    }

    fn evict_overflow(windows: &mut BTreeMap<i64, TimeWindow>, retention: usize) -> usize {
        let mut evicted = 0;
        while windows.len() > retention {
            windows.pop_first();
            evicted += 1;
        }
        evicted
    }

    /// Newest `count` windows, newest first; fewer at cold start, never padded
    pub fn snapshot(&self, count: usize) -> Vec<TimeWindowSnapshot> {
        let windows = self.windows.read();
        windows.values().rev().take(count).map(|w| w.snapshot(self.width_ms)).collect()
    }

    /// Fold the newest `count` windows into one summary
    pub fn summarize(&self, count: usize) -> WindowSummary {
        let windows = self.windows.read();
        let mut summary = WindowSummary::default();
        for window in windows.values().rev().take(count) {
            summary.absorb(&window.snapshot(self.width_ms));
        }
        summary
    }

    pub fn window_count(&self) -> usize {
        self.windows.read().len()
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    pub fn retention(&self) -> usize {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Dimensions;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    const MINUTE_MS: u64 = 60_000;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap()
    }

    fn event_at(event_type: EventType, ts: DateTime<Utc>, metrics: &[(&str, f64)]) -> Event {
        Event::with_type(
            event_type,
            Dimensions::at(ts),
            metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_summaries_fold_within_window() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        for (offset, value) in [(1, 10.0), (20, 20.0), (59, 30.0)] {
            aggregator.record(&event_at(
                EventType::ShotTaken,
                base() + Duration::seconds(offset),
                &[("value", value)],
            ));
        }
        aggregator.record(&event_at(EventType::GameStart, base(), &[]));

        let windows = aggregator.snapshot(1);
        assert_eq!(windows.len(), 1);
        let window = &windows[0];
        assert_eq!(window.start, base());
        assert_eq!(window.end, base() + Duration::minutes(1));
        assert_eq!(window.total_events, 4);
        assert_eq!(window.count_for(EventType::ShotTaken), 3);
        assert_eq!(window.count_for(EventType::GameStart), 1);
        assert_eq!(window.count_for(EventType::GameEnd), 0);

        let value = window.metric("value").unwrap();
        assert_eq!(value.count, 3);
        assert_eq!(value.sum, 60.0);
        assert_eq!(value.min, 10.0);
        assert_eq!(value.max, 30.0);
        assert_eq!(value.mean(), 20.0);
        assert!(window.metric("latency").is_none());
    }

    #[test]
    fn test_events_61s_apart_land_in_two_buckets() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        let first = base() + Duration::seconds(30);
        let second = first + Duration::seconds(61);

        aggregator.record(&event_at(EventType::PageView, first, &[]));
        aggregator.record(&event_at(EventType::PageView, second, &[]));

        let windows = aggregator.snapshot(2);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].bucket_key, aggregator.bucket_key(second));
        assert_eq!(windows[1].bucket_key, aggregator.bucket_key(first));
        assert!(windows[0].bucket_key > windows[1].bucket_key);
        assert_eq!(windows[0].total_events, 1);
        assert_eq!(windows[1].total_events, 1);
    }

    #[test]
    fn test_cold_start_returns_fewer_windows() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        assert!(aggregator.snapshot(3).is_empty());

        aggregator.record(&event_at(EventType::PageView, base(), &[]));
        assert_eq!(aggregator.snapshot(3).len(), 1);
    }

    #[test]
    fn test_rotation_keeps_most_recent_buckets() {
        const RETENTION: usize = 3;
        let aggregator = RealtimeAggregator::new(MINUTE_MS, RETENTION);

        let mut keys = Vec::new();
        for minute in 0..=RETENTION as i64 {
            let ts = base() + Duration::minutes(minute);
            aggregator.record(&event_at(EventType::PageView, ts, &[]));
            aggregator.rotate_and_evict(ts);
            keys.push(aggregator.bucket_key(ts));
        }

        let windows = aggregator.snapshot(RETENTION + 1);
        assert_eq!(windows.len(), RETENTION);
        let returned: Vec<i64> = windows.iter().map(|w| w.bucket_key).collect();
        let expected: Vec<i64> = keys.iter().rev().take(RETENTION).copied().collect();
        assert_eq!(returned, expected);
    }

    #[test]
    fn test_rotation_evicts_by_age() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        aggregator.record(&event_at(EventType::PageView, base(), &[]));
        aggregator.record(&event_at(EventType::PageView, base() + Duration::minutes(2), &[]));

        assert_eq!(aggregator.rotate_and_evict(base() + Duration::minutes(4)), 0);
        assert_eq!(aggregator.window_count(), 2);

        assert_eq!(aggregator.rotate_and_evict(base() + Duration::minutes(5)), 1);
        assert_eq!(aggregator.window_count(), 1);

        assert_eq!(aggregator.rotate_and_evict(base() + Duration::minutes(30)), 1);
        assert_eq!(aggregator.window_count(), 0);
    }

    #[test]
    fn test_record_caps_ring_oldest_first() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 2);
        aggregator.record(&event_at(EventType::PageView, base() + Duration::minutes(5), &[]));
        aggregator.record(&event_at(EventType::PageView, base() + Duration::minutes(6), &[]));

        // A late event for an older bucket is the oldest and is evicted immediately
        let outcome = aggregator.record(&event_at(EventType::PageView, base(), &[]));
        assert_eq!(outcome, RecordOutcome::Recorded { evicted: 1 });

        let keys: Vec<i64> = aggregator.snapshot(5).iter().map(|w| w.bucket_key).collect();
        assert_eq!(
            keys,
            vec![
                aggregator.bucket_key(base() + Duration::minutes(6)),
                aggregator.bucket_key(base() + Duration::minutes(5)),
            ]
        );
    }

    #[test]
    fn test_future_events_cannot_crowd_out_live_windows() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 2);
        let now = base();

        for days in [1, 2] {
            let outcome =
                aggregator.record_at(&event_at(EventType::PageView, now + Duration::days(days), &[]), now);
            assert_eq!(outcome, RecordOutcome::TooFarAhead);
        }
        for _ in 0..3 {
            aggregator.record_at(&event_at(EventType::PageView, now, &[]), now);
        }

        let windows = aggregator.snapshot(5);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].bucket_key, aggregator.bucket_key(now));
        assert_eq!(windows[0].total_events, 3);
    }

    #[test]
    fn test_skew_allowance_is_configurable() {
        let now = base();
        let ahead = event_at(EventType::PageView, now + Duration::minutes(1), &[]);

        let strict = RealtimeAggregator::new(MINUTE_MS, 5).with_max_future_skew(0);
        assert_eq!(strict.record_at(&ahead, now), RecordOutcome::TooFarAhead);

        let lenient = RealtimeAggregator::new(MINUTE_MS, 5);
        assert_eq!(lenient.record_at(&ahead, now), RecordOutcome::Recorded { evicted: 0 });
    }

    #[test]
    fn test_rotation_drops_windows_ahead_of_clock() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        let later = base() + Duration::minutes(10);
        aggregator.record_at(&event_at(EventType::PageView, later, &[]), later);
        aggregator.record_at(&event_at(EventType::PageView, base(), &[]), later);

        // Clock stepped back: the window at `later` is now too far ahead
        assert_eq!(aggregator.rotate_and_evict(base()), 1);
        let keys: Vec<i64> = aggregator.snapshot(5).iter().map(|w| w.bucket_key).collect();
        assert_eq!(keys, vec![aggregator.bucket_key(base())]);
    }

    #[test]
    fn test_summarize_folds_newest_windows() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        let metrics_at = |minute: i64, value: f64| {
            event_at(EventType::ShotTaken, base() + Duration::minutes(minute), &[("value", value)])
        };
        aggregator.record(&metrics_at(0, 100.0));
        aggregator.record(&metrics_at(1, 10.0));
        aggregator.record(&metrics_at(1, 20.0));
        aggregator.record(&metrics_at(2, 30.0));
        aggregator.record(&event_at(EventType::GameEnd, base() + Duration::minutes(2), &[]));

        let summary = aggregator.summarize(2);
        assert_eq!(summary.windows, 2);
        assert_eq!(summary.start, Some(base() + Duration::minutes(1)));
        assert_eq!(summary.end, Some(base() + Duration::minutes(3)));
        assert_eq!(summary.total_events, 4);
        assert_eq!(summary.events_by_type[&EventType::ShotTaken], 3);
        assert_eq!(summary.events_by_type[&EventType::GameEnd], 1);

        let value = summary.metrics["value"];
        assert_eq!(value.count, 3);
        assert_eq!(value.sum, 60.0);
        assert_eq!(value.min, 10.0);
        assert_eq!(value.max, 30.0);
        assert_eq!(value.mean(), 20.0);

        assert_eq!(aggregator.summarize(10).total_events, 5);
        assert_eq!(RealtimeAggregator::new(MINUTE_MS, 5).summarize(3), WindowSummary::default());
    }

    #[test]
    fn test_dimension_breakdown() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        for platform in ["web", "web", "ios"] {
            let event = Event::with_type(
                EventType::PageView,
                Dimensions { platform: Some(platform.into()), ..Dimensions::at(base()) },
                BTreeMap::new(),
                BTreeMap::new(),
            )
            .unwrap();
            aggregator.record(&event);
        }

        let window = &aggregator.snapshot(1)[0];
        let platforms = &window.dimension_counts["platform"];
        assert_eq!(platforms["web"], 2);
        assert_eq!(platforms["ios"], 1);
        assert!(!window.dimension_counts.contains_key("geo"));
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let aggregator = RealtimeAggregator::new(MINUTE_MS, 5);
        aggregator.record(&event_at(EventType::PageView, base(), &[]));
        let before = aggregator.snapshot(1);

        aggregator.record(&event_at(EventType::PageView, base(), &[]));
        assert_eq!(before[0].total_events, 1);
        assert_eq!(aggregator.snapshot(1)[0].total_events, 2);
    }

    #[test]
    fn test_concurrent_record() {
        let aggregator = Arc::new(RealtimeAggregator::new(MINUTE_MS, 5));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let aggregator = aggregator.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        aggregator.record(&event_at(
                            EventType::ApiLatency,
                            base(),
                            &[("latency", i as f64)],
                        ));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let window = &aggregator.snapshot(1)[0];
        assert_eq!(window.total_events, 2_000);
        let latency = window.metric("latency").unwrap();
        assert_eq!(latency.count, 2_000);
        assert_eq!(latency.min, 0.0);
        assert_eq!(latency.max, 499.0);
    }

    proptest! {
        #[test]
        fn prop_bucket_contains_timestamp(ms in -4_000_000_000_000i64..4_000_000_000_000i64, width in 1u64..86_400_000u64) {
            let aggregator = RealtimeAggregator::new(width, 5);
            let ts = Utc.timestamp_millis_opt(ms).unwrap();
            let key = aggregator.bucket_key(ts);
            prop_assert!(key <= ms);
            prop_assert!(ms < key + width as i64);
            prop_assert_eq!(key.rem_euclid(width as i64), 0);
        }
    }
}
