//! # Event Model
//!
//! Canonical telemetry event record and its validation rules.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed taxonomy of event types accepted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserSignup,
    UserLogin,
    PageView,
    GameStart,
    GameEnd,
    ShotTaken,
    TournamentJoin,
    TournamentComplete,
    VenueCheckIn,
    MarketplacePurchase,
    AvatarUpdate,
    PerformanceSample,
    ApiLatency,
    ErrorOccurred,
}

impl EventType {
    /// Every member of the taxonomy
    pub const ALL: [EventType; 14] = [
        EventType::UserSignup,
        EventType::UserLogin,
        EventType::PageView,
        EventType::GameStart,
        EventType::GameEnd,
        EventType::ShotTaken,
        EventType::TournamentJoin,
        EventType::TournamentComplete,
        EventType::VenueCheckIn,
        EventType::MarketplacePurchase,
        EventType::AvatarUpdate,
        EventType::PerformanceSample,
        EventType::ApiLatency,
        EventType::ErrorOccurred,
    ];

    /// Canonical snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserSignup => "user_signup",
            EventType::UserLogin => "user_login",
            EventType::PageView => "page_view",
            EventType::GameStart => "game_start",
            EventType::GameEnd => "game_end",
            EventType::ShotTaken => "shot_taken",
            EventType::TournamentJoin => "tournament_join",
            EventType::TournamentComplete => "tournament_complete",
            EventType::VenueCheckIn => "venue_check_in",
            EventType::MarketplacePurchase => "marketplace_purchase",
            EventType::AvatarUpdate => "avatar_update",
            EventType::PerformanceSample => "performance_sample",
            EventType::ApiLatency => "api_latency",
            EventType::ErrorOccurred => "error_occurred",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    /// Accepts the snake_case name or the PascalCase variant name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s || format!("{:?}", t) == s)
            .ok_or_else(|| ValidationError::InvalidEventType(s.to_string()))
    }
}

/// Contextual keys captured by the producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Wall-clock capture time, required
    #[serde(skip_serializing)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl Dimensions {
    /// Dimensions carrying only a capture timestamp
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp: Some(timestamp), ..Default::default() }
    }
}

/// A single observed occurrence.
///
/// Immutable once constructed; the timestamp always comes from the producer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: Uuid,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    dimensions: Dimensions,
    metrics: BTreeMap<String, f64>,
    metadata: BTreeMap<String, serde_json::Value>,
}

impl Event {
    /// Build an event from a raw type name, validating it against the taxonomy
    pub fn new(
        event_type: &str,
        dimensions: Dimensions,
        metrics: BTreeMap<String, f64>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        let event_type = event_type.parse::<EventType>()?;
        Self::with_type(event_type, dimensions, metrics, metadata)
    }

    /// Build an event of a known type
    pub fn with_type(
        event_type: EventType,
        dimensions: Dimensions,
        metrics: BTreeMap<String, f64>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        let timestamp = match dimensions.timestamp {
            Some(ts) if ts.timestamp_millis() != 0 => ts,
            _ => return Err(ValidationError::MissingTimestamp),
        };

        if let Some((name, _)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteMetric(name.clone()));
        }

        Ok(Self { id: Uuid::new_v4(), event_type, timestamp, dimensions, metrics, metadata })
    }

    /// Unique id, stable across retries of the same event
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Single metric value, if observed
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }
}
