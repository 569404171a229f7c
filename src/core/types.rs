//! Core data types for the tracking engine

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Planar coordinate in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Fixed anchor positions keyed by anchor id.
///
/// Ordered so that every solve picks the same reference anchor for the same
/// input.
pub type AnchorMap = BTreeMap<String, Coordinate>;

/// One anchor's range report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeMeasurement {
    /// Measured distance (meters, >= 0)
    pub distance_m: f64,
    /// Received signal strength, when the tag reports it
    pub signal_strength: Option<f64>,
}

impl RangeMeasurement {
    pub fn new(distance_m: f64) -> Self {
        Self {
            distance_m,
            signal_strength: None,
        }
    }
}

/// Per-anchor distances reported by a tag at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct RangingSample {
    pub tag_id: String,
    pub ranges: BTreeMap<String, RangeMeasurement>,
    /// Seconds since epoch
    pub timestamp: f64,
}

impl RangingSample {
    /// Build a sample from bare distances
    pub fn from_distances<I, S>(tag_id: impl Into<String>, distances: I, timestamp: f64) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            tag_id: tag_id.into(),
            ranges: distances
                .into_iter()
                .map(|(anchor, d)| (anchor.into(), RangeMeasurement::new(d)))
                .collect(),
            timestamp,
        }
    }
}

/// Where a position estimate came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PositionSource {
    /// Computed locally by multilateration
    Solved { anchors_used: usize, residual_m: f64 },
    /// Already resolved upstream and reported as x/y
    Reported,
}

/// Resolved tag position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
    /// Seconds since epoch
    pub timestamp: f64,
    #[serde(flatten)]
    pub source: PositionSource,
}

impl PositionEstimate {
    /// Position reported by an upstream resolver
    pub fn reported(tag_id: impl Into<String>, x: f64, y: f64, timestamp: f64) -> Self {
        Self {
            tag_id: tag_id.into(),
            x,
            y,
            timestamp,
            source: PositionSource::Reported,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.x, self.y)
    }
}

/// Last-known state of one tracked tag
#[derive(Debug, Clone, PartialEq)]
pub struct TagState {
    pub last_position: Option<PositionEstimate>,
    /// Latest liveness timestamp; never moves backwards
    pub last_seen_at: f64,
    /// Geofence membership at the last evaluated position
    pub inside_geofence: bool,
    /// Set once an offline event went out, cleared by the next sample
    pub offline_event_pending: bool,
    pub find_mode: bool,
    pub locked: bool,
}

impl TagState {
    /// Fresh state for a tag first observed at `seen_at`.
    ///
    /// Membership starts as inside so that a tag first seen outside does not
    /// raise a breach.
    pub fn new(seen_at: f64) -> Self {
        Self {
            last_position: None,
            last_seen_at: seen_at,
            inside_geofence: true,
            offline_event_pending: false,
            find_mode: false,
            locked: false,
        }
    }

    /// Advance liveness, keeping the newest timestamp
    pub fn mark_seen(&mut self, now: f64) {
        if now > self.last_seen_at {
            self.last_seen_at = now;
        }
        self.offline_event_pending = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GeofenceBreach,
    Offline,
    Motion,
    Status,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::GeofenceBreach => "geofence_breach",
            EventKind::Offline => "offline",
            EventKind::Motion => "motion",
            EventKind::Status => "status",
        }
    }
}

/// Operational event handed to the outbound sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub tag_id: String,
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: f64,
}

/// Decoded inbound record
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Ranging(RangingSample),
    Position(PositionEstimate),
    Motion {
        tag_id: String,
        payload: Value,
        timestamp: f64,
    },
    Status {
        tag_id: String,
        payload: Value,
        timestamp: f64,
    },
}

impl Sample {
    pub fn tag_id(&self) -> &str {
        match self {
            Sample::Ranging(s) => &s.tag_id,
            Sample::Position(p) => &p.tag_id,
            Sample::Motion { tag_id, .. } | Sample::Status { tag_id, .. } => tag_id,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Sample::Ranging(s) => s.timestamp,
            Sample::Position(p) => p.timestamp,
            Sample::Motion { timestamp, .. } | Sample::Status { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Sample::Ranging(_) => "ranging",
            Sample::Position(_) => "position",
            Sample::Motion { .. } => "motion",
            Sample::Status { .. } => "status",
        }
    }
}

/// Actuation requests a tag understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    FindOn,
    FindOff,
    LockOn,
    LockOff,
}

impl Command {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Command::FindOn => "find_on",
            Command::FindOff => "find_off",
            Command::LockOn => "lock_on",
            Command::LockOff => "lock_off",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "find_on" => Some(Command::FindOn),
            "find_off" => Some(Command::FindOff),
            "lock_on" => Some(Command::LockOn),
            "lock_off" => Some(Command::LockOff),
            _ => None,
        }
    }
}

/// Everything the engine hands to the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(Event),
    Position(PositionEstimate),
    Command { tag_id: String, command: Command },
}
