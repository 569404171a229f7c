//! UWB Tag Tracker
//!
//! Tracking engine for UWB-equipped tags: resolves anchor ranges into planar
//! positions by least-squares multilateration, keeps per-tag state, and emits
//! geofence breach and offline events.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod monitoring;
pub mod api;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    AnchorMap, Command, Coordinate, Event, EventKind, MonitorError, Outbound, PositionEstimate,
    RangingSample, Sample, SolveError, TagState,
};
pub use crate::algorithms::Multilateration;
pub use crate::processing::{MessageParser, WireMessage};
pub use crate::monitoring::{BreachPolicy, Geofence, IngestOutcome, Monitor, ServiceHandle, TagStateStore};
pub use crate::api::{ChannelSink, Clock, EventSink, ManualClock, RecordingSink, SystemClock, TokioClock, WireFormatter};
pub use crate::utils::{ConfigError, MonitorConfig};
