//! System parameters and defaults

/// Minimum anchor count for a unique 2D fix
pub const MIN_ANCHORS_2D: usize = 3;

/// Default geofence bounds (x0, y0, x1, y1) in meters
pub const DEFAULT_GEOFENCE: (f64, f64, f64, f64) = (0.2, 0.2, 5.8, 3.3);

/// Silence after which a tag is reported offline (seconds)
pub const DEFAULT_OFFLINE_THRESHOLD_SECS: f64 = 8.0;

/// Offline sweep cadence (seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: f64 = 2.0;

/// Broker topic prefix used by the deployed tags
pub const DEFAULT_TOPIC_PREFIX: &str = "mottu";
