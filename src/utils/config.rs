use crate::api::{Clock, EventSink};
use crate::core::{
    AnchorMap, Coordinate, DEFAULT_OFFLINE_THRESHOLD_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_TOPIC_PREFIX, MIN_ANCHORS_2D,
};
use crate::monitoring::{BreachPolicy, Geofence, Monitor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Anchors closer than this are reported as a layout warning (meters)
const MIN_ANCHOR_SPACING_M: f64 = 0.5;

/// Upper bound for the offline threshold and the sweep interval (one day)
const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// One fixed anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Unique anchor identifier, as used in ranging payloads
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Disabled anchors are left out of the solver
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl AnchorConfig {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            enabled: true,
        }
    }
}

/// Static monitor configuration, read once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub anchors: Vec<AnchorConfig>,
    pub geofence: Geofence,
    pub breach_policy: BreachPolicy,
    /// Silence after which a tag is reported offline (seconds)
    pub offline_threshold_secs: f64,
    /// Period of the offline sweep (seconds)
    pub sweep_interval_secs: f64,
    /// First topic segment of every inbound and outbound topic
    pub topic_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            anchors: vec![
                AnchorConfig::new("A1", 0.0, 0.0),
                AnchorConfig::new("A2", 6.0, 0.0),
                AnchorConfig::new("A3", 6.0, 3.5),
                AnchorConfig::new("A4", 0.0, 3.5),
            ],
            geofence: Geofence::default(),
            breach_policy: BreachPolicy::default(),
            offline_threshold_secs: DEFAULT_OFFLINE_THRESHOLD_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("anchor '{anchor_id}' conflict: {reason}")]
    AnchorConflict { anchor_id: String, reason: String },

    #[error("geometry validation error: {reason}")]
    GeometryValidation { reason: String },

    #[error("I/O error: {message}")]
    IoError { message: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Outcome of [`MonitorConfig::validate`]
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ConfigError>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    /// First error, if any
    pub fn into_result(self) -> Result<Vec<String>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(self.warnings),
        }
    }
}

impl MonitorConfig {
    /// Load and validate a JSON configuration file. Missing fields take their
    /// defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("failed to read config file '{}': {}", path_str, e),
        })?;

        let config: MonitorConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
                message: format!("failed to parse config file '{}': {}", path_str, e),
            })?;

        config.validate().into_result()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializationError {
                message: format!("failed to serialize config: {}", e),
            })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("failed to write config file '{}': {}", path_str, e),
        })
    }

    /// Enabled anchors keyed by id
    pub fn anchor_map(&self) -> AnchorMap {
        self.anchors
            .iter()
            .filter(|a| a.enabled)
            .map(|a| (a.id.clone(), Coordinate::new(a.x, a.y)))
            .collect()
    }

    /// Sweep period; an unrepresentable value falls back to the default
    pub fn sweep_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.sweep_interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_SWEEP_INTERVAL_SECS))
    }

    /// Check every parameter and the anchor layout
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        for (parameter, value) in [
            ("offline_threshold_secs", self.offline_threshold_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                errors.push(ConfigError::InvalidParameter {
                    parameter: parameter.to_string(),
                    value: value.to_string(),
                    reason: "must be a positive number of seconds".to_string(),
                });
            } else if value > MAX_INTERVAL_SECS {
                errors.push(ConfigError::InvalidParameter {
                    parameter: parameter.to_string(),
                    value: value.to_string(),
                    reason: format!("must not exceed {MAX_INTERVAL_SECS} seconds"),
                });
            }
        }

        if self.sweep_interval_secs > self.offline_threshold_secs {
            warnings.push(
                "sweep interval exceeds the offline threshold, offline events will be late"
                    .to_string(),
            );
        }

        if !self.geofence.is_well_formed() {
            errors.push(ConfigError::InvalidParameter {
                parameter: "geofence".to_string(),
                value: format!("{:?}", self.geofence),
                reason: "bounds must be finite with x0 < x1 and y0 < y1".to_string(),
            });
        }

        if self.topic_prefix.is_empty() || self.topic_prefix.contains(['/', '+', '#']) {
            errors.push(ConfigError::InvalidParameter {
                parameter: "topic_prefix".to_string(),
                value: self.topic_prefix.clone(),
                reason: "must be a single non-empty topic segment".to_string(),
            });
        }

        self.validate_anchors(&mut errors, &mut warnings, &mut suggestions);

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
        }
    }

    fn validate_anchors(
        &self,
        errors: &mut Vec<ConfigError>,
        warnings: &mut Vec<String>,
        suggestions: &mut Vec<String>,
    ) {
        let mut seen = std::collections::BTreeSet::new();
        for anchor in &self.anchors {
            if anchor.id.is_empty() {
                errors.push(ConfigError::AnchorConflict {
                    anchor_id: anchor.id.clone(),
                    reason: "anchor id must not be empty".to_string(),
                });
            }
            if !seen.insert(anchor.id.as_str()) {
                errors.push(ConfigError::AnchorConflict {
                    anchor_id: anchor.id.clone(),
                    reason: "duplicate anchor id".to_string(),
                });
            }
            if !(anchor.x.is_finite() && anchor.y.is_finite()) {
                errors.push(ConfigError::AnchorConflict {
                    anchor_id: anchor.id.clone(),
                    reason: "anchor coordinates must be finite".to_string(),
                });
            }
        }

        let positions: Vec<Coordinate> = self.anchor_map().into_values().collect();

        if positions.len() < MIN_ANCHORS_2D {
            errors.push(ConfigError::GeometryValidation {
                reason: format!(
                    "only {} enabled anchors, but {} required",
                    positions.len(),
                    MIN_ANCHORS_2D
                ),
            });
            return;
        }

        if is_collinear(&positions) {
            errors.push(ConfigError::GeometryValidation {
                reason: "all enabled anchors lie on one line, positions cannot be solved".to_string(),
            });
            suggestions.push("move at least one anchor off the line through the others".to_string());
        }

        if minimum_spacing(&positions) < MIN_ANCHOR_SPACING_M {
            warnings.push("some anchors are very close together, which may reduce accuracy".to_string());
            suggestions.push("consider increasing spacing between anchors".to_string());
        }
    }

    /// Build a monitor from this configuration
    pub fn build_monitor(
        &self,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Monitor, ConfigError> {
        let warnings = self.validate().into_result()?;
        for warning in &warnings {
            tracing::warn!(%warning, "configuration warning");
        }

        Ok(Monitor::new(self.anchor_map(), clock, sink)
            .with_geofence(self.geofence, self.breach_policy)
            .with_offline_threshold(self.offline_threshold_secs)
            .with_topic_prefix(self.topic_prefix.clone()))
    }
}

/// True when every point lies on the line through the first two distinct
/// points. Uses the cross product relative to the layout's extent.
fn is_collinear(positions: &[Coordinate]) -> bool {
    let Some(first) = positions.first() else {
        return true;
    };
    let Some(second) = positions.iter().find(|p| p.distance_to(first) > 1e-9) else {
        return true;
    };

    let dx = second.x - first.x;
    let dy = second.y - first.y;
    let extent = dx.hypot(dy);

    positions.iter().all(|p| {
        let cross = dx * (p.y - first.y) - dy * (p.x - first.x);
        (cross / extent).abs() < 1e-6
    })
}

fn minimum_spacing(positions: &[Coordinate]) -> f64 {
    let mut min_distance = f64::INFINITY;
    for (i, a) in positions.iter().enumerate() {
        for b in &positions[i + 1..] {
            min_distance = min_distance.min(a.distance_to(b));
        }
    }
    min_distance
}
