//! Inbound wire decoding
//!
//! Turns broker messages into [`Sample`]s. Supported topics, with `{p}` the
//! configured prefix:
//!
//! ```text
//! {p}/uwb/{tag}/ranging   {"ranges": {"A1": 1.23, "A2": {"distance": 2.1, "rssi": -71}}, "ts": 1723111200.1}
//! {p}/uwb/{tag}/position  {"x": 3.0, "y": 2.0, "ts": 1723111200.1}
//! {p}/motion/{tag}        {"speed": 0.8, "ts": 1723111200.1}
//! {p}/status/{tag}        {"find_mode": false, "locked": true}
//! ```
//!
//! `ts` is optional everywhere and defaults to the receive time. Numbers may
//! also arrive as numeric strings.

use crate::core::{
    DecodeError, PositionEstimate, RangeMeasurement, RangingSample, Sample, DEFAULT_TOPIC_PREFIX,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Raw broker message before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl WireMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Topic kinds the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicKind {
    Ranging,
    Position,
    Motion,
    Status,
}

/// Message parser for converting broker messages into samples
#[derive(Debug, Clone)]
pub struct MessageParser {
    prefix: String,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_PREFIX)
    }
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Decode one message. `received_at` stands in for a missing `ts`.
    pub fn parse_message(&self, msg: &WireMessage, received_at: f64) -> Result<Sample, DecodeError> {
        let (kind, tag_id) = self.classify_topic(&msg.topic)?;

        let payload: Value =
            serde_json::from_slice(&msg.payload).map_err(|e| DecodeError::InvalidJson {
                details: e.to_string(),
            })?;
        let object = payload.as_object().ok_or_else(|| DecodeError::InvalidValue {
            field: "payload".to_string(),
            details: "expected a JSON object".to_string(),
        })?;

        let timestamp = optional_number(object, "ts")?.unwrap_or(received_at);

        match kind {
            TopicKind::Ranging => Ok(Sample::Ranging(RangingSample {
                tag_id,
                ranges: parse_ranges(object)?,
                timestamp,
            })),
            TopicKind::Position => {
                let x = required_number(object, "x")?;
                let y = required_number(object, "y")?;
                Ok(Sample::Position(PositionEstimate::reported(tag_id, x, y, timestamp)))
            }
            TopicKind::Motion => Ok(Sample::Motion {
                tag_id,
                payload,
                timestamp,
            }),
            TopicKind::Status => Ok(Sample::Status {
                tag_id,
                payload,
                timestamp,
            }),
        }
    }

    fn classify_topic(&self, topic: &str) -> Result<(TopicKind, String), DecodeError> {
        let unknown = || DecodeError::UnknownTopic {
            topic: topic.to_string(),
        };

        let rest = topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(unknown)?;
        let parts: Vec<&str> = rest.split('/').collect();

        let (kind, tag) = match parts.as_slice() {
            ["uwb", tag, "ranging"] => (TopicKind::Ranging, *tag),
            ["uwb", tag, "position"] => (TopicKind::Position, *tag),
            ["motion", tag] => (TopicKind::Motion, *tag),
            ["status", tag] => (TopicKind::Status, *tag),
            _ => return Err(unknown()),
        };

        if tag.is_empty() {
            return Err(unknown());
        }
        Ok((kind, tag.to_string()))
    }
}

fn parse_ranges(object: &Map<String, Value>) -> Result<BTreeMap<String, RangeMeasurement>, DecodeError> {
    let ranges = match object.get("ranges") {
        None | Some(Value::Null) => return Err(DecodeError::MissingField { field: "ranges" }),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(DecodeError::InvalidValue {
                field: "ranges".to_string(),
                details: "expected an object of anchor distances".to_string(),
            })
        }
    };

    let mut parsed = BTreeMap::new();
    for (anchor_id, value) in ranges {
        let field = format!("ranges.{}", anchor_id);
        let measurement = match value {
            Value::Object(entry) => RangeMeasurement {
                distance_m: match entry.get("distance") {
                    Some(d) => as_number(d, &field)?,
                    None => {
                        return Err(DecodeError::InvalidValue {
                            field,
                            details: "missing 'distance'".to_string(),
                        })
                    }
                },
                signal_strength: match entry.get("rssi") {
                    Some(Value::Null) | None => None,
                    Some(s) => Some(as_number(s, &format!("{}.rssi", field))?),
                },
            },
            other => RangeMeasurement::new(as_number(other, &field)?),
        };

        if measurement.distance_m < 0.0 {
            return Err(DecodeError::InvalidValue {
                field,
                details: format!("negative distance {}", measurement.distance_m),
            });
        }
        parsed.insert(anchor_id.clone(), measurement);
    }

    Ok(parsed)
}

fn required_number(object: &Map<String, Value>, field: &'static str) -> Result<f64, DecodeError> {
    optional_number(object, field)?.ok_or(DecodeError::MissingField { field })
}

fn optional_number(object: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, DecodeError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_number(value, field).map(Some),
    }
}

fn as_number(value: &Value, field: &str) -> Result<f64, DecodeError> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(DecodeError::InvalidValue {
            field: field.to_string(),
            details: format!("expected a number, got {}", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(topic: &str, payload: Value) -> WireMessage {
        WireMessage::new(topic, serde_json::to_vec(&payload).unwrap())
    }

    #[test]
    fn test_parse_ranging_message() {
        let parser = MessageParser::default();
        let sample = parser
            .parse_message(
                &msg(
                    "mottu/uwb/tag01/ranging",
                    json!({"ranges": {"A1": 3.6, "A2": {"distance": 3.61, "rssi": -70}}, "ts": 100.5}),
                ),
                200.0,
            )
            .unwrap();

        match sample {
            Sample::Ranging(r) => {
                assert_eq!(r.tag_id, "tag01");
                assert_eq!(r.timestamp, 100.5);
                assert_eq!(r.ranges["A1"], RangeMeasurement::new(3.6));
                assert_eq!(r.ranges["A2"].signal_strength, Some(-70.0));
            }
            other => panic!("unexpected sample {:?}", other),
        }
    }

    #[test]
    fn test_parse_position_with_string_numbers_and_default_ts() {
        let parser = MessageParser::default();
        let sample = parser
            .parse_message(&msg("mottu/uwb/tag02/position", json!({"x": "3.5", "y": 1})), 42.0)
            .unwrap();

        assert_eq!(sample, Sample::Position(PositionEstimate::reported("tag02", 3.5, 1.0, 42.0)));
    }

    #[test]
    fn test_parse_motion_and_status() {
        let parser = MessageParser::new("site");

        let motion = parser
            .parse_message(&msg("site/motion/t9", json!({"speed": 0.9, "ts": 7.0})), 0.0)
            .unwrap();
        assert_eq!(motion.kind_name(), "motion");
        assert_eq!(motion.timestamp(), 7.0);

        let status = parser
            .parse_message(&msg("site/status/t9", json!({"locked": true})), 3.0)
            .unwrap();
        assert_eq!(status.tag_id(), "t9");
        assert_eq!(status.timestamp(), 3.0);
    }

    #[test]
    fn test_missing_ranges_is_decode_error() {
        let parser = MessageParser::default();
        let result = parser.parse_message(&msg("mottu/uwb/tag01/ranging", json!({"ts": 1.0})), 0.0);
        assert_eq!(result, Err(DecodeError::MissingField { field: "ranges" }));
    }

    #[test]
    fn test_invalid_values() {
        let parser = MessageParser::default();

        let negative = parser.parse_message(
            &msg("mottu/uwb/tag01/ranging", json!({"ranges": {"A1": -1.0}})),
            0.0,
        );
        assert!(matches!(negative, Err(DecodeError::InvalidValue { .. })));

        let non_numeric = parser.parse_message(
            &msg("mottu/uwb/tag01/position", json!({"x": "left", "y": 1.0})),
            0.0,
        );
        assert!(matches!(non_numeric, Err(DecodeError::InvalidValue { ref field, .. }) if field == "x"));

        let missing_y = parser.parse_message(&msg("mottu/uwb/tag01/position", json!({"x": 1.0})), 0.0);
        assert_eq!(missing_y, Err(DecodeError::MissingField { field: "y" }));
    }

    #[test]
    fn test_bad_json_and_unknown_topics() {
        let parser = MessageParser::default();

        let garbage = WireMessage::new("mottu/status/tag01", b"{not json".to_vec());
        assert!(matches!(
            parser.parse_message(&garbage, 0.0),
            Err(DecodeError::InvalidJson { .. })
        ));

        for topic in ["other/status/tag01", "mottu/uwb/tag01/velocity", "mottu/status/", "mottu"] {
            let result = parser.parse_message(&msg(topic, json!({})), 0.0);
            assert!(
                matches!(result, Err(DecodeError::UnknownTopic { .. })),
                "topic {topic} should be rejected"
            );
        }
    }
}
