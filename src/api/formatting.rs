//! Outbound wire formatting
//!
//! Renders [`Outbound`] records into broker topic + JSON payload pairs. This is
//! the presentation boundary, so it is also the only place coordinates get
//! rounded.

use crate::core::{Event, Outbound, PositionEstimate, DEFAULT_TOPIC_PREFIX};
use crate::processing::WireMessage;
use serde_json::{json, Value};

/// Topic/payload renderer for outbound records
#[derive(Debug, Clone)]
pub struct WireFormatter {
    /// Topic prefix, e.g. `mottu`
    pub prefix: String,
    /// Decimal places kept for published coordinates; `None` keeps full precision
    pub precision: Option<u8>,
}

impl Default for WireFormatter {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            precision: None,
        }
    }
}

impl WireFormatter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            precision: None,
        }
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Render one record
    pub fn format(&self, record: &Outbound) -> Result<WireMessage, serde_json::Error> {
        match record {
            Outbound::Event(event) => Ok(WireMessage::new(
                format!("{}/event/{}", self.prefix, event.tag_id),
                serde_json::to_vec(&event_body(event))?,
            )),
            Outbound::Position(estimate) => {
                let rounded = self.round_position(estimate);
                Ok(WireMessage::new(
                    format!("{}/position/{}", self.prefix, estimate.tag_id),
                    serde_json::to_vec(&rounded)?,
                ))
            }
            Outbound::Command { tag_id, command } => Ok(WireMessage::new(
                format!("{}/act/{}/cmd", self.prefix, tag_id),
                serde_json::to_vec(&json!({ "cmd": command.as_str() }))?,
            )),
        }
    }

    fn round_position(&self, estimate: &PositionEstimate) -> PositionEstimate {
        let mut rounded = estimate.clone();
        rounded.x = self.round(estimate.x);
        rounded.y = self.round(estimate.y);
        rounded
    }

    fn round(&self, value: f64) -> f64 {
        match self.precision {
            Some(places) => {
                let factor = 10f64.powi(places as i32);
                (value * factor).round() / factor
            }
            None => value,
        }
    }
}

/// Event payload as published. Object payloads are tagged with a `reason`
/// naming the event kind unless they already carry one; anything else is
/// wrapped.
fn event_body(event: &Event) -> Value {
    match &event.payload {
        Value::Object(map) => {
            let mut body = map.clone();
            body.entry("reason")
                .or_insert_with(|| Value::from(event.kind.as_str()));
            body.entry("ts").or_insert_with(|| Value::from(event.timestamp));
            Value::Object(body)
        }
        other => json!({ "reason": event.kind.as_str(), "value": other, "ts": event.timestamp }),
    }
}
