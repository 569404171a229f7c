//! Ingestion monitor
//!
//! Applies decoded samples to the tag store, runs the geofence on every fresh
//! position and the offline check on every sweep, and hands the resulting
//! positions and events to the sink. A bad sample only ever affects itself.

use super::geofence::{BreachPolicy, Geofence, GeofenceEvaluator};
use super::offline::{OfflineEvaluator, StaleReport};
use super::store::TagStateStore;
use crate::algorithms::Multilateration;
use crate::api::{Clock, EventSink};
use crate::core::{
    AnchorMap, Command, Event, EventKind, MonitorError, MonitorResult, Outbound, PositionEstimate,
    RangingSample, Sample, SolveError, TagState,
};
use crate::processing::{MessageParser, WireMessage};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What ingesting one sample did
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new position was stored; `breach` is set if it left the geofence
    Positioned {
        estimate: PositionEstimate,
        breach: Option<Event>,
    },
    /// The estimate is older than the stored one. Liveness was refreshed,
    /// nothing else changed.
    OutOfOrder { estimate: PositionEstimate },
    /// Ranges could not be solved; the tag keeps its last known position
    Fallback {
        error: SolveError,
        last_known: Option<PositionEstimate>,
    },
    /// Motion or status passed through as an event
    Observed { event: Event },
}

/// Running counters, updated lock-free
#[derive(Debug, Default)]
pub struct MonitorStats {
    samples_ingested: AtomicU64,
    positions_solved: AtomicU64,
    solver_fallbacks: AtomicU64,
    decode_errors: AtomicU64,
    unknown_tag_commands: AtomicU64,
    events_emitted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub samples_ingested: u64,
    pub positions_solved: u64,
    pub solver_fallbacks: u64,
    pub decode_errors: u64,
    pub unknown_tag_commands: u64,
    pub events_emitted: u64,
}

impl MonitorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            positions_solved: self.positions_solved.load(Ordering::Relaxed),
            solver_fallbacks: self.solver_fallbacks.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_tag_commands: self.unknown_tag_commands.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
        }
    }
}

pub struct Monitor {
    anchors: AnchorMap,
    solver: Multilateration,
    store: TagStateStore,
    geofence: GeofenceEvaluator,
    offline: OfflineEvaluator,
    parser: MessageParser,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    stats: MonitorStats,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("anchors", &self.anchors)
            .field("geofence", &self.geofence)
            .field("offline", &self.offline)
            .field("tags", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Monitor with the default geofence, offline threshold and topic prefix
    pub fn new(anchors: AnchorMap, clock: Arc<dyn Clock>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            anchors,
            solver: Multilateration::default(),
            store: TagStateStore::new(),
            geofence: GeofenceEvaluator::default(),
            offline: OfflineEvaluator::default(),
            parser: MessageParser::default(),
            clock,
            sink,
            stats: MonitorStats::default(),
        }
    }

    pub fn with_geofence(mut self, region: Geofence, policy: BreachPolicy) -> Self {
        self.geofence = GeofenceEvaluator::new(region, policy);
        self
    }

    pub fn with_offline_threshold(mut self, threshold_secs: f64) -> Self {
        self.offline = OfflineEvaluator::new(threshold_secs);
        self
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.parser = MessageParser::new(prefix);
        self
    }

    pub fn with_solver(mut self, solver: Multilateration) -> Self {
        self.solver = solver;
        self
    }

    pub fn anchors(&self) -> &AnchorMap {
        &self.anchors
    }

    pub fn store(&self) -> &TagStateStore {
        &self.store
    }

    pub fn tag_state(&self, tag_id: &str) -> Option<TagState> {
        self.store.get(tag_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn offline_threshold_secs(&self) -> f64 {
        self.offline.threshold_secs()
    }

    /// Decode and ingest one broker message. Decode errors are logged,
    /// counted and returned; they leave the store untouched.
    pub fn ingest_message(&self, msg: &WireMessage) -> MonitorResult<IngestOutcome> {
        match self.parser.parse_message(msg, self.clock.now()) {
            Ok(sample) => Ok(self.ingest(sample)),
            Err(e) => {
                MonitorStats::bump(&self.stats.decode_errors);
                warn!(topic = %msg.topic, error = %e, "dropping malformed message");
                Err(MonitorError::from(e))
            }
        }
    }

    /// Apply one decoded sample
    pub fn ingest(&self, sample: Sample) -> IngestOutcome {
        MonitorStats::bump(&self.stats.samples_ingested);
        // Liveness is receive time; the tag's own clock only orders positions
        let seen_at = self.clock.now();

        match sample {
            Sample::Ranging(ranging) => self.ingest_ranging(ranging, seen_at),
            Sample::Position(estimate) => self.apply_position(estimate, seen_at),
            Sample::Motion {
                tag_id,
                payload,
                timestamp,
            } => {
                self.store.upsert_seen(&tag_id, seen_at);
                self.observe(tag_id, EventKind::Motion, payload, timestamp)
            }
            Sample::Status {
                tag_id,
                payload,
                timestamp,
            } => {
                self.store.update(&tag_id, seen_at, |state| {
                    state.mark_seen(seen_at);
                    apply_status_flags(state, &payload);
                });
                self.observe(tag_id, EventKind::Status, payload, timestamp)
            }
        }
    }

    /// Send a command to a tag that has reported at least once
    pub fn command(&self, tag_id: &str, command: Command) -> MonitorResult<()> {
        if !self.store.contains(tag_id) {
            MonitorStats::bump(&self.stats.unknown_tag_commands);
            warn!(tag = %tag_id, command = command.as_str(), "command for unknown tag ignored");
            return Err(MonitorError::UnknownTag {
                tag_id: tag_id.to_string(),
            });
        }

        debug!(tag = %tag_id, command = command.as_str(), "forwarding command");
        self.sink.publish(Outbound::Command {
            tag_id: tag_id.to_string(),
            command,
        });
        Ok(())
    }

    /// Check every tag for staleness and emit one offline event per tag that
    /// crossed the threshold. Each tag is checked under its own lock.
    pub fn sweep(&self) -> Vec<Event> {
        let now = self.clock.now();
        let mut events = Vec::new();

        for tag_id in self.store.tag_ids() {
            let report = self
                .store
                .update_existing(&tag_id, |state| self.offline.check(state, now))
                .flatten();

            if let Some(report) = report {
                info!(tag = %tag_id, silent_for = report.silent_for, "tag offline");
                let event = offline_event(tag_id, report);
                self.emit(event.clone());
                events.push(event);
            }
        }

        events
    }

    fn ingest_ranging(&self, ranging: RangingSample, seen_at: f64) -> IngestOutcome {
        match self.solver.solve_sample(&self.anchors, &ranging) {
            Ok(estimate) => {
                MonitorStats::bump(&self.stats.positions_solved);
                self.apply_position(estimate, seen_at)
            }
            Err(error) => {
                MonitorStats::bump(&self.stats.solver_fallbacks);
                let last_known = self.store.update(&ranging.tag_id, seen_at, |state| {
                    state.mark_seen(seen_at);
                    state.last_position.clone()
                });
                warn!(
                    tag = %ranging.tag_id,
                    error = %error,
                    has_last_known = last_known.is_some(),
                    "multilateration failed, keeping last known position"
                );
                IngestOutcome::Fallback { error, last_known }
            }
        }
    }

    fn apply_position(&self, estimate: PositionEstimate, seen_at: f64) -> IngestOutcome {
        let transition = self.store.upsert_position(&estimate, seen_at, &self.geofence);

        let Some(transition) = transition else {
            debug!(
                tag = %estimate.tag_id,
                ts = estimate.timestamp,
                "out-of-order position, liveness refreshed only"
            );
            return IngestOutcome::OutOfOrder { estimate };
        };

        self.sink.publish(Outbound::Position(estimate.clone()));

        let breach = transition.breach.then(|| {
            let event = breach_event(&estimate);
            info!(tag = %estimate.tag_id, x = estimate.x, y = estimate.y, "geofence breach");
            self.emit(event.clone());
            event
        });

        IngestOutcome::Positioned { estimate, breach }
    }

    fn observe(&self, tag_id: String, kind: EventKind, payload: Value, timestamp: f64) -> IngestOutcome {
        let event = Event {
            tag_id,
            kind,
            payload,
            timestamp,
        };
        debug!(tag = %event.tag_id, kind = kind.as_str(), "observed");
        self.emit(event.clone());
        IngestOutcome::Observed { event }
    }

    fn emit(&self, event: Event) {
        MonitorStats::bump(&self.stats.events_emitted);
        self.sink.publish(Outbound::Event(event));
    }
}

fn apply_status_flags(state: &mut TagState, payload: &Value) {
    if let Some(find_mode) = payload.get("find_mode").and_then(Value::as_bool) {
        state.find_mode = find_mode;
    }
    if let Some(locked) = payload.get("locked").and_then(Value::as_bool) {
        state.locked = locked;
    }
}

fn breach_event(estimate: &PositionEstimate) -> Event {
    Event {
        tag_id: estimate.tag_id.clone(),
        kind: EventKind::GeofenceBreach,
        payload: json!({
            "reason": "geofence_breach",
            "x": estimate.x,
            "y": estimate.y,
            "ts": estimate.timestamp,
        }),
        timestamp: estimate.timestamp,
    }
}

fn offline_event(tag_id: String, report: StaleReport) -> Event {
    Event {
        tag_id,
        kind: EventKind::Offline,
        payload: json!({
            "reason": "offline",
            "last_seen_sec": report.silent_for,
            "ts": report.checked_at,
        }),
        timestamp: report.checked_at,
    }
}
