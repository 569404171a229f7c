//! Outbound boundary
//!
//! The engine hands every event, position and command to an [`EventSink`] and
//! forgets it. Publishing, persistence and retries belong to whatever sits
//! behind the sink.

use crate::core::{Event, Outbound, PositionEstimate};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Non-blocking receiver of outbound records
pub trait EventSink: Send + Sync {
    fn publish(&self, record: Outbound);
}

/// Forwards records into a tokio channel drained by the transport task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, record: Outbound) {
        // A closed receiver means the transport is shutting down; delivery
        // after shutdown is not guaranteed.
        if self.tx.send(record).is_err() {
            tracing::debug!("outbound channel closed, dropping record");
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Outbound>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Outbound> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Outbound::Event(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn positions(&self) -> Vec<PositionEstimate> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Outbound::Position(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, record: Outbound) {
        self.records.lock().push(record);
    }
}
