//! Service runtime
//!
//! Two tokio tasks share one [`Monitor`]: the ingestion task consumes the
//! inbound channel and the sweep task runs the offline check on a fixed
//! interval. Shutdown is signalled over a `watch` channel. On shutdown the
//! ingestion task closes its receiver and applies whatever was already queued
//! before it exits.

use super::monitor::Monitor;
use crate::core::{Command, Sample};
use crate::processing::WireMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Item on the inbound feed
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw broker message, decoded by the monitor
    Message(WireMessage),
    /// Already decoded sample
    Sample(Sample),
    /// Outbound command, applied in feed order with the samples around it
    Command { tag_id: String, command: Command },
}

impl From<WireMessage> for Inbound {
    fn from(msg: WireMessage) -> Self {
        Inbound::Message(msg)
    }
}

impl From<Sample> for Inbound {
    fn from(sample: Sample) -> Self {
        Inbound::Sample(sample)
    }
}

/// Handle to the running tasks. Dropping it also stops them.
#[derive(Debug)]
pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
    ingest: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl ServiceHandle {
    /// Signal shutdown and wait for both tasks to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for (name, task) in [("ingest", self.ingest), ("sweep", self.sweep)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "service task ended abnormally");
            }
        }
        info!("monitor service stopped");
    }

    /// Whether both tasks have already exited
    pub fn is_finished(&self) -> bool {
        self.ingest.is_finished() && self.sweep.is_finished()
    }
}

/// Spawn the ingestion and sweep tasks on the current runtime
pub fn spawn(
    monitor: Arc<Monitor>,
    inbound: mpsc::Receiver<Inbound>,
    sweep_interval: Duration,
) -> ServiceHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);

    let ingest = tokio::spawn(run_ingest(Arc::clone(&monitor), inbound, shutdown_rx.clone()));
    let sweep = tokio::spawn(run_sweep(monitor, sweep_interval, shutdown_rx));

    info!(sweep_interval_secs = sweep_interval.as_secs_f64(), "monitor service started");
    ServiceHandle {
        shutdown,
        ingest,
        sweep,
    }
}

async fn run_ingest(
    monitor: Arc<Monitor>,
    mut inbound: mpsc::Receiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            item = inbound.recv() => match item {
                Some(item) => apply(&monitor, item),
                None => {
                    debug!("inbound feed closed");
                    return;
                }
            },
        }
    }

    inbound.close();
    let mut drained = 0usize;
    while let Some(item) = inbound.recv().await {
        apply(&monitor, item);
        drained += 1;
    }
    debug!(drained, "ingest task drained queue");
}

fn apply(monitor: &Monitor, item: Inbound) {
    match item {
        // decode errors are logged and counted by the monitor
        Inbound::Message(msg) => {
            let _ = monitor.ingest_message(&msg);
        }
        Inbound::Sample(sample) => {
            monitor.ingest(sample);
        }
        // unknown tags are logged and counted by the monitor
        Inbound::Command { tag_id, command } => {
            let _ = monitor.command(&tag_id, command);
        }
    }
}

async fn run_sweep(monitor: Arc<Monitor>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let events = monitor.sweep();
                if !events.is_empty() {
                    debug!(count = events.len(), "sweep emitted offline events");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChannelSink, TokioClock};
    use crate::core::{AnchorMap, Coordinate, EventKind, Outbound, PositionEstimate};

    fn anchors() -> AnchorMap {
        [("A1", 0.0, 0.0), ("A2", 6.0, 0.0), ("A3", 6.0, 3.5)]
            .into_iter()
            .map(|(id, x, y)| (id.to_string(), Coordinate::new(x, y)))
            .collect()
    }

    fn offline_events(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> usize {
        let mut count = 0;
        while let Ok(record) = rx.try_recv() {
            if matches!(record, Outbound::Event(ref e) if e.kind == EventKind::Offline) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_tag_reported_twice_in_twenty_seconds() {
        let (sink, mut out) = ChannelSink::channel();
        let monitor = Arc::new(Monitor::new(
            anchors(),
            Arc::new(TokioClock::starting_at(0.0)),
            Arc::new(sink),
        ));
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn(Arc::clone(&monitor), rx, Duration::from_secs(2));

        tx.send(WireMessage::new("mottu/uwb/tag01/position", br#"{"x": 3.0, "y": 2.0}"#.to_vec()).into())
            .await
            .unwrap();
        time::sleep(Duration::from_secs(21)).await;

        assert!(monitor.store().contains("tag01"));
        assert_eq!(offline_events(&mut out), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_tag_never_goes_offline() {
        let (sink, mut out) = ChannelSink::channel();
        let clock = Arc::new(TokioClock::starting_at(0.0));
        let monitor = Arc::new(Monitor::new(anchors(), clock, Arc::new(sink)));
        let (tx, rx) = mpsc::channel(16);
        let handle = spawn(Arc::clone(&monitor), rx, Duration::from_secs(2));

        for _ in 0..6 {
            tx.send(WireMessage::new("mottu/motion/tag01", br#"{"speed": 0.8}"#.to_vec()).into())
                .await
                .unwrap();
            time::sleep(Duration::from_secs(5)).await;
        }

        assert_eq!(offline_events(&mut out), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queued_samples() {
        let (sink, _out) = ChannelSink::channel();
        let monitor = Arc::new(Monitor::new(
            anchors(),
            Arc::new(TokioClock::starting_at(100.0)),
            Arc::new(sink),
        ));
        let (tx, rx) = mpsc::channel(64);

        for i in 0..10 {
            let estimate = PositionEstimate::reported(format!("tag{i:02}"), 1.0, 1.0, 100.0);
            tx.send(Sample::Position(estimate).into()).await.unwrap();
        }
        let handle = spawn(Arc::clone(&monitor), rx, Duration::from_secs(2));
        handle.shutdown().await;

        assert_eq!(monitor.store().len(), 10);
        assert_eq!(monitor.stats().samples_ingested, 10);
        let late = Sample::Position(PositionEstimate::reported("late", 0.0, 0.0, 0.0));
        assert!(tx.send(late.into()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_follow_feed_order() {
        let (sink, mut out) = ChannelSink::channel();
        let monitor = Arc::new(Monitor::new(
            anchors(),
            Arc::new(TokioClock::starting_at(10.0)),
            Arc::new(sink),
        ));
        let (tx, rx) = mpsc::channel(8);

        let command = |tag: &str| Inbound::Command {
            tag_id: tag.to_string(),
            command: Command::FindOn,
        };
        tx.send(command("tag02")).await.unwrap();
        tx.send(Sample::Position(PositionEstimate::reported("tag01", 1.0, 1.0, 10.0)).into())
            .await
            .unwrap();
        tx.send(command("tag01")).await.unwrap();
        tx.send(Sample::Position(PositionEstimate::reported("tag02", 2.0, 1.0, 10.0)).into())
            .await
            .unwrap();

        let handle = spawn(Arc::clone(&monitor), rx, Duration::from_secs(2));
        handle.shutdown().await;

        let mut commanded = Vec::new();
        while let Ok(record) = out.try_recv() {
            if let Outbound::Command { tag_id, .. } = record {
                commanded.push(tag_id);
            }
        }
        assert_eq!(commanded, vec!["tag01".to_string()]);
        assert_eq!(monitor.stats().unknown_tag_commands, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_close_stops_ingest() {
        let (sink, _out) = ChannelSink::channel();
        let clock = Arc::new(TokioClock::starting_at(0.0));
        let monitor = Arc::new(Monitor::new(anchors(), clock, Arc::new(sink)));
        let (tx, rx) = mpsc::channel::<Inbound>(4);
        let handle = spawn(monitor, rx, Duration::from_secs(2));

        drop(tx);
        time::sleep(Duration::from_secs(1)).await;
        assert!(handle.ingest.is_finished());
        assert!(!handle.sweep.is_finished());
        handle.shutdown().await;
    }
}
