//! UWB tracker daemon
//!
//! Reads broker messages as JSON lines on stdin and writes outbound topic +
//! payload records as JSON lines on stdout. Input lines are either
//!
//! ```text
//! {"topic": "mottu/uwb/tag01/ranging", "payload": {"ranges": {"A1": 3.6, "A2": 3.61, "A3": 3.0}}}
//! {"tag": "tag01", "cmd": "find_on"}
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG`.

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uwb_tracker::api::{ChannelSink, SystemClock, WireFormatter};
use uwb_tracker::core::{Command, Outbound};
use uwb_tracker::monitoring::{service, BreachPolicy, Inbound};
use uwb_tracker::processing::WireMessage;
use uwb_tracker::utils::MonitorConfig;

#[derive(Parser, Debug)]
#[command(name = "uwb-tracker", about = "UWB tag tracking engine")]
struct Args {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seconds of silence before a tag is reported offline
    #[arg(long, value_name = "SECS")]
    offline_threshold: Option<f64>,

    /// Seconds between offline sweeps
    #[arg(long, value_name = "SECS")]
    sweep_interval: Option<f64>,

    /// Topic prefix for inbound and outbound topics
    #[arg(long)]
    prefix: Option<String>,

    /// Emit a breach event for every position outside the geofence
    #[arg(long)]
    every_sample_breach: bool,

    /// Decimal places kept in published coordinates
    #[arg(long)]
    precision: Option<u8>,

    /// Inbound queue capacity
    #[arg(long, default_value = "1024")]
    queue: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputLine {
    Message { topic: String, payload: Value },
    Command { tag: String, cmd: String },
}

#[derive(Serialize)]
struct OutputLine<'a> {
    topic: &'a str,
    payload: Value,
}

fn load_config(args: &Args) -> Result<MonitorConfig, uwb_tracker::utils::ConfigError> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_file(path)?,
        None => MonitorConfig::default(),
    };

    if let Some(secs) = args.offline_threshold {
        config.offline_threshold_secs = secs;
    }
    if let Some(secs) = args.sweep_interval {
        config.sweep_interval_secs = secs;
    }
    if let Some(prefix) = &args.prefix {
        config.topic_prefix = prefix.clone();
    }
    if args.every_sample_breach {
        config.breach_policy = BreachPolicy::EverySample;
    }

    config.validate().into_result()?;
    Ok(config)
}

async fn write_outbound(mut records: mpsc::UnboundedReceiver<Outbound>, formatter: WireFormatter) {
    let mut stdout = tokio::io::stdout();

    while let Some(record) = records.recv().await {
        let msg = match formatter.format(&record) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "failed to format outbound record");
                continue;
            }
        };
        let payload = serde_json::from_slice(&msg.payload).unwrap_or(Value::Null);
        let line = match serde_json::to_string(&OutputLine {
            topic: &msg.topic,
            payload,
        }) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode output line");
                continue;
            }
        };

        if let Err(e) = stdout.write_all(format!("{line}\n").as_bytes()).await {
            error!(error = %e, "stdout closed");
            break;
        }
    }

    let _ = stdout.flush().await;
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    let (sink, records) = ChannelSink::channel();
    let monitor = match config.build_monitor(Arc::new(SystemClock), Arc::new(sink)) {
        Ok(monitor) => Arc::new(monitor),
        Err(e) => {
            error!(error = %e, "failed to build monitor");
            return ExitCode::from(2);
        }
    };
    info!(
        anchors = monitor.anchors().len(),
        prefix = %config.topic_prefix,
        offline_threshold_secs = config.offline_threshold_secs,
        "uwb tracker starting"
    );

    let mut formatter = WireFormatter::new(config.topic_prefix.clone());
    formatter.precision = args.precision;
    let writer = tokio::spawn(write_outbound(records, formatter));

    let (tx, rx) = mpsc::channel(args.queue.max(1));
    let handle = service::spawn(Arc::clone(&monitor), rx, config.sweep_interval());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<InputLine>(&line) {
            Ok(InputLine::Message { topic, payload }) => {
                let msg = WireMessage::new(topic, payload.to_string());
                if tx.send(Inbound::Message(msg)).await.is_err() {
                    break;
                }
            }
            Ok(InputLine::Command { tag, cmd }) => match Command::parse(&cmd) {
                Some(command) => {
                    let item = Inbound::Command { tag_id: tag, command };
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
                None => warn!(tag = %tag, cmd = %cmd, "unknown command"),
            },
            Err(e) => warn!(error = %e, "skipping unreadable input line"),
        }
    }

    drop(tx);
    handle.shutdown().await;

    let stats = monitor.stats();
    drop(monitor);
    if let Err(e) = writer.await {
        warn!(error = %e, "output task ended abnormally");
    }

    info!(
        samples = stats.samples_ingested,
        solved = stats.positions_solved,
        fallbacks = stats.solver_fallbacks,
        decode_errors = stats.decode_errors,
        events = stats.events_emitted,
        "uwb tracker stopped"
    );
    ExitCode::SUCCESS
}
