//! Gatewatch - real-time gate-security supervisor
//!
//! Turns per-frame detections into temporally stable examination
//! decisions: tracking, zone reasoning, group detection, per-person
//! state machines, and ticket-based queue management.
//!
//! Module structure:
//! - `domain/` - Core business types (tracks, tickets, events, snapshots)
//! - `io/` - External interfaces (frame sources, JSONL egress)
//! - `services/` - Per-frame logic (tracker, FSM, tickets, pipeline)
//! - `infra/` - Infrastructure (config, clock, metrics)

use clap::Parser;
use gatewatch::infra::{Config, Metrics};
use gatewatch::io::{create_event_writer, create_snapshot_writer, JsonlFrameSource};
use gatewatch::services::{ControlCommand, Pipeline};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Gatewatch - gate-security examination supervisor
#[derive(Parser, Debug)]
#[command(name = "gatewatch", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Detection stream to replay (JSONL, one frame per line)
    #[arg(short, long)]
    frames: String,

    /// Pace replay to the recorded frame timestamps
    #[arg(long, default_value_t = false)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = option_env!("GIT_HASH").unwrap_or("unknown"),
        "gatewatch_starting"
    );

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site_id = %config.site.id,
        anchor_logic = %config.guard.anchor_logic.as_str(),
        examination_mode = %config.examination.mode.as_str(),
        presence_to_check = %config.presence.presence_to_check,
        t_max_wait = %config.queue.t_max_wait,
        snapshot_file = %config.egress.snapshot_file,
        events_file = %config.egress.events_file,
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    // Egress writers run off the frame loop; congestion costs snapshots,
    // never frames
    let (snapshot_tx, snapshot_writer) =
        create_snapshot_writer(&config.egress.snapshot_file, 64);
    tokio::spawn(async move {
        snapshot_writer.run().await;
    });

    let (event_tx, event_writer) = create_event_writer(&config.egress.events_file, 256);
    tokio::spawn(async move {
        event_writer.run().await;
    });

    // Control command channel: external callers cancel tickets, swap
    // zones, switch modes; the pipeline applies them at frame boundaries
    let (command_tx, command_rx) = mpsc::channel::<ControlCommand>(64);

    // Ctrl+C requests a cooperative stop between frames
    let shutdown_tx = command_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(ControlCommand::Stop).await;
    });

    // Periodic metrics reporter
    let report_metrics = metrics.clone();
    let report_interval = config.metrics.interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(report_interval));
        loop {
            interval.tick().await;
            report_metrics.report(0, 0).log();
        }
    });

    let source = JsonlFrameSource::open(&args.frames, args.realtime)?;

    let mut pipeline = Pipeline::new(config, metrics)
        .with_command_channel(command_rx)
        .with_snapshot_sink(snapshot_tx)
        .with_event_sink(event_tx);

    info!("pipeline_run_starting");
    pipeline.run(Box::new(source)).await;

    info!("gatewatch shutdown complete");
    Ok(())
}
