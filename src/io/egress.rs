//! Snapshot and event egress - writes pipeline output to JSONL files
//!
//! Writers run off the hot path: the pipeline enqueues into bounded
//! channels with `try_send` and drops on congestion, so file I/O can
//! never stall the frame loop.

use crate::domain::event::Event;
use crate::domain::snapshot::FrameSnapshot;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Appends JSONL lines to a file, creating parent directories on demand
struct JsonlAppender {
    file_path: String,
}

impl JsonlAppender {
    fn new(file_path: &str) -> Self {
        Self { file_path: file_path.to_string() }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        debug!(file = %self.file_path, bytes = %line.len(), "egress_written");
        Ok(())
    }
}

/// Worker draining snapshots to a JSONL file
pub struct SnapshotWriter {
    appender: JsonlAppender,
    rx: mpsc::Receiver<FrameSnapshot>,
}

impl SnapshotWriter {
    pub async fn run(mut self) {
        info!("snapshot_writer_started");
        while let Some(snapshot) = self.rx.recv().await {
            let line = snapshot.to_json();
            if let Err(e) = self.appender.append_line(&line) {
                error!(frame_id = %snapshot.frame_id, error = %e, "snapshot_egress_failed");
            }
        }
        info!("snapshot_writer_stopped");
    }
}

/// Create a snapshot egress channel and its writer
///
/// Returns the sender (for the pipeline) and the worker (to be spawned)
pub fn create_snapshot_writer(
    file_path: &str,
    buffer_size: usize,
) -> (mpsc::Sender<FrameSnapshot>, SnapshotWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    info!(file_path = %file_path, "snapshot_egress_initialized");
    (tx, SnapshotWriter { appender: JsonlAppender::new(file_path), rx })
}

/// Worker draining events to a JSONL file
pub struct EventWriter {
    appender: JsonlAppender,
    rx: mpsc::Receiver<Event>,
}

impl EventWriter {
    pub async fn run(mut self) {
        info!("event_writer_started");
        while let Some(event) = self.rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => {
                    if let Err(e) = self.appender.append_line(&line) {
                        error!(kind = %event.kind.as_str(), error = %e, "event_egress_failed");
                    }
                }
                Err(e) => error!(error = %e, "event_serialize_failed"),
            }
        }
        info!("event_writer_stopped");
    }
}

/// Create an event egress channel and its writer
pub fn create_event_writer(
    file_path: &str,
    buffer_size: usize,
) -> (mpsc::Sender<Event>, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    info!(file_path = %file_path, "event_egress_initialized");
    (tx, EventWriter { appender: JsonlAppender::new(file_path), rx })
}
