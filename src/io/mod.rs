//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `frames` - frame sources (JSONL replay, in-memory)
//! - `egress` - snapshot and event output to file (JSONL format)

pub mod egress;
pub mod frames;

// Re-export commonly used types
pub use egress::{create_event_writer, create_snapshot_writer, EventWriter, SnapshotWriter};
pub use frames::{FrameSource, JsonlFrameSource, VecFrameSource};
