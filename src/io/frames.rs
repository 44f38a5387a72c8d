//! Frame sources
//!
//! The core never touches video: an adapter decodes frames, runs the
//! detector, and hands the pipeline `FrameInput` records. The only
//! built-in source replays detection streams from a JSONL file, one
//! frame object per line, which is also how recorded streams are fed
//! back for deterministic reruns.

use crate::domain::types::{FrameInput, MonoTs};
use crate::infra::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` when the stream ends
    async fn next_frame(&mut self) -> Option<FrameInput>;
}

/// Replays frames from a JSONL file
pub struct JsonlFrameSource {
    lines: Lines<BufReader<File>>,
    /// Sleep between frames to match recorded timestamps
    realtime: bool,
    clock: Arc<dyn Clock>,
    /// Clock reading and recorded timestamp at the first frame
    origin: Option<(MonoTs, f64)>,
    line_no: u64,
}

impl JsonlFrameSource {
    pub fn open(path: impl AsRef<Path>, realtime: bool) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!(path = %path.display(), realtime = %realtime, "frame_source_opened");
        Ok(Self {
            lines: BufReader::new(file).lines(),
            realtime,
            clock: Arc::new(SystemClock::new()),
            origin: None,
            line_no: 0,
        })
    }

    /// Replace the pacing clock (tests, embedding)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn pace(&mut self, frame_ts: f64) {
        let (clock_origin, ts_origin) = *self.origin.get_or_insert((self.clock.now(), frame_ts));
        let target = frame_ts - ts_origin;
        let elapsed = self.clock.now().since(clock_origin);
        if target > elapsed {
            tokio::time::sleep(std::time::Duration::from_secs_f64(target - elapsed)).await;
        }
    }
}

#[async_trait]
impl FrameSource for JsonlFrameSource {
    async fn next_frame(&mut self) -> Option<FrameInput> {
        loop {
            self.line_no += 1;
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!(line = %self.line_no, error = %e, "frame_read_failed");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<FrameInput>(&line) {
                Ok(frame) => {
                    if self.realtime {
                        self.pace(frame.timestamp).await;
                    }
                    return Some(frame);
                }
                Err(e) => {
                    // A malformed line loses that frame, not the stream
                    warn!(line = %self.line_no, error = %e, "frame_parse_failed");
                }
            }
        }
    }
}

/// In-memory source for tests and embedding
pub struct VecFrameSource {
    frames: std::vec::IntoIter<FrameInput>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<FrameInput>) -> Self {
        Self { frames: frames.into_iter() }
    }
}

#[async_trait]
impl FrameSource for VecFrameSource {
    async fn next_frame(&mut self) -> Option<FrameInput> {
        self.frames.next()
    }
}
