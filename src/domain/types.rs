//! Shared types for the gate supervisor core

use crate::domain::geometry::BBox;
use serde::{Deserialize, Serialize};

/// Newtype wrapper for track IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for guard IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GuardId(pub u64);

impl std::fmt::Display for GuardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for group IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GroupId(pub u64);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for ticket IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TicketId(pub u64);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic timestamp in seconds, as stamped by the frame source.
///
/// All domain timers derive from frame timestamps so that replaying the
/// same stream reproduces identical decisions.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MonoTs(pub f64);

impl MonoTs {
    pub const ZERO: MonoTs = MonoTs(0.0);

    #[inline]
    pub fn secs(self) -> f64 {
        self.0
    }

    /// Seconds elapsed since `earlier`; never negative.
    #[inline]
    pub fn since(self, earlier: MonoTs) -> f64 {
        (self.0 - earlier.0).max(0.0)
    }

    #[inline]
    pub fn plus(self, secs: f64) -> MonoTs {
        MonoTs(self.0 + secs)
    }
}

impl std::fmt::Display for MonoTs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Role assigned to a track by the guard classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unknown,
    Person,
    Guard,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::Person => "person",
            Role::Guard => "guard",
        }
    }
}

/// A single detector output for one frame (input to the core)
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f64,
    /// Pixel-space box `[x1, y1, x2, y2]`
    pub bbox_px: [f64; 4],
}

impl Detection {
    pub fn bbox_norm(&self, frame_w: u32, frame_h: u32) -> BBox {
        BBox::from_pixels(self.bbox_px, frame_w, frame_h)
    }
}

/// One COCO-format keypoint `(x_norm, y_norm, visibility)`
pub type Keypoint = (f64, f64, f64);

/// 17 COCO keypoints for one track, normalized coordinates
#[derive(Debug, Clone, Deserialize)]
pub struct PoseKeypoints {
    pub keypoints: Vec<Keypoint>,
}

/// One frame of input to the pipeline, produced by the frame-source adapter
#[derive(Debug, Clone, Deserialize)]
pub struct FrameInput {
    pub frame_id: u64,
    /// Monotonic timestamp in seconds
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Optional keypoints keyed by track hint from the upstream estimator
    #[serde(default)]
    pub keypoints_by_track: Vec<(u64, PoseKeypoints)>,
}

impl FrameInput {
    pub fn ts(&self) -> MonoTs {
        MonoTs(self.timestamp)
    }
}

/// Examination mode for group tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExaminationMode {
    Batch,
    Sequential,
}

impl ExaminationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExaminationMode::Batch => "batch",
            ExaminationMode::Sequential => "sequential",
        }
    }
}

/// The two configured zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    GateArea,
    GuardAnchor,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::GateArea => "gate_area",
            ZoneKind::GuardAnchor => "guard_anchor",
        }
    }
}

/// Per-person FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Idle,
    PresentInGa,
    GuardPresent,
    InteractionWindow,
    CheckCompleted,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Idle => "idle",
            CheckState::PresentInGa => "present_in_gate_area",
            CheckState::GuardPresent => "guard_present",
            CheckState::InteractionWindow => "interaction_window",
            CheckState::CheckCompleted => "check_completed",
        }
    }
}

/// Ticket kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketKind {
    Individual,
    Group,
}

impl TicketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Individual => "individual",
            TicketKind::Group => "group",
        }
    }
}

/// Machine-readable reasons for ticket escalation.
///
/// Escalations are domain outcomes, not errors; the rendered strings are
/// part of the audit contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    GuardLeft,
    MemberLeftGateArea,
    MaxWaitExceeded,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::GuardLeft => "Guard left during examination",
            EscalationReason::MemberLeftGateArea => "Member left gate area during examination",
            EscalationReason::MaxWaitExceeded => "Maximum wait time exceeded",
        }
    }
}

/// Machine-readable reasons for ticket cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    GroupSplit,
    External(String),
}

impl CancelReason {
    pub fn as_str(&self) -> &str {
        match self {
            CancelReason::GroupSplit => "Group split due to separation",
            CancelReason::External(reason) => reason,
        }
    }
}

/// Guard qualification logic selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorLogic {
    StrictAnchor,
    Either,
    NoAnchor,
}

impl AnchorLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorLogic::StrictAnchor => "strict_anchor",
            AnchorLogic::Either => "either",
            AnchorLogic::NoAnchor => "no_anchor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_ts_since() {
        let a = MonoTs(5.0);
        let b = MonoTs(7.5);
        assert!((b.since(a) - 2.5).abs() < 1e-9);
        // Never negative
        assert_eq!(a.since(b), 0.0);
    }

    #[test]
    fn test_detection_normalizes() {
        let det = Detection { class_id: 0, confidence: 0.9, bbox_px: [64.0, 36.0, 128.0, 72.0] };
        let b = det.bbox_norm(640, 360);
        assert!((b.x1 - 0.1).abs() < 1e-9);
        assert!((b.y2 - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::Person.as_str(), "person");
        assert_eq!(Role::Guard.as_str(), "guard");
        assert_eq!(Role::Unknown.as_str(), "unknown");
    }

    #[test]
    fn test_frame_input_deserialize_defaults() {
        let json = r#"{"frame_id": 1, "timestamp": 0.033, "width": 640, "height": 360}"#;
        let frame: FrameInput = serde_json::from_str(json).unwrap();
        assert_eq!(frame.frame_id, 1);
        assert!(frame.detections.is_empty());
        assert!(frame.keypoints_by_track.is_empty());
    }
}
