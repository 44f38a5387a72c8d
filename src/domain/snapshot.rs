//! Per-frame observer snapshot
//!
//! The snapshot is an immutable projection of pipeline state, copied out
//! once per frame. Observers never alias live state; dropping a snapshot
//! on a congested sink loses nothing but that frame's view.

use crate::domain::geometry::{BBox, Point};
use crate::domain::types::{
    CheckState, EscalationReason, ExaminationMode, GroupId, GuardId, MonoTs, Role, TicketId,
    TicketKind, TrackId,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TrackView {
    pub id: TrackId,
    pub role: Role,
    pub bbox_norm: BBox,
    pub in_gate: bool,
    pub in_anchor: bool,
    pub velocity: (f64, f64),
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupView {
    pub id: GroupId,
    pub members: Vec<TrackId>,
    pub stable: bool,
    pub centroid: Point,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardView {
    pub id: GuardId,
    pub backing_track_id: TrackId,
    pub qualified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ticket_id: Option<TicketId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketView {
    pub id: TicketId,
    pub kind: TicketKind,
    pub members: Vec<TrackId>,
    pub status: &'static str,
    pub examination_mode: ExaminationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_guard_id: Option<GuardId>,
    pub proximity_duration: f64,
    pub examination_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,
    pub ready_at: MonoTs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<MonoTs>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonView {
    pub track_id: TrackId,
    pub state: CheckState,
    pub dwell_in_ga: f64,
    pub guard_overlap_time: f64,
    pub interaction_time: f64,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<MonoTs>,
}

/// Zone transition counters, edge-triggered on stable track ids
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ZoneCounts {
    pub total_detected: u64,
    pub gate_entries: u64,
    pub gate_exits: u64,
    pub anchor_entries: u64,
    pub anchor_exits: u64,
    pub current_in_gate: u64,
    pub current_in_anchor: u64,
    pub total_passed_through: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub active_guards: u64,
    pub queue_length: u64,
    pub total_processed: u64,
    pub total_escalated: u64,
    pub average_wait_time: f64,
}

/// The complete per-frame snapshot emitted to observers
#[derive(Debug, Clone, Serialize)]
pub struct FrameSnapshot {
    pub frame_id: u64,
    pub monotonic_ts: MonoTs,
    pub tracks: Vec<TrackView>,
    pub groups: Vec<GroupView>,
    pub guards: Vec<GuardView>,
    pub tickets: Vec<TicketView>,
    pub queue: Vec<TicketId>,
    pub persons: Vec<PersonView>,
    pub counts: ZoneCounts,
    pub stats: QueueStats,
}

impl FrameSnapshot {
    /// Serialize to a single JSONL line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
