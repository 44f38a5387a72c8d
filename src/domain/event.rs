//! Micro-event model for the audit stream
//!
//! Events are a closed sum type: every kind carries exactly the data its
//! trigger produces. The JSON rendering with a free-form metadata map is a
//! presentation veneer on top, not the model.

use crate::domain::geometry::Point;
use crate::domain::types::{
    CancelReason, CheckState, EscalationReason, GroupId, GuardId, MonoTs, TicketId, TicketKind,
    TrackId, ZoneKind,
};
use serde::Serialize;

/// Event kinds emitted by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PersonEnteredGa,
    PersonExitedGa,
    GuardAnchored,
    GuardLeftAnchor,
    ContactStarted,
    ContactEnded,
    PoseReach,
    StateChanged,
    CheckCompleted,
    SessionTimeout,
    TicketCreated,
    TicketAssigned,
    TicketEscalated,
    TicketCancelled,
    TicketWaitWarning,
    GroupFormed,
    GroupSplit,
    CommandRejected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PersonEnteredGa => "person_entered_ga",
            EventKind::PersonExitedGa => "person_exited_ga",
            EventKind::GuardAnchored => "guard_anchored",
            EventKind::GuardLeftAnchor => "guard_left_anchor",
            EventKind::ContactStarted => "contact_started",
            EventKind::ContactEnded => "contact_ended",
            EventKind::PoseReach => "pose_reach",
            EventKind::StateChanged => "state_changed",
            EventKind::CheckCompleted => "check_completed",
            EventKind::SessionTimeout => "session_timeout",
            EventKind::TicketCreated => "ticket_created",
            EventKind::TicketAssigned => "ticket_assigned",
            EventKind::TicketEscalated => "ticket_escalated",
            EventKind::TicketCancelled => "ticket_cancelled",
            EventKind::TicketWaitWarning => "ticket_wait_warning",
            EventKind::GroupFormed => "group_formed",
            EventKind::GroupSplit => "group_split",
            EventKind::CommandRejected => "command_rejected",
        }
    }

    /// Index for the incremental per-kind counters
    pub const COUNT: usize = 18;

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Kind-specific event payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "detail")]
pub enum EventDetail {
    None,
    Contact {
        center_distance: f64,
        iou: f64,
    },
    ContactSummary {
        duration: f64,
        min_center_distance: f64,
        max_iou: f64,
        avg_center_distance: f64,
        avg_iou: f64,
    },
    StateChange {
        from: CheckState,
        to: CheckState,
    },
    Completion {
        dwell_in_ga: f64,
        guard_overlap_time: f64,
        interaction_time: f64,
        min_center_distance: f64,
        max_iou: f64,
        pose_reach_count: u32,
        score: f64,
    },
    Ticket {
        ticket_id: TicketId,
        kind: TicketKind,
        wait_secs: f64,
    },
    TicketAssignment {
        ticket_id: TicketId,
        guard_id: GuardId,
    },
    Escalation {
        ticket_id: TicketId,
        reason: EscalationReason,
    },
    Cancellation {
        ticket_id: TicketId,
        reason: CancelReason,
    },
    Group {
        group_id: GroupId,
        members: Vec<TrackId>,
    },
    Rejection {
        command: &'static str,
        reason: String,
    },
}

/// A single micro-event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub ts: MonoTs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_track_id: Option<TrackId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    pub confidence: f64,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl Event {
    pub fn new(kind: EventKind, ts: MonoTs) -> Self {
        Self {
            kind,
            ts,
            track_id: None,
            related_track_id: None,
            zone: None,
            position: None,
            confidence: 1.0,
            detail: EventDetail::None,
        }
    }

    pub fn with_track(mut self, track_id: TrackId) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn with_related(mut self, track_id: TrackId) -> Self {
        self.related_track_id = Some(track_id);
        self
    }

    pub fn with_zone(mut self, zone: ZoneKind, position: Point) -> Self {
        self.zone = Some(zone);
        self.position = Some(position);
        self
    }

    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = detail;
        self
    }
}

/// Running contact metrics for one `(visitor, guard)` pair
#[derive(Debug, Clone, Serialize)]
pub struct ContactSession {
    pub visitor: TrackId,
    pub guard: TrackId,
    pub started_at: MonoTs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<MonoTs>,
    pub min_center_distance: f64,
    pub max_iou: f64,
    pub avg_center_distance: f64,
    pub avg_iou: f64,
    pub samples: u64,
}

impl ContactSession {
    pub fn new(visitor: TrackId, guard: TrackId, started_at: MonoTs) -> Self {
        Self {
            visitor,
            guard,
            started_at,
            ended_at: None,
            min_center_distance: f64::INFINITY,
            max_iou: 0.0,
            avg_center_distance: 0.0,
            avg_iou: 0.0,
            samples: 0,
        }
    }

    /// Fold in one frame's contact metrics
    pub fn update(&mut self, center_distance: f64, iou: f64) {
        self.min_center_distance = self.min_center_distance.min(center_distance);
        self.max_iou = self.max_iou.max(iou);

        // Running means; sample lists are not retained
        let n = self.samples as f64;
        self.avg_center_distance = (self.avg_center_distance * n + center_distance) / (n + 1.0);
        self.avg_iou = (self.avg_iou * n + iou) / (n + 1.0);
        self.samples += 1;
    }

    pub fn duration(&self, now: MonoTs) -> f64 {
        match self.ended_at {
            Some(end) => end.since(self.started_at),
            None => now.since(self.started_at),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn end(&mut self, now: MonoTs) {
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
    }
}
