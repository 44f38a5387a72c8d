//! End-to-end scenarios driving the full pipeline frame by frame
//!
//! Synthetic detection streams at 10 fps against the default zone
//! layout: gate area x in [0.3, 0.7], guard anchor x in [0.1, 0.25].
//! All timing flows from frame timestamps, so every run is
//! deterministic.

use gatewatch::domain::event::EventKind;
use gatewatch::domain::snapshot::FrameSnapshot;
use gatewatch::domain::types::{
    Detection, EscalationReason, ExaminationMode, FrameInput, PoseKeypoints, TicketKind,
};
use gatewatch::infra::{Clock, Config, Metrics, VirtualClock};
use gatewatch::services::{ControlCommand, Pipeline};
use std::sync::Arc;

const DT: f64 = 0.1;

/// Gate center, used by most scenarios
const VISITOR: (f64, f64) = (0.5, 0.5);
/// Guard anchor center
const ANCHOR: (f64, f64) = (0.175, 0.5);

fn det(center: (f64, f64)) -> Detection {
    Detection {
        class_id: 0,
        confidence: 0.9,
        bbox_px: [
            center.0 * 1000.0 - 50.0,
            center.1 * 1000.0 - 150.0,
            center.0 * 1000.0 + 50.0,
            center.1 * 1000.0 + 150.0,
        ],
    }
}

/// Standing pose centered on a torso, with the right wrist placed
/// explicitly
fn pose(center: (f64, f64), wrist: (f64, f64)) -> Vec<(f64, f64, f64)> {
    let (cx, cy) = center;
    let mut kps = vec![(cx, cy, 0.9); 17];
    kps[5] = (cx - 0.03, cy - 0.08, 0.9); // left shoulder
    kps[6] = (cx + 0.03, cy - 0.08, 0.9); // right shoulder
    kps[11] = (cx - 0.02, cy + 0.08, 0.9); // left hip
    kps[12] = (cx + 0.02, cy + 0.08, 0.9); // right hip
    kps[9] = (cx - 0.08, cy, 0.9); // left wrist
    kps[10] = (wrist.0, wrist.1, 0.9); // right wrist
    kps
}

struct Sim {
    pipeline: Pipeline,
    clock: VirtualClock,
    frame_id: u64,
    t: f64,
}

impl Sim {
    fn new(config: Config) -> Self {
        Self {
            pipeline: Pipeline::new(config, Arc::new(Metrics::new())),
            clock: VirtualClock::new(),
            frame_id: 0,
            t: 0.0,
        }
    }

    fn step(&mut self, people: &[(f64, f64)]) -> FrameSnapshot {
        self.step_with_pose(people, &[])
    }

    fn step_with_pose(
        &mut self,
        people: &[(f64, f64)],
        poses: &[(u64, Vec<(f64, f64, f64)>)],
    ) -> FrameSnapshot {
        self.frame_id += 1;
        self.clock.advance(DT);
        self.t = self.clock.now().secs();
        let frame = FrameInput {
            frame_id: self.frame_id,
            timestamp: self.t,
            width: 1000,
            height: 1000,
            detections: people.iter().map(|&c| det(c)).collect(),
            keypoints_by_track: poses
                .iter()
                .map(|(id, kps)| (*id, PoseKeypoints { keypoints: kps.clone() }))
                .collect(),
        };
        self.pipeline.process_frame(&frame)
    }

    fn event_count(&self, kind: EventKind) -> u64 {
        self.pipeline.event_log().count(kind)
    }
}

/// Move from one point toward another at a fixed per-frame step
fn walk(from: (f64, f64), to: (f64, f64), step: f64, frame: usize) -> (f64, f64) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let dist = (dx * dx + dy * dy).sqrt();
    let travelled = (step * frame as f64).min(dist);
    if dist < 1e-9 {
        return to;
    }
    (from.0 + dx / dist * travelled, from.1 + dy / dist * travelled)
}

// S1: one visitor, no guard anywhere. The ticket appears at the dwell
// threshold and escalates when nobody examines them.
#[test]
fn s1_unattended_visitor_escalates() {
    let mut sim = Sim::new(Config::default());

    // Before the presence threshold there is never a ticket
    for _ in 0..60 {
        let snap = sim.step(&[VISITOR]);
        assert!(snap.tickets.is_empty(), "ticket before dwell threshold at t={}", sim.t);
    }

    // The ticket lands shortly after dwell crosses 6s (track confirmation
    // delays the timer start by a few frames)
    let mut ready_at = None;
    for _ in 0..5 {
        let snap = sim.step(&[VISITOR]);
        if let Some(ticket) = snap.tickets.first() {
            assert_eq!(ticket.kind, TicketKind::Individual);
            assert_eq!(ticket.status, "waiting");
            ready_at = Some(ticket.ready_at);
            break;
        }
    }
    let ready_at = ready_at.expect("individual ticket within 6.5s");

    // Not escalated before the max wait elapses
    while sim.t < ready_at.secs() + 44.8 {
        let snap = sim.step(&[VISITOR]);
        assert!(
            snap.tickets.iter().all(|t| t.status != "escalated"),
            "early escalation at t={}",
            sim.t
        );
    }

    // At the max wait it escalates with the canonical reason
    let mut escalated = None;
    for _ in 0..6 {
        let snap = sim.step(&[VISITOR]);
        if snap.tickets.iter().any(|t| t.status == "escalated") {
            escalated = Some(snap);
            break;
        }
    }
    let snap = escalated.expect("escalation at max wait");
    let ticket = &snap.tickets[0];
    assert_eq!(ticket.escalation_reason, Some(EscalationReason::MaxWaitExceeded));
    assert_eq!(
        ticket.escalation_reason.unwrap().as_str(),
        "Maximum wait time exceeded"
    );
    assert!(snap.queue.is_empty());
    assert_eq!(snap.stats.total_escalated, 1);
    assert_eq!(sim.event_count(EventKind::TicketEscalated), 1);
    // The soft warning fired exactly once along the way
    assert_eq!(sim.event_count(EventKind::TicketWaitWarning), 1);
}

// S2: guard qualifies in the anchor, walks over, examines. The ticket
// completes and the person's check scores above threshold with pose
// evidence.
#[test]
fn s2_guarded_examination_completes() {
    let mut sim = Sim::new(Config::default());

    // Visitor (track 1) and guard (track 2) from the start
    for _ in 0..40 {
        sim.step(&[VISITOR, ANCHOR]);
    }
    let snap = sim.step(&[VISITOR, ANCHOR]);
    assert_eq!(snap.guards.len(), 1, "guard classified from anchor dwell");
    assert!(snap.guards[0].qualified, "guard qualified after 3s in anchor");

    // Guard walks up to the visitor from the anchor side and stays
    // close; visitor reaches toward the guard
    let mut checked = None;
    for i in 0..90 {
        let guard_pos = walk(ANCHOR, (0.46, 0.5), 0.04, i + 1);
        let poses = if sim.t > 6.0 {
            vec![(1, pose(VISITOR, guard_pos)), (2, pose(guard_pos, (guard_pos.0 + 0.08, 0.5)))]
        } else {
            vec![]
        };
        let snap = sim.step_with_pose(&[VISITOR, guard_pos], &poses);
        if snap.tickets.iter().any(|t| t.status == "checked") {
            checked = Some(snap);
            break;
        }
    }

    let snap = checked.expect("ticket checked");
    let ticket = &snap.tickets[0];
    assert_eq!(ticket.kind, TicketKind::Individual);
    assert!(ticket.completed_at.is_some());
    assert!(ticket.examination_duration >= 3.0);
    assert_eq!(snap.stats.total_processed, 1);
    assert_eq!(snap.stats.total_escalated, 0);

    // The person's check completed with a passing score
    assert_eq!(sim.event_count(EventKind::CheckCompleted), 1);
    let person = &snap.persons[0];
    assert!(person.score >= 0.9, "score {} below threshold", person.score);
    assert!(person.cooldown_until.is_some());
}

// S3: brief two-person encounter that never stabilizes into a group; the
// remaining visitor gets exactly one individual ticket.
#[test]
fn s3_unstable_pair_yields_single_individual_ticket() {
    let mut config = Config::default();
    // The pair stands together for under the lock window
    config.group.t_lock = 2.0;
    let mut sim = Sim::new(config);

    let p1 = (0.45, 0.5);
    let p2_start = (0.53, 0.5);

    // Both present and close from t=1.0 to t=1.8
    for _ in 0..9 {
        sim.step(&[p1]);
    }
    for _ in 0..9 {
        sim.step(&[p1, p2_start]);
    }

    // Then one walks away and out of the gate area
    for i in 0..40 {
        let p2 = walk(p2_start, (0.9, 0.5), 0.04, i + 1);
        sim.step(&[p1, p2]);
    }

    // The group formed but never earned a ticket
    assert_eq!(sim.event_count(EventKind::GroupFormed), 1);
    let snap = sim.step(&[p1]);
    assert!(snap.groups.is_empty(), "group gone after separation");
    assert!(
        snap.tickets.iter().all(|t| t.kind != TicketKind::Group),
        "no group ticket for an unstable pair"
    );

    // Remaining visitor accrues dwell and gets one individual ticket
    for _ in 0..30 {
        sim.step(&[p1]);
    }
    let snap = sim.step(&[p1]);
    let open: Vec<_> = snap
        .tickets
        .iter()
        .filter(|t| t.status == "waiting" || t.status == "assigning")
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].kind, TicketKind::Individual);
    assert_eq!(open[0].members.len(), 1);
}

fn trio() -> [(f64, f64); 3] {
    [(0.45, 0.45), (0.55, 0.45), (0.5, 0.53)]
}

// S4: three co-located visitors in batch mode with one guard: a single
// group ticket, examined as one batch, checked.
#[test]
fn s4_group_batch_examination() {
    let mut config = Config::default();
    config.examination.mode = ExaminationMode::Batch;
    let mut sim = Sim::new(config);

    let [p1, p2, p3] = trio();

    // Everyone appears; guard holds the anchor for 3.5s
    for _ in 0..35 {
        sim.step(&[p1, p2, p3, ANCHOR]);
    }
    let snap = sim.step(&[p1, p2, p3, ANCHOR]);
    assert_eq!(snap.groups.len(), 1);
    assert!(snap.groups[0].stable);
    assert_eq!(snap.groups[0].members.len(), 3);

    let group_ticket =
        snap.tickets.iter().find(|t| t.kind == TicketKind::Group).expect("group ticket");
    assert_eq!(group_ticket.examination_mode, ExaminationMode::Batch);
    assert_eq!(group_ticket.members.len(), 3);

    // Guard walks into the middle of the group and stays
    let mut checked = None;
    for i in 0..100 {
        let guard_pos = walk(ANCHOR, (0.5, 0.37), 0.04, i + 1);
        let snap = sim.step(&[p1, p2, p3, guard_pos]);
        if snap.tickets.iter().any(|t| t.status == "checked") {
            checked = Some(snap);
            break;
        }
    }

    let snap = checked.expect("batch ticket checked");
    let ticket = snap.tickets.iter().find(|t| t.kind == TicketKind::Group).unwrap();
    assert_eq!(ticket.status, "checked");
    assert!(ticket.examination_duration >= 4.0, "batch minimum is 4s");
    assert_eq!(snap.stats.total_processed, 1);
}

// S5: same trio, but one member walks away mid-examination. The group
// ticket cancels and every former member inherits an individual ticket.
#[test]
fn s5_group_split_cancels_and_fans_out() {
    let mut config = Config::default();
    config.examination.mode = ExaminationMode::Batch;
    let mut sim = Sim::new(config);

    let [p1, p2, p3_start] = trio();

    for _ in 0..35 {
        sim.step(&[p1, p2, p3_start, ANCHOR]);
    }
    let snap = sim.step(&[p1, p2, p3_start, ANCHOR]);
    let group_ready_at =
        snap.tickets.iter().find(|t| t.kind == TicketKind::Group).expect("group ticket").ready_at;

    // Guard walks over while the trio holds
    for i in 0..14 {
        let guard_pos = walk(ANCHOR, (0.5, 0.37), 0.04, i + 1);
        sim.step(&[p1, p2, p3_start, guard_pos]);
    }

    // One member walks 0.3 away and stays there
    let guard_pos = (0.5, 0.37);
    let mut split_snap = None;
    for i in 0..60 {
        let p3 = walk(p3_start, (0.85, 0.53), 0.04, i + 1);
        let snap = sim.step(&[p1, p2, p3, guard_pos]);
        if snap.tickets.iter().any(|t| t.status == "cancelled") {
            split_snap = Some(snap);
            break;
        }
    }

    let snap = split_snap.expect("group ticket cancelled by split");
    assert_eq!(sim.event_count(EventKind::GroupSplit), 1);

    let cancelled =
        snap.tickets.iter().find(|t| t.kind == TicketKind::Group).expect("group ticket");
    assert_eq!(cancelled.status, "cancelled");

    let individuals: Vec<_> =
        snap.tickets.iter().filter(|t| t.kind == TicketKind::Individual).collect();
    assert_eq!(individuals.len(), 3, "one individual ticket per former member");
    for ticket in &individuals {
        assert!(ticket.status == "waiting" || ticket.status == "assigning");
        // ready_at inherited from the cancelled group ticket
        assert_eq!(ticket.ready_at, group_ready_at);
        assert_eq!(ticket.members.len(), 1);
    }
    assert_eq!(sim.event_count(EventKind::TicketCancelled), 1);
}

// S6: the guard abandons an examination in progress. The ticket
// escalates with the guard-left reason and no check completes.
#[test]
fn s6_guard_abandons_examination() {
    let mut sim = Sim::new(Config::default());

    // Visitor waits near the gate edge so the absconding guard clears
    // the zone within a couple of frames
    let visitor = (0.66, 0.5);

    // Guard qualifies in the anchor while the visitor accrues dwell
    for _ in 0..64 {
        sim.step(&[visitor, ANCHOR]);
    }
    let snap = sim.step(&[visitor, ANCHOR]);
    assert!(snap.tickets.iter().any(|t| t.status == "assigning"), "ticket assigned by 6.5s");

    // Guard walks over and starts the examination
    let mut in_check = false;
    let mut guard_pos = ANCHOR;
    for i in 0..40 {
        guard_pos = walk(ANCHOR, (0.62, 0.5), 0.04, i + 1);
        let snap = sim.step(&[visitor, guard_pos]);
        if snap.tickets.iter().any(|t| t.status == "in_check") {
            in_check = true;
            break;
        }
    }
    assert!(in_check, "examination started");

    // Guard walks out of both gate and anchor and stays away
    let leave_from = guard_pos;
    let mut escalated = None;
    for i in 0..60 {
        let gp = walk(leave_from, (0.95, 0.95), 0.04, i + 1);
        let snap = sim.step(&[visitor, gp]);
        if snap.tickets.iter().any(|t| t.status == "escalated") {
            escalated = Some(snap);
            break;
        }
    }

    let snap = escalated.expect("ticket escalated after guard left");
    let ticket = snap.tickets.iter().find(|t| t.status == "escalated").unwrap();
    assert_eq!(ticket.escalation_reason, Some(EscalationReason::GuardLeft));
    assert_eq!(ticket.escalation_reason.unwrap().as_str(), "Guard left during examination");
    assert!(ticket.assigned_guard_id.is_none(), "guard released");
    assert!(snap.guards.iter().all(|g| g.current_ticket_id.is_none()));
    assert_eq!(snap.stats.total_processed, 0);
    assert_eq!(sim.event_count(EventKind::CheckCompleted), 0);
}

// L1: replaying the same stream through two fresh pipelines produces
// byte-identical snapshots.
#[test]
fn l1_replay_determinism() {
    let frames: Vec<FrameInput> = (0..150)
        .map(|i| {
            let guard_pos = if i < 50 { ANCHOR } else { walk(ANCHOR, (0.46, 0.5), 0.04, i - 49) };
            FrameInput {
                frame_id: i as u64 + 1,
                timestamp: (i as f64 + 1.0) * DT,
                width: 1000,
                height: 1000,
                detections: vec![det(VISITOR), det(guard_pos)],
                keypoints_by_track: vec![],
            }
        })
        .collect();

    let run = |frames: &[FrameInput]| -> Vec<String> {
        let mut pipeline = Pipeline::new(Config::default(), Arc::new(Metrics::new()));
        frames.iter().map(|f| pipeline.process_frame(f).to_json()).collect()
    };

    let first = run(&frames);
    let second = run(&frames);
    assert_eq!(first, second);
}

// L2: cancelling the same ticket twice is indistinguishable from
// cancelling it once.
#[test]
fn l2_cancel_idempotent() {
    let mut sim = Sim::new(Config::default());

    let mut ticket_id = None;
    for _ in 0..70 {
        let snap = sim.step(&[VISITOR]);
        if let Some(ticket) = snap.tickets.first() {
            ticket_id = Some(ticket.id);
            break;
        }
    }
    let ticket_id = ticket_id.expect("ticket created");

    sim.pipeline.apply_command(ControlCommand::CancelTicket {
        ticket_id,
        reason: "operator request".to_string(),
    });
    let after_first = sim.step(&[VISITOR]);

    sim.pipeline.apply_command(ControlCommand::CancelTicket {
        ticket_id,
        reason: "operator request".to_string(),
    });
    let after_second = sim.step(&[VISITOR]);

    // The second cancel changed nothing: one cancellation event, the
    // ticket stays cancelled, and the visitor's follow-up ticket (they
    // are still standing in the gate area) is untouched
    assert_eq!(sim.event_count(EventKind::TicketCancelled), 1);
    let cancelled_first =
        after_first.tickets.iter().filter(|t| t.status == "cancelled").count();
    let cancelled_second =
        after_second.tickets.iter().filter(|t| t.status == "cancelled").count();
    assert_eq!(cancelled_first, 1);
    assert_eq!(cancelled_second, 1);
    assert_eq!(after_first.tickets.len(), after_second.tickets.len());
}

// L3: empty frames advance the clock and nothing else on a fresh
// pipeline.
#[test]
fn l3_empty_frames_are_inert() {
    let mut sim = Sim::new(Config::default());

    for _ in 0..50 {
        let snap = sim.step(&[]);
        assert!(snap.tracks.is_empty());
        assert!(snap.tickets.is_empty());
        assert!(snap.persons.is_empty());
        assert_eq!(snap.counts.total_detected, 0);
    }
    assert_eq!(sim.pipeline.event_log().total_recorded(), 0);
}

// Commands: invalid polygons are rejected, the previous zones stay
// active, and a rejection event is emitted.
#[test]
fn invalid_zone_update_is_rejected() {
    use gatewatch::domain::geometry::Point;

    let mut sim = Sim::new(Config::default());
    for _ in 0..5 {
        sim.step(&[VISITOR]);
    }

    sim.pipeline.apply_command(ControlCommand::UpdateZones {
        gate_area: vec![Point::new(0.1, 0.1), Point::new(0.9, 0.1)], // two vertices
        guard_anchor: vec![Point::new(0.0, 0.0), Point::new(0.1, 0.0), Point::new(0.1, 0.1)],
    });

    assert_eq!(sim.event_count(EventKind::CommandRejected), 1);

    // Visitor at the old gate center still counts as in-gate
    let snap = sim.step(&[VISITOR]);
    assert!(snap.tracks.iter().any(|t| t.in_gate));
}

// Mode switching applies to tickets created afterwards.
#[test]
fn examination_mode_switch_applies_to_new_tickets() {
    let mut sim = Sim::new(Config::default());
    sim.pipeline.apply_command(ControlCommand::SetExaminationMode(ExaminationMode::Batch));

    let [p1, p2, p3] = trio();
    for _ in 0..20 {
        sim.step(&[p1, p2, p3]);
    }
    let snap = sim.step(&[p1, p2, p3]);
    let ticket = snap.tickets.iter().find(|t| t.kind == TicketKind::Group).expect("group ticket");
    assert_eq!(ticket.examination_mode, ExaminationMode::Batch);
}
