//! Per-frame orchestration
//!
//! One pipeline drives one stream: detections in, decisions and
//! snapshots out. All state mutation happens on this worker; control
//! commands from other tasks land in an MPSC channel and apply at frame
//! boundaries. Sinks are lossy by construction: a congested observer
//! costs a snapshot, never a frame.

use crate::domain::event::{Event, EventDetail, EventKind};
use crate::domain::geometry::{center_distance_normalized, iou, Point};
use crate::domain::snapshot::{
    FrameSnapshot, GroupView, GuardView, PersonView, QueueStats, TicketView, TrackView, ZoneCounts,
};
use crate::domain::types::{
    AnchorLogic, CancelReason, EscalationReason, ExaminationMode, FrameInput, GroupId, GuardId,
    MonoTs, Role, TicketId, TrackId, ZoneKind,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::frames::FrameSource;
use crate::services::event_log::EventLog;
use crate::services::filter::JitterFilter;
use crate::services::fsm::{PersonFrameInput, PersonFsm};
use crate::services::groups::{GroupDetector, PersonObs};
use crate::services::guards::{GuardClassifier, RoleChange};
use crate::services::pose::PoseAdapter;
use crate::services::score::ScoreEngine;
use crate::services::tickets::{GuardObs, MemberObs, TicketManager};
use crate::services::tracker::{Tracker, TrackerInput};
use crate::services::zones::{ZoneModel, ZonePresence};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Terminal tickets retained for observers before pruning
const TERMINAL_TICKET_RETENTION: usize = 512;

/// Control commands applied at frame boundaries
#[derive(Debug, Clone)]
pub enum ControlCommand {
    UpdateZones { gate_area: Vec<Point>, guard_anchor: Vec<Point> },
    SetExaminationMode(ExaminationMode),
    SetAnchorLogic(AnchorLogic),
    CancelTicket { ticket_id: TicketId, reason: String },
    ResetCounts,
    Stop,
}

pub struct Pipeline {
    config: Config,
    zones: ZoneModel,
    filter: JitterFilter,
    tracker: Tracker,
    pose: PoseAdapter,
    groups: GroupDetector,
    guards: GuardClassifier,
    fsm: PersonFsm,
    tickets: TicketManager,
    event_log: EventLog,
    metrics: Arc<Metrics>,

    examination_mode: ExaminationMode,
    counts: ZoneCounts,
    /// Previous zone presence per track, for edge-triggered counting
    prev_zone: FxHashMap<TrackId, ZonePresence>,
    /// Confirmed tracks already counted into `total_detected`
    seen_confirmed: FxHashSet<TrackId>,
    /// Tracks whose reach gesture was already reported this contact
    reach_reported: FxHashSet<TrackId>,
    last_frame_ts: Option<MonoTs>,
    stopped: bool,

    command_rx: Option<mpsc::Receiver<ControlCommand>>,
    snapshot_tx: Option<mpsc::Sender<FrameSnapshot>>,
    events_tx: Option<mpsc::Sender<Event>>,
}

impl Pipeline {
    pub fn new(config: Config, metrics: Arc<Metrics>) -> Self {
        let zones = ZoneModel::new(config.gate_area_polygon(), config.guard_anchor_polygon());
        let filter = JitterFilter::new(config.noise_filtering.jitter_window);
        let tracker = Tracker::new(config.tracking.clone());
        let pose = PoseAdapter::new(config.pose.clone());
        let groups = GroupDetector::new(config.group.clone());
        let guards = GuardClassifier::new(config.guard.clone());
        let fsm = PersonFsm::new(
            config.presence.clone(),
            config.session.clone(),
            config.noise_filtering.min_consensus,
            config.guard.guard_ready,
            ScoreEngine::new(config.score.clone(), config.proximity.clone()),
        );
        let tickets = TicketManager::new(
            config.presence.clone(),
            config.queue.clone(),
            config.group.d_max,
        );
        let event_log = EventLog::new(config.event_log.capacity);
        let examination_mode = config.examination.mode;

        Self {
            config,
            zones,
            filter,
            tracker,
            pose,
            groups,
            guards,
            fsm,
            tickets,
            event_log,
            metrics,
            examination_mode,
            counts: ZoneCounts::default(),
            prev_zone: FxHashMap::default(),
            seen_confirmed: FxHashSet::default(),
            reach_reported: FxHashSet::default(),
            last_frame_ts: None,
            stopped: false,
            command_rx: None,
            snapshot_tx: None,
            events_tx: None,
        }
    }

    pub fn with_command_channel(mut self, rx: mpsc::Receiver<ControlCommand>) -> Self {
        self.command_rx = Some(rx);
        self
    }

    pub fn with_snapshot_sink(mut self, tx: mpsc::Sender<FrameSnapshot>) -> Self {
        self.snapshot_tx = Some(tx);
        self
    }

    pub fn with_event_sink(mut self, tx: mpsc::Sender<Event>) -> Self {
        self.events_tx = Some(tx);
        self
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Consume frames until the source ends or a stop command arrives
    pub async fn run(&mut self, mut source: Box<dyn FrameSource>) {
        info!("pipeline_started");
        loop {
            self.drain_commands();
            if self.stopped {
                break;
            }

            let Some(frame) = source.next_frame().await else {
                info!("frame_source_exhausted");
                break;
            };

            let process_start = Instant::now();
            let snapshot = self.process_frame(&frame);
            let latency_us = process_start.elapsed().as_micros() as u64;
            self.metrics.record_frame_processed(latency_us);

            self.publish_snapshot(snapshot);
        }
        info!(frames = %self.metrics.frames_total(), "pipeline_stopped");
    }

    /// Apply all queued control commands; called at each frame boundary
    pub fn drain_commands(&mut self) {
        let Some(rx) = self.command_rx.as_mut() else { return };

        let mut pending = Vec::new();
        while let Ok(command) = rx.try_recv() {
            pending.push(command);
        }
        for command in pending {
            self.apply_command(command);
        }
    }

    pub fn apply_command(&mut self, command: ControlCommand) {
        let now = self.last_frame_ts.unwrap_or(MonoTs::ZERO);
        match command {
            ControlCommand::UpdateZones { gate_area, guard_anchor } => {
                match self.zones.update(gate_area, guard_anchor) {
                    Ok(()) => self.metrics.record_command_applied(),
                    Err(reason) => {
                        warn!(reason = %reason, "zone_update_rejected");
                        self.metrics.record_command_rejected();
                        let event = Event::new(EventKind::CommandRejected, now).with_detail(
                            EventDetail::Rejection { command: "update_zones", reason },
                        );
                        self.event_log.record(&event);
                        self.publish_event(event);
                    }
                }
            }
            ControlCommand::SetExaminationMode(mode) => {
                info!(mode = %mode.as_str(), "examination_mode_changed");
                self.examination_mode = mode;
                self.metrics.record_command_applied();
            }
            ControlCommand::SetAnchorLogic(logic) => {
                info!(logic = %logic.as_str(), "anchor_logic_changed");
                self.guards.set_anchor_logic(logic);
                self.metrics.record_command_applied();
            }
            ControlCommand::CancelTicket { ticket_id, reason } => {
                let result = self.tickets.cancel(ticket_id, reason.clone(), now);
                if let Some(guard_id) = result.released_guard {
                    self.guards.set_current_ticket(guard_id, None);
                }
                if result.cancelled {
                    self.metrics.record_command_applied();
                    let event = Event::new(EventKind::TicketCancelled, now).with_detail(
                        EventDetail::Cancellation {
                            ticket_id,
                            reason: CancelReason::External(reason),
                        },
                    );
                    self.event_log.record(&event);
                    self.publish_event(event);
                }
            }
            ControlCommand::ResetCounts => {
                info!("counts_reset");
                self.counts = ZoneCounts::default();
                self.seen_confirmed.clear();
                self.metrics.record_command_applied();
            }
            ControlCommand::Stop => {
                info!("stop_command_received");
                self.stopped = true;
            }
        }
    }

    /// Process one frame synchronously. Deterministic: identical frame
    /// streams produce identical snapshot streams.
    pub fn process_frame(&mut self, frame: &FrameInput) -> FrameSnapshot {
        let now = frame.ts();
        let dt = match self.last_frame_ts {
            Some(last) => now.since(last).clamp(0.001, 1.0),
            None => 0.001,
        };
        self.last_frame_ts = Some(now);

        let mut frame_events: Vec<Event> = Vec::new();

        // Sessions stale across a source gap resolve before new input
        for track_id in self.fsm.timeout_sweep(now) {
            let event = Event::new(EventKind::SessionTimeout, now).with_track(track_id);
            self.event_log.record(&event);
            frame_events.push(event);
        }

        // 1. Ingest detections: class allow-list and minimum box height
        let min_height_norm =
            self.config.noise_filtering.min_box_height_px as f64 / frame.height.max(1) as f64;
        let inputs: Vec<TrackerInput> = frame
            .detections
            .iter()
            .filter(|d| self.config.noise_filtering.person_classes.contains(&d.class_id))
            .map(|d| TrackerInput {
                bbox: d.bbox_norm(frame.width, frame.height),
                confidence: d.confidence,
                class_id: d.class_id,
            })
            .filter(|input| input.bbox.height() >= min_height_norm)
            .collect();

        // 2. Tracking
        let active: Vec<TrackId> = self.tracker.update(&inputs, now);

        for &track_id in &active {
            if self.seen_confirmed.insert(track_id) {
                self.counts.total_detected += 1;
            }
        }

        // 3. Smoothed centers and zone presence
        let mut centers: FxHashMap<TrackId, Point> = FxHashMap::default();
        let mut presence: FxHashMap<TrackId, ZonePresence> = FxHashMap::default();
        for &track_id in &active {
            let Some(track) = self.tracker.get(track_id) else { continue };
            self.filter.add_position(track_id, track.center());
            let center = self.filter.smoothed(track_id).unwrap_or_else(|| track.center());
            centers.insert(track_id, center);
            presence.insert(track_id, self.zones.classify(center));
        }

        // 4. Roles
        for &track_id in &active {
            let p = presence[&track_id];
            match self.guards.observe(track_id, p.in_guard_anchor, p.in_gate_area, dt, now) {
                Some(RoleChange::Promoted(id)) => {
                    self.tracker.set_role(id, Role::Guard);
                    // A guard is not a visitor; its person record goes away
                    self.fsm.remove(id);
                }
                Some(RoleChange::Downgraded(id)) => self.tracker.set_role(id, Role::Person),
                None => {
                    let Some(track) = self.tracker.get(track_id) else { continue };
                    if track.role == Role::Unknown {
                        self.tracker.set_role(track_id, Role::Person);
                    }
                }
            }
        }

        // Zone transition counters and enter/exit events
        self.count_zone_transitions(&active, &presence, &centers, now, &mut frame_events);

        // 5. Groups over person-role tracks
        let person_obs: Vec<PersonObs> = active
            .iter()
            .filter_map(|&id| {
                let track = self.tracker.get(id)?;
                if track.role != Role::Person {
                    return None;
                }
                Some(PersonObs {
                    track_id: id,
                    center: centers[&id],
                    bbox: track.bbox,
                    first_seen: track.first_seen,
                    in_gate_area: presence[&id].in_gate_area,
                })
            })
            .collect();

        let group_result = self.groups.update(&person_obs, now);
        for group_id in &group_result.formed {
            if let Some(group) = self.groups.get(*group_id) {
                let event = Event::new(EventKind::GroupFormed, now).with_detail(
                    EventDetail::Group { group_id: *group_id, members: group.members.to_vec() },
                );
                self.event_log.record(&event);
                frame_events.push(event);
            }
        }
        for group in &group_result.split {
            let event = Event::new(EventKind::GroupSplit, now).with_detail(EventDetail::Group {
                group_id: group.group_id,
                members: group.members.to_vec(),
            });
            self.event_log.record(&event);
            frame_events.push(event);

            let split = self.tickets.handle_group_split(group.group_id, &group.members, now);
            if let Some(guard_id) = split.released_guard {
                self.guards.set_current_ticket(guard_id, None);
            }
            if let Some(ticket_id) = split.cancelled {
                let event = Event::new(EventKind::TicketCancelled, now).with_detail(
                    EventDetail::Cancellation {
                        ticket_id,
                        reason: CancelReason::GroupSplit,
                    },
                );
                self.event_log.record(&event);
                frame_events.push(event);
            }
            for ticket_id in split.created {
                self.push_ticket_created(ticket_id, now, &mut frame_events);
            }
        }

        // 6. Pose ingestion (hints map onto tracker ids via the adapter)
        for (hint, keypoints) in &frame.keypoints_by_track {
            let track_id = TrackId(*hint);
            if active.contains(&track_id) {
                self.pose.ingest(track_id, keypoints.keypoints.clone(), now);
            }
        }

        // 7. Person FSMs
        let qualified: Vec<(GuardId, Point)> = self
            .guards
            .qualified_guards()
            .into_iter()
            .filter_map(|(guard_id, track_id)| Some((guard_id, *centers.get(&track_id)?)))
            .collect();

        let mut contact_pairs: Vec<(TrackId, TrackId)> = Vec::new();
        for obs in &person_obs {
            let track_id = obs.track_id;
            let selected = PersonFsm::select_guard(obs.center, &qualified);

            let mut input = PersonFrameInput {
                in_gate_area: obs.in_gate_area,
                selected_guard: selected,
                ..Default::default()
            };

            if let Some(guard_id) = selected {
                if let Some(guard_track) = self.guards.backing_track(guard_id) {
                    if let Some(guard) = self.tracker.get(guard_track) {
                        let guard_bbox = guard.bbox;
                        let Some(person) = self.tracker.get(track_id) else { continue };
                        let dist = center_distance_normalized(&person.bbox, &guard_bbox);
                        let overlap = iou(&person.bbox, &guard_bbox);
                        let in_contact = dist <= self.config.proximity.center_dist_scale
                            || overlap >= self.config.proximity.iou_min;

                        input.contact_metrics = Some((dist, overlap));
                        input.in_contact = in_contact;

                        if in_contact {
                            contact_pairs.push((track_id, guard_track));
                            if let Some(event) =
                                self.event_log.update_contact(track_id, guard_track, dist, overlap, now)
                            {
                                frame_events.push(event);
                            }
                        }

                        let hand = self.pose.hand_to_torso(track_id, guard_track, &guard_bbox);
                        let reach = self.pose.reach_gesture(track_id, guard_track, &guard_bbox);
                        input.pose_detected = hand || reach;

                        if reach && self.reach_reported.insert(track_id) {
                            let event = Event::new(EventKind::PoseReach, now)
                                .with_track(track_id)
                                .with_related(guard_track);
                            self.event_log.record(&event);
                            frame_events.push(event);
                        } else if !reach {
                            self.reach_reported.remove(&track_id);
                        }
                    }
                }
            }

            let decision = self.fsm.update(track_id, input, dt, now);
            if decision.state_changed() {
                let event = Event::new(EventKind::StateChanged, now).with_track(track_id).with_detail(
                    EventDetail::StateChange { from: decision.prev_state, to: decision.state },
                );
                self.event_log.record(&event);
                frame_events.push(event);
            }
            if let Some(record) = decision.completed {
                let event = Event::new(EventKind::CheckCompleted, now)
                    .with_track(track_id)
                    .with_detail(EventDetail::Completion {
                        dwell_in_ga: record.dwell_in_ga,
                        guard_overlap_time: record.guard_overlap_time,
                        interaction_time: record.interaction_time,
                        min_center_distance: record.min_center_distance,
                        max_iou: record.max_iou,
                        pose_reach_count: record.pose_reach_count,
                        score: record.score,
                    });
                let event = match record.guard_id.and_then(|g| self.guards.backing_track(g)) {
                    Some(guard_track) => event.with_related(guard_track),
                    None => event,
                };
                self.event_log.record(&event);
                frame_events.push(event);
            }
        }

        frame_events.extend(self.event_log.close_stale_contacts(&contact_pairs, now));

        // 8. Guard qualification
        for change in self.guards.update_qualification(now) {
            let kind = if change.qualified {
                EventKind::GuardAnchored
            } else {
                EventKind::GuardLeftAnchor
            };
            let event = Event::new(kind, now).with_track(change.track_id);
            self.event_log.record(&event);
            frame_events.push(event);
        }

        // 9. Tickets
        self.run_ticket_stage(&person_obs, &centers, now, &mut frame_events);

        // 10. Cleanup for tracks that aged out
        self.fsm.retain(&active);
        self.filter.retain(&active);
        self.pose.retain(&active);
        self.guards.retain(&active);
        self.reach_reported.retain(|id| active.contains(id));
        self.tickets.prune_terminal(TERMINAL_TICKET_RETENTION);

        self.counts.current_in_gate =
            presence.values().filter(|p| p.in_gate_area).count() as u64;
        self.counts.current_in_anchor =
            presence.values().filter(|p| p.in_guard_anchor).count() as u64;

        #[cfg(debug_assertions)]
        self.assert_invariants();

        for event in frame_events {
            self.publish_event(event);
        }

        // 11. Snapshot
        self.build_snapshot(frame.frame_id, now, &active, &presence)
    }

    fn count_zone_transitions(
        &mut self,
        active: &[TrackId],
        presence: &FxHashMap<TrackId, ZonePresence>,
        centers: &FxHashMap<TrackId, Point>,
        now: MonoTs,
        frame_events: &mut Vec<Event>,
    ) {
        for &track_id in active {
            let current = presence[&track_id];
            let previous = self.prev_zone.get(&track_id).copied().unwrap_or_default();
            let is_guard = self.guards.is_guard(track_id);

            if current.in_gate_area && !previous.in_gate_area {
                self.counts.gate_entries += 1;
                if !is_guard {
                    let event = Event::new(EventKind::PersonEnteredGa, now)
                        .with_track(track_id)
                        .with_zone(ZoneKind::GateArea, centers[&track_id]);
                    self.event_log.record(&event);
                    frame_events.push(event);
                }
            } else if !current.in_gate_area && previous.in_gate_area {
                self.counts.gate_exits += 1;
                self.counts.total_passed_through += 1;
                if !is_guard {
                    let event = Event::new(EventKind::PersonExitedGa, now)
                        .with_track(track_id)
                        .with_zone(ZoneKind::GateArea, centers[&track_id]);
                    self.event_log.record(&event);
                    frame_events.push(event);
                }
            }

            if current.in_guard_anchor && !previous.in_guard_anchor {
                self.counts.anchor_entries += 1;
            } else if !current.in_guard_anchor && previous.in_guard_anchor {
                self.counts.anchor_exits += 1;
            }

            self.prev_zone.insert(track_id, current);
        }

        // Tracks that expired while inside a zone leave silently: the
        // occupancy counters stay balanced but no exit event is emitted
        let gone: Vec<TrackId> =
            self.prev_zone.keys().filter(|id| !active.contains(id)).copied().collect();
        for track_id in gone {
            if let Some(previous) = self.prev_zone.remove(&track_id) {
                if previous.in_gate_area {
                    self.counts.gate_exits += 1;
                    self.counts.total_passed_through += 1;
                }
                if previous.in_guard_anchor {
                    self.counts.anchor_exits += 1;
                }
            }
        }
    }

    fn run_ticket_stage(
        &mut self,
        person_obs: &[PersonObs],
        centers: &FxHashMap<TrackId, Point>,
        now: MonoTs,
        frame_events: &mut Vec<Event>,
    ) {
        // Individual tickets: gate-area persons past the dwell threshold,
        // outside any stable group
        let stable_members = self.groups.stable_member_ids(now);
        let eligible: Vec<TrackId> = person_obs
            .iter()
            .filter(|obs| obs.in_gate_area && !stable_members.contains(&obs.track_id))
            .filter(|obs| {
                self.fsm
                    .get(obs.track_id)
                    .map(|s| s.dwell_in_ga >= self.config.presence.presence_to_check)
                    .unwrap_or(false)
            })
            .map(|obs| obs.track_id)
            .collect();

        for ticket_id in self.tickets.create_individual_tickets(&eligible, now) {
            self.push_ticket_created(ticket_id, now, frame_events);
        }

        // Group tickets for stable, currently co-located groups; a group
        // mid-separation must not be ticketed while its split is pending
        let stable_groups: Vec<(GroupId, SmallVec<[TrackId; 4]>)> = self
            .groups
            .groups_sorted()
            .into_iter()
            .filter(|g| g.is_stable(now, self.groups.t_lock()) && !g.is_separated())
            .map(|g| (g.group_id, g.members.clone()))
            .collect();

        for ticket_id in
            self.tickets.create_group_tickets(&stable_groups, self.examination_mode, now)
        {
            self.push_ticket_created(ticket_id, now, frame_events);
        }

        // Assignment, FIFO over available qualified guards
        let available = self.guards.available_guards();
        for (ticket_id, guard_id) in self.tickets.assign_waiting(&available, now) {
            self.guards.set_current_ticket(guard_id, Some(ticket_id));
            let event = Event::new(EventKind::TicketAssigned, now)
                .with_detail(EventDetail::TicketAssignment { ticket_id, guard_id });
            self.event_log.record(&event);
            frame_events.push(event);
        }

        // Progress evaluation
        let members: FxHashMap<TrackId, MemberObs> = person_obs
            .iter()
            .map(|obs| {
                (obs.track_id, MemberObs { center: obs.center, in_gate_area: obs.in_gate_area })
            })
            .collect();
        let guards: FxHashMap<GuardId, GuardObs> = self
            .guards
            .guards_sorted()
            .into_iter()
            .map(|g| {
                (
                    g.guard_id,
                    GuardObs {
                        center: centers.get(&g.backing_track_id).copied(),
                        qualified: g.qualified,
                    },
                )
            })
            .collect();

        let progress = self.tickets.progress(&members, &guards, now);
        for guard_id in &progress.released_guards {
            self.guards.set_current_ticket(*guard_id, None);
        }
        for (ticket_id, reason) in progress.escalated {
            let event = Event::new(EventKind::TicketEscalated, now)
                .with_detail(EventDetail::Escalation { ticket_id, reason });
            self.event_log.record(&event);
            frame_events.push(event);
        }

        // Wait-time sweep
        let sweep = self.tickets.sweep(now);
        for ticket_id in sweep.escalated {
            let event = Event::new(EventKind::TicketEscalated, now).with_detail(
                EventDetail::Escalation {
                    ticket_id,
                    reason: EscalationReason::MaxWaitExceeded,
                },
            );
            self.event_log.record(&event);
            frame_events.push(event);
        }
        for ticket_id in sweep.warned {
            if let Some(ticket) = self.tickets.get(ticket_id) {
                let event = Event::new(EventKind::TicketWaitWarning, now).with_detail(
                    EventDetail::Ticket {
                        ticket_id,
                        kind: ticket.kind,
                        wait_secs: ticket.wait_secs(now),
                    },
                );
                self.event_log.record(&event);
                frame_events.push(event);
            }
        }
    }

    fn push_ticket_created(&mut self, ticket_id: TicketId, now: MonoTs, events: &mut Vec<Event>) {
        if let Some(ticket) = self.tickets.get(ticket_id) {
            let event = Event::new(EventKind::TicketCreated, now).with_detail(EventDetail::Ticket {
                ticket_id,
                kind: ticket.kind,
                wait_secs: 0.0,
            });
            self.event_log.record(&event);
            events.push(event);
        }
    }

    fn build_snapshot(
        &self,
        frame_id: u64,
        now: MonoTs,
        active: &[TrackId],
        presence: &FxHashMap<TrackId, ZonePresence>,
    ) -> FrameSnapshot {
        let tracks: Vec<TrackView> = active
            .iter()
            .filter_map(|&id| {
                let track = self.tracker.get(id)?;
                let p = presence.get(&id).copied().unwrap_or_default();
                Some(TrackView {
                    id,
                    role: track.role,
                    bbox_norm: track.bbox,
                    in_gate: p.in_gate_area,
                    in_anchor: p.in_guard_anchor,
                    velocity: track.velocity(),
                })
            })
            .collect();

        let groups: Vec<GroupView> = self
            .groups
            .groups_sorted()
            .into_iter()
            .map(|g| GroupView {
                id: g.group_id,
                members: g.members.to_vec(),
                stable: g.is_stable(now, self.groups.t_lock()),
                centroid: g.centroid,
            })
            .collect();

        let guards: Vec<GuardView> = self
            .guards
            .guards_sorted()
            .into_iter()
            .map(|g| GuardView {
                id: g.guard_id,
                backing_track_id: g.backing_track_id,
                qualified: g.qualified,
                current_ticket_id: g.current_ticket_id,
            })
            .collect();

        let tickets: Vec<TicketView> = self
            .tickets
            .tickets_sorted()
            .into_iter()
            .map(|t| TicketView {
                id: t.ticket_id,
                kind: t.kind,
                members: t.members.to_vec(),
                status: t.status.as_str(),
                examination_mode: t.examination_mode,
                assigned_guard_id: t.assigned_guard_id,
                proximity_duration: t.proximity_duration,
                examination_duration: t.examination_duration,
                escalation_reason: t.escalation_reason(),
                ready_at: t.ready_at,
                completed_at: t.completed_at,
            })
            .collect();

        let persons: Vec<PersonView> = self
            .fsm
            .states_sorted()
            .into_iter()
            .map(|s| PersonView {
                track_id: s.track_id,
                state: s.state,
                dwell_in_ga: s.dwell_in_ga,
                guard_overlap_time: s.guard_overlap_time,
                interaction_time: s.interaction_time,
                score: s.score,
                cooldown_until: s.cooldown_until,
            })
            .collect();

        let stats = QueueStats {
            active_guards: self.guards.active_guard_count() as u64,
            queue_length: self.tickets.queue_len() as u64,
            total_processed: self.tickets.total_processed(),
            total_escalated: self.tickets.total_escalated(),
            average_wait_time: self.tickets.average_wait_time(),
        };

        FrameSnapshot {
            frame_id,
            monotonic_ts: now,
            tracks,
            groups,
            guards,
            tickets,
            queue: self.tickets.queue().to_vec(),
            persons,
            counts: self.counts,
            stats,
        }
    }

    fn publish_snapshot(&self, snapshot: FrameSnapshot) {
        let Some(tx) = &self.snapshot_tx else { return };
        if tx.try_send(snapshot).is_err() {
            self.metrics.record_snapshot_dropped();
            warn!("snapshot_sink_full");
        }
    }

    fn publish_event(&self, event: Event) {
        let Some(tx) = &self.events_tx else { return };
        if tx.try_send(event).is_err() {
            self.metrics.record_event_dropped();
        }
    }

    /// Cross-component invariants (debug builds): guard/ticket links are
    /// mutually consistent and every confirmed track met the hit floor.
    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        self.tickets.assert_queue_invariants();

        for guard in self.guards.guards_sorted() {
            if let Some(ticket_id) = guard.current_ticket_id {
                let ticket = self.tickets.get(ticket_id);
                debug_assert!(
                    ticket
                        .map(|t| t.assigned_guard_id == Some(guard.guard_id)
                            && !t.status.is_terminal())
                        .unwrap_or(false),
                    "guard {} holds ticket {} that does not reference it",
                    guard.guard_id,
                    ticket_id
                );
            }
        }
        for ticket in self.tickets.tickets_sorted() {
            if ticket.status.is_terminal() {
                continue;
            }
            if let Some(guard_id) = ticket.assigned_guard_id {
                debug_assert_eq!(
                    self.guards.get(guard_id).and_then(|g| g.current_ticket_id),
                    Some(ticket.ticket_id),
                    "ticket {} assigned to guard {} without a back-link",
                    ticket.ticket_id,
                    guard_id
                );
            }
        }

        for track in self.tracker.iter_confirmed() {
            debug_assert!(track.hits >= self.config.tracking.min_hits);
        }
    }
}
