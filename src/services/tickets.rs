//! Ticket and queue management
//!
//! A ticket is the unit of examination work: one visitor or one stable
//! group. Tickets wait in a FIFO queue, get assigned to qualified guards
//! first-come-first-served, progress through proximity and examination
//! windows, and end as checked, escalated, or cancelled. Escalations are
//! domain outcomes with machine-readable reasons, never errors.
//!
//! Transitions collect into per-frame result lists and apply after each
//! scan; nothing mutates the queue while iterating it.

use crate::domain::geometry::{euclidean, Point};
use crate::domain::types::{
    CancelReason, EscalationReason, ExaminationMode, GroupId, GuardId, MonoTs, TicketId,
    TicketKind, TrackId,
};
use crate::infra::config::{PresenceConfig, QueueConfig};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{info, warn};

/// Ticket status; examination phases carry their start time
#[derive(Debug, Clone, PartialEq)]
pub enum TicketStatus {
    Waiting,
    Assigning,
    InCheck { examination_start: MonoTs },
    InBatch { examination_start: MonoTs },
    Checked,
    Escalated(EscalationReason),
    Cancelled(CancelReason),
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketStatus::Checked | TicketStatus::Escalated(_) | TicketStatus::Cancelled(_)
        )
    }

    pub fn examination_start(&self) -> Option<MonoTs> {
        match self {
            TicketStatus::InCheck { examination_start }
            | TicketStatus::InBatch { examination_start } => Some(*examination_start),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::Assigning => "assigning",
            TicketStatus::InCheck { .. } => "in_check",
            TicketStatus::InBatch { .. } => "in_batch",
            TicketStatus::Checked => "checked",
            TicketStatus::Escalated(_) => "escalated",
            TicketStatus::Cancelled(_) => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub kind: TicketKind,
    pub members: SmallVec<[TrackId; 4]>,
    pub status: TicketStatus,
    pub examination_mode: ExaminationMode,
    pub assigned_guard_id: Option<GuardId>,
    pub created_at: MonoTs,
    pub ready_at: MonoTs,
    pub proximity_start: Option<MonoTs>,
    pub proximity_duration: f64,
    pub examination_duration: f64,
    pub completed_at: Option<MonoTs>,
    /// Group this ticket examines, for group tickets
    pub group_id: Option<GroupId>,
    /// Set on individual tickets fanned out from a split group
    pub split_from_group: Option<GroupId>,
    /// Soft wait warning already emitted
    warned: bool,
}

impl Ticket {
    pub fn escalation_reason(&self) -> Option<EscalationReason> {
        match &self.status {
            TicketStatus::Escalated(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn wait_secs(&self, now: MonoTs) -> f64 {
        now.since(self.ready_at)
    }
}

/// What the ticket manager needs to know about one member this frame
#[derive(Debug, Clone, Copy)]
pub struct MemberObs {
    pub center: Point,
    pub in_gate_area: bool,
}

/// What the ticket manager needs to know about one guard this frame
#[derive(Debug, Clone, Copy)]
pub struct GuardObs {
    pub center: Option<Point>,
    pub qualified: bool,
}

/// Result of one progress pass
#[derive(Debug, Default)]
pub struct ProgressResult {
    /// Tickets that entered their examination phase
    pub started: Vec<TicketId>,
    pub checked: Vec<TicketId>,
    pub escalated: Vec<(TicketId, EscalationReason)>,
    /// Guards released by completions and escalations
    pub released_guards: Vec<GuardId>,
}

/// Result of one wait-time sweep
#[derive(Debug, Default)]
pub struct SweepResult {
    pub escalated: Vec<TicketId>,
    pub warned: Vec<TicketId>,
}

/// Result of a group split fan-out
#[derive(Debug, Default)]
pub struct SplitResult {
    pub cancelled: Option<TicketId>,
    pub created: Vec<TicketId>,
    pub released_guard: Option<GuardId>,
}

/// Result of an external cancellation
#[derive(Debug, Default)]
pub struct CancelResult {
    pub cancelled: bool,
    pub released_guard: Option<GuardId>,
}

pub struct TicketManager {
    presence: PresenceConfig,
    queue_config: QueueConfig,
    /// Guard-to-member proximity distance (normalized)
    d_max: f64,
    tickets: FxHashMap<TicketId, Ticket>,
    /// FIFO of non-terminal ticket ids, ordered by creation
    queue: Vec<TicketId>,
    next_id: u64,

    // Incremental statistics
    total_processed: u64,
    total_escalated: u64,
    wait_time_sum: f64,
    wait_time_samples: u64,
}

impl TicketManager {
    pub fn new(presence: PresenceConfig, queue_config: QueueConfig, d_max: f64) -> Self {
        Self {
            presence,
            queue_config,
            d_max,
            tickets: FxHashMap::default(),
            queue: Vec::new(),
            next_id: 1,
            total_processed: 0,
            total_escalated: 0,
            wait_time_sum: 0.0,
            wait_time_samples: 0,
        }
    }

    fn new_ticket(
        &mut self,
        kind: TicketKind,
        members: SmallVec<[TrackId; 4]>,
        mode: ExaminationMode,
        ready_at: MonoTs,
        now: MonoTs,
    ) -> TicketId {
        let ticket_id = TicketId(self.next_id);
        self.next_id += 1;

        self.tickets.insert(
            ticket_id,
            Ticket {
                ticket_id,
                kind,
                members,
                status: TicketStatus::Waiting,
                examination_mode: mode,
                assigned_guard_id: None,
                created_at: now,
                ready_at,
                proximity_start: None,
                proximity_duration: 0.0,
                examination_duration: 0.0,
                completed_at: None,
                group_id: None,
                split_from_group: None,
                warned: false,
            },
        );
        self.queue.push(ticket_id);
        ticket_id
    }

    /// True when any non-terminal ticket contains the member
    pub fn member_has_open_ticket(&self, track_id: TrackId) -> bool {
        self.tickets
            .values()
            .any(|t| !t.status.is_terminal() && t.members.contains(&track_id))
    }

    /// Create individual tickets for eligible persons: in the gate area,
    /// past the presence threshold, outside any stable group. The caller
    /// establishes eligibility; this method enforces one open ticket per
    /// person.
    pub fn create_individual_tickets(&mut self, eligible: &[TrackId], now: MonoTs) -> Vec<TicketId> {
        let mut created = Vec::new();
        for &track_id in eligible {
            if self.member_has_open_ticket(track_id) {
                continue;
            }
            let ticket_id = self.new_ticket(
                TicketKind::Individual,
                SmallVec::from_slice(&[track_id]),
                ExaminationMode::Sequential,
                now,
                now,
            );
            info!(ticket_id = %ticket_id, track_id = %track_id, "ticket_created");
            created.push(ticket_id);
        }
        created
    }

    /// Create group tickets for stable groups whose members are all free
    /// of open tickets (preserves the one-open-ticket-per-person
    /// invariant when individuals converge late).
    pub fn create_group_tickets(
        &mut self,
        stable_groups: &[(GroupId, SmallVec<[TrackId; 4]>)],
        mode: ExaminationMode,
        now: MonoTs,
    ) -> Vec<TicketId> {
        let mut created = Vec::new();
        for (group_id, members) in stable_groups {
            if self.tickets.values().any(|t| {
                !t.status.is_terminal() && t.group_id == Some(*group_id)
            }) {
                continue;
            }
            if members.iter().any(|m| self.member_has_open_ticket(*m)) {
                continue;
            }

            let ticket_id = self.new_ticket(TicketKind::Group, members.clone(), mode, now, now);
            if let Some(ticket) = self.tickets.get_mut(&ticket_id) {
                ticket.group_id = Some(*group_id);
            }
            info!(
                ticket_id = %ticket_id,
                group_id = %group_id,
                members = ?members,
                mode = %mode.as_str(),
                "ticket_created"
            );
            created.push(ticket_id);
        }
        created
    }

    /// Match available guards to WAITING tickets in queue order.
    /// Assignment is first-come-first-served with no guard preference.
    pub fn assign_waiting(
        &mut self,
        available: &[GuardId],
        _now: MonoTs,
    ) -> Vec<(TicketId, GuardId)> {
        let mut assignments = Vec::new();
        let mut guards = available.iter().copied();

        for &ticket_id in &self.queue {
            let Some(ticket) = self.tickets.get_mut(&ticket_id) else { continue };
            if ticket.status != TicketStatus::Waiting {
                continue;
            }
            let Some(guard_id) = guards.next() else { break };

            ticket.assigned_guard_id = Some(guard_id);
            ticket.status = TicketStatus::Assigning;
            info!(ticket_id = %ticket_id, guard_id = %guard_id, "ticket_assigned");
            assignments.push((ticket_id, guard_id));
        }
        assignments
    }

    /// Evaluate proximity and examination progress for every assigned
    /// ticket.
    pub fn progress(
        &mut self,
        members: &FxHashMap<TrackId, MemberObs>,
        guards: &FxHashMap<GuardId, GuardObs>,
        now: MonoTs,
    ) -> ProgressResult {
        let mut result = ProgressResult::default();
        let queue: Vec<TicketId> = self.queue.clone();
        let d_max = self.d_max;

        for ticket_id in queue {
            let Some(ticket) = self.tickets.get_mut(&ticket_id) else { continue };
            if !matches!(
                ticket.status,
                TicketStatus::Assigning | TicketStatus::InCheck { .. } | TicketStatus::InBatch { .. }
            ) {
                continue;
            }
            let Some(guard_id) = ticket.assigned_guard_id else { continue };

            // Guard gone or dequalified: escalate and release
            let guard_obs = guards.get(&guard_id);
            if guard_obs.map(|g| !g.qualified).unwrap_or(true) {
                let reason = EscalationReason::GuardLeft;
                let exam_start = ticket.status.examination_start();
                ticket.status = TicketStatus::Escalated(reason);
                ticket.completed_at = Some(now);
                ticket.assigned_guard_id = None;
                warn!(ticket_id = %ticket_id, guard_id = %guard_id, "ticket_escalated_guard_left");
                self.total_escalated += 1;
                self.record_wait(ticket_id, exam_start, now);
                result.escalated.push((ticket_id, reason));
                result.released_guards.push(guard_id);
                self.remove_from_queue(ticket_id);
                continue;
            }
            let Some(guard_center) = guard_obs.and_then(|g| g.center) else { continue };

            // Proximity: any member in the gate area within d_max
            let proximity = ticket.members.iter().any(|member_id| {
                members
                    .get(member_id)
                    .filter(|m| m.in_gate_area)
                    .map(|m| euclidean(guard_center, m.center) <= d_max)
                    .unwrap_or(false)
            });

            if !proximity {
                // No credit carries over a proximity break
                ticket.proximity_start = None;
                ticket.proximity_duration = 0.0;
                continue;
            }

            let started = *ticket.proximity_start.get_or_insert(now);
            ticket.proximity_duration = now.since(started);

            if ticket.status == TicketStatus::Assigning
                && ticket.proximity_duration >= self.presence.proximity_min
            {
                ticket.status = match ticket.kind {
                    TicketKind::Individual => TicketStatus::InCheck { examination_start: now },
                    TicketKind::Group => TicketStatus::InBatch { examination_start: now },
                };
                info!(
                    ticket_id = %ticket_id,
                    status = %ticket.status.as_str(),
                    proximity = %format!("{:.2}", ticket.proximity_duration),
                    "examination_started"
                );
                result.started.push(ticket_id);
            }

            let Some(examination_start) = ticket.status.examination_start() else { continue };
            ticket.examination_duration = now.since(examination_start);

            let min_duration = match ticket.kind {
                TicketKind::Individual => self.presence.check_min_individual,
                TicketKind::Group => self.presence.check_min_batch,
            };
            if ticket.examination_duration < min_duration {
                continue;
            }

            let all_in_gate = ticket
                .members
                .iter()
                .all(|m| members.get(m).map(|obs| obs.in_gate_area).unwrap_or(false));

            if all_in_gate {
                ticket.status = TicketStatus::Checked;
                ticket.completed_at = Some(now);
                ticket.assigned_guard_id = None;
                info!(
                    ticket_id = %ticket_id,
                    guard_id = %guard_id,
                    examination = %format!("{:.2}", ticket.examination_duration),
                    "ticket_checked"
                );
                self.total_processed += 1;
                self.record_wait(ticket_id, Some(examination_start), now);
                result.checked.push(ticket_id);
            } else {
                let reason = EscalationReason::MemberLeftGateArea;
                ticket.status = TicketStatus::Escalated(reason);
                ticket.completed_at = Some(now);
                ticket.assigned_guard_id = None;
                warn!(ticket_id = %ticket_id, "ticket_escalated_member_left");
                self.total_escalated += 1;
                self.record_wait(ticket_id, Some(examination_start), now);
                result.escalated.push((ticket_id, reason));
            }
            result.released_guards.push(guard_id);
            self.remove_from_queue(ticket_id);
        }

        result
    }

    /// Escalate WAITING tickets past the maximum wait; surface the soft
    /// warning once per ticket at the warn threshold.
    pub fn sweep(&mut self, now: MonoTs) -> SweepResult {
        let mut result = SweepResult::default();
        let queue: Vec<TicketId> = self.queue.clone();

        for ticket_id in queue {
            let Some(ticket) = self.tickets.get_mut(&ticket_id) else { continue };
            if ticket.status != TicketStatus::Waiting {
                continue;
            }
            let wait = ticket.wait_secs(now);

            if wait >= self.queue_config.t_max_wait {
                ticket.status = TicketStatus::Escalated(EscalationReason::MaxWaitExceeded);
                ticket.completed_at = Some(now);
                warn!(
                    ticket_id = %ticket_id,
                    wait = %format!("{wait:.1}"),
                    "ticket_escalated_wait_time"
                );
                self.total_escalated += 1;
                self.record_wait(ticket_id, None, now);
                result.escalated.push(ticket_id);
                self.remove_from_queue(ticket_id);
            } else if wait >= self.queue_config.t_warn && !ticket.warned {
                ticket.warned = true;
                warn!(ticket_id = %ticket_id, wait = %format!("{wait:.1}"), "ticket_wait_warning");
                result.warned.push(ticket_id);
            }
        }
        result
    }

    /// A stable group split apart: cancel its ticket and fan out one
    /// WAITING individual ticket per former member, inheriting the
    /// original `ready_at`. Only ticketed groups fan out; a group that
    /// never earned a ticket just disappears.
    pub fn handle_group_split(
        &mut self,
        group_id: GroupId,
        members: &[TrackId],
        now: MonoTs,
    ) -> SplitResult {
        let mut result = SplitResult::default();

        let group_ticket = self
            .tickets
            .values()
            .find(|t| !t.status.is_terminal() && t.group_id == Some(group_id))
            .map(|t| t.ticket_id);

        let Some(ticket_id) = group_ticket else {
            return result;
        };

        let ready_at = if let Some(ticket) = self.tickets.get_mut(&ticket_id) {
            let ready_at = ticket.ready_at;
            result.released_guard = ticket.assigned_guard_id.take();
            ticket.status = TicketStatus::Cancelled(CancelReason::GroupSplit);
            info!(ticket_id = %ticket_id, group_id = %group_id, "ticket_cancelled_group_split");
            self.remove_from_queue(ticket_id);
            result.cancelled = Some(ticket_id);
            ready_at
        } else {
            now
        };

        for &member in members {
            if self.member_has_open_ticket(member) {
                continue;
            }
            let new_id = self.new_ticket(
                TicketKind::Individual,
                SmallVec::from_slice(&[member]),
                ExaminationMode::Sequential,
                ready_at,
                now,
            );
            if let Some(ticket) = self.tickets.get_mut(&new_id) {
                ticket.split_from_group = Some(group_id);
            }
            info!(
                ticket_id = %new_id,
                track_id = %member,
                split_from = %group_id,
                "ticket_created"
            );
            result.created.push(new_id);
        }

        result
    }

    /// External cancellation by id. Idempotent: cancelling a terminal or
    /// unknown ticket does nothing.
    pub fn cancel(&mut self, ticket_id: TicketId, reason: String, now: MonoTs) -> CancelResult {
        let mut result = CancelResult::default();
        let Some(ticket) = self.tickets.get_mut(&ticket_id) else {
            return result;
        };
        if ticket.status.is_terminal() {
            return result;
        }

        result.released_guard = ticket.assigned_guard_id.take();
        ticket.status = TicketStatus::Cancelled(CancelReason::External(reason));
        ticket.completed_at = Some(now);
        info!(ticket_id = %ticket_id, "ticket_cancelled");
        self.remove_from_queue(ticket_id);
        result.cancelled = true;
        result
    }

    fn remove_from_queue(&mut self, ticket_id: TicketId) {
        self.queue.retain(|&id| id != ticket_id);
    }

    /// Fold one finished ticket into the wait-time average. The wait ends
    /// when its examination started, or at terminalization if it never
    /// did.
    fn record_wait(&mut self, ticket_id: TicketId, examination_start: Option<MonoTs>, now: MonoTs) {
        if let Some(ticket) = self.tickets.get(&ticket_id) {
            let end = examination_start.unwrap_or(now);
            self.wait_time_sum += end.since(ticket.ready_at);
            self.wait_time_samples += 1;
        }
    }

    pub fn get(&self, ticket_id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&ticket_id)
    }

    pub fn queue(&self) -> &[TicketId] {
        &self.queue
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn total_processed(&self) -> u64 {
        self.total_processed
    }

    pub fn total_escalated(&self) -> u64 {
        self.total_escalated
    }

    pub fn average_wait_time(&self) -> f64 {
        if self.wait_time_samples == 0 {
            return 0.0;
        }
        self.wait_time_sum / self.wait_time_samples as f64
    }

    /// All tickets sorted by id, for deterministic snapshots
    pub fn tickets_sorted(&self) -> Vec<&Ticket> {
        let mut tickets: Vec<&Ticket> = self.tickets.values().collect();
        tickets.sort_by_key(|t| t.ticket_id);
        tickets
    }

    /// Drop old terminal tickets so the map stays bounded on long
    /// streams. Statistics are incremental and unaffected.
    pub fn prune_terminal(&mut self, keep: usize) {
        let mut terminal: Vec<(MonoTs, TicketId)> = self
            .tickets
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.completed_at.unwrap_or(t.created_at), t.ticket_id))
            .collect();
        if terminal.len() <= keep {
            return;
        }
        terminal.sort_by(|a, b| a.0 .0.total_cmp(&b.0 .0).then(a.1.cmp(&b.1)));
        let drop_count = terminal.len() - keep;
        for (_, ticket_id) in terminal.into_iter().take(drop_count) {
            self.tickets.remove(&ticket_id);
        }
    }

    /// Debug-build invariant checks over the queue and guard links
    pub fn assert_queue_invariants(&self) {
        // Queue holds exactly the non-terminal tickets, in creation order
        debug_assert!(
            self.queue.iter().all(|id| self
                .tickets
                .get(id)
                .map(|t| !t.status.is_terminal())
                .unwrap_or(false)),
            "queue holds a terminal or unknown ticket"
        );
        let open_count = self.tickets.values().filter(|t| !t.status.is_terminal()).count();
        debug_assert_eq!(self.queue.len(), open_count, "queue out of sync with open tickets");
        debug_assert!(
            self.queue.windows(2).all(|w| {
                let a = self.tickets.get(&w[0]).map(|t| t.created_at);
                let b = self.tickets.get(&w[1]).map(|t| t.created_at);
                matches!((a, b), (Some(a), Some(b)) if a <= b)
            }),
            "queue not ordered by creation time"
        );
    }
}
