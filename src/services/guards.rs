//! Guard classification and qualification
//!
//! A track earns the guard role by behavior: standing in the anchor zone
//! long enough, or showing the mobile-guard pattern of shuttling between
//! anchor and gate. Role (who is a guard) and qualification (who may be
//! assigned examinations right now) are separate: qualification follows
//! the configured anchor logic and decays when the guard walks off.

use crate::domain::types::{AnchorLogic, GuardId, MonoTs, TicketId, TrackId};
use crate::infra::config::GuardConfig;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::info;

/// Window of location history used for pattern matching (seconds)
const HISTORY_WINDOW: f64 = 10.0;
/// Time classified as guard before a downgrade is considered (seconds)
const DOWNGRADE_AFTER: f64 = 30.0;
/// Recent anchor dwell below which a stale guard is downgraded (seconds)
const DOWNGRADE_RECENT_ANCHOR: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
struct LocationSample {
    ts: MonoTs,
    in_anchor: bool,
    in_gate: bool,
    dt: f64,
}

/// Running anchor statistics for one track
#[derive(Debug)]
struct AnchorStats {
    anchor_entry: Option<MonoTs>,
    last_in_anchor: Option<MonoTs>,
    /// Last frame the track stood in the anchor or the gate area
    last_in_either: Option<MonoTs>,
    anchor_dwell: f64,
    gate_dwell: f64,
    cur_in_anchor: bool,
    cur_in_gate: bool,
    classified_at: Option<MonoTs>,
    history: VecDeque<LocationSample>,
}

impl AnchorStats {
    fn new() -> Self {
        Self {
            anchor_entry: None,
            last_in_anchor: None,
            last_in_either: None,
            anchor_dwell: 0.0,
            gate_dwell: 0.0,
            cur_in_anchor: false,
            cur_in_gate: false,
            classified_at: None,
            history: VecDeque::new(),
        }
    }

    /// Zone entry edges within the history window
    fn visits(&self) -> (u32, u32) {
        let mut anchor_visits = 0;
        let mut gate_visits = 0;
        let mut prev_anchor = false;
        let mut prev_gate = false;
        for (i, s) in self.history.iter().enumerate() {
            if s.in_anchor && (i == 0 || !prev_anchor) {
                anchor_visits += 1;
            }
            if s.in_gate && (i == 0 || !prev_gate) {
                gate_visits += 1;
            }
            prev_anchor = s.in_anchor;
            prev_gate = s.in_gate;
        }
        (anchor_visits, gate_visits)
    }

    fn recent_anchor_dwell(&self) -> f64 {
        self.history.iter().filter(|s| s.in_anchor).map(|s| s.dt).sum()
    }
}

/// A classified guard
#[derive(Debug, Clone)]
pub struct Guard {
    pub guard_id: GuardId,
    pub backing_track_id: TrackId,
    pub active_since: MonoTs,
    pub last_seen: MonoTs,
    pub qualified: bool,
    pub current_ticket_id: Option<TicketId>,
}

/// Role transitions produced by one frame of observation
#[derive(Debug, PartialEq, Eq)]
pub enum RoleChange {
    Promoted(TrackId),
    Downgraded(TrackId),
}

/// Qualification transitions produced by one frame
#[derive(Debug, PartialEq, Eq)]
pub struct QualificationChange {
    pub guard_id: GuardId,
    pub track_id: TrackId,
    pub qualified: bool,
}

pub struct GuardClassifier {
    config: GuardConfig,
    stats: FxHashMap<TrackId, AnchorStats>,
    guards: FxHashMap<GuardId, Guard>,
    guard_by_track: FxHashMap<TrackId, GuardId>,
    next_id: u64,
}

impl GuardClassifier {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            stats: FxHashMap::default(),
            guards: FxHashMap::default(),
            guard_by_track: FxHashMap::default(),
            next_id: 1,
        }
    }

    pub fn set_anchor_logic(&mut self, logic: AnchorLogic) {
        self.config.anchor_logic = logic;
    }

    pub fn anchor_logic(&self) -> AnchorLogic {
        self.config.anchor_logic
    }

    /// Feed one frame of zone presence for a confirmed track. Returns the
    /// role transition, if any.
    pub fn observe(
        &mut self,
        track_id: TrackId,
        in_anchor: bool,
        in_gate: bool,
        dt: f64,
        now: MonoTs,
    ) -> Option<RoleChange> {
        let stats = self.stats.entry(track_id).or_insert_with(AnchorStats::new);

        stats.cur_in_anchor = in_anchor;
        stats.cur_in_gate = in_gate;
        stats.history.push_back(LocationSample { ts: now, in_anchor, in_gate, dt });
        while let Some(front) = stats.history.front() {
            if now.since(front.ts) > HISTORY_WINDOW {
                stats.history.pop_front();
            } else {
                break;
            }
        }

        if in_gate {
            stats.gate_dwell += dt;
        }
        if in_anchor || in_gate {
            stats.last_in_either = Some(now);
        }

        if in_anchor {
            stats.last_in_anchor = Some(now);
            stats.anchor_dwell += dt;
            let entered = *stats.anchor_entry.get_or_insert(now);
            let continuous = now.since(entered);

            let already_guard = self.guard_by_track.contains_key(&track_id);
            if !already_guard {
                let (anchor_visits, gate_visits) = stats.visits();
                let dwell_promotion = continuous >= self.config.guard_ready;
                let pattern_promotion = anchor_visits >= 2 && gate_visits >= 1;

                if dwell_promotion || pattern_promotion {
                    stats.classified_at = Some(now);
                    let guard_id = GuardId(self.next_id);
                    self.next_id += 1;
                    self.guards.insert(
                        guard_id,
                        Guard {
                            guard_id,
                            backing_track_id: track_id,
                            active_since: now,
                            last_seen: now,
                            qualified: false,
                            current_ticket_id: None,
                        },
                    );
                    self.guard_by_track.insert(track_id, guard_id);
                    info!(
                        guard_id = %guard_id,
                        track_id = %track_id,
                        continuous_anchor = %format!("{continuous:.2}"),
                        by_pattern = %pattern_promotion,
                        "guard_classified"
                    );
                    return Some(RoleChange::Promoted(track_id));
                }
            }
        } else if let Some(last) = stats.last_in_anchor {
            if now.since(last) > self.config.t_vacate {
                stats.anchor_entry = None;

                // A long-classified guard with no recent anchor activity
                // goes back to being a person
                if let Some(classified_at) = stats.classified_at {
                    if now.since(classified_at) >= DOWNGRADE_AFTER
                        && stats.recent_anchor_dwell() < DOWNGRADE_RECENT_ANCHOR
                    {
                        if let Some(guard_id) = self.guard_by_track.remove(&track_id) {
                            self.guards.remove(&guard_id);
                            stats.classified_at = None;
                            info!(guard_id = %guard_id, track_id = %track_id, "guard_downgraded");
                            return Some(RoleChange::Downgraded(track_id));
                        }
                    }
                }
            }
        }

        if let Some(guard_id) = self.guard_by_track.get(&track_id) {
            if let Some(guard) = self.guards.get_mut(guard_id) {
                guard.last_seen = now;
            }
        }

        None
    }

    /// Re-evaluate qualification for every guard per the anchor logic.
    /// Returns the guards whose qualification flipped this frame.
    pub fn update_qualification(&mut self, now: MonoTs) -> Vec<QualificationChange> {
        let mut changes = Vec::new();

        let mut guard_ids: Vec<GuardId> = self.guards.keys().copied().collect();
        guard_ids.sort();

        for guard_id in guard_ids {
            let Some(guard) = self.guards.get_mut(&guard_id) else { continue };
            let Some(stats) = self.stats.get(&guard.backing_track_id) else { continue };

            let ready = self.config.guard_ready;
            let qualified = match self.config.anchor_logic {
                AnchorLogic::StrictAnchor => stats.anchor_dwell >= ready && stats.cur_in_anchor,
                AnchorLogic::Either => {
                    // Qualification is earned by dwell in either zone and
                    // retained while the guard stays in anchor or gate;
                    // once out of both, it decays after t_vacate
                    let earned =
                        stats.anchor_dwell >= ready || stats.gate_dwell >= ready;
                    let present = stats.cur_in_anchor
                        || stats.cur_in_gate
                        || stats
                            .last_in_either
                            .map(|last| now.since(last) <= self.config.t_vacate)
                            .unwrap_or(false);
                    earned && present
                }
                AnchorLogic::NoAnchor => true,
            };

            if qualified != guard.qualified {
                guard.qualified = qualified;
                changes.push(QualificationChange {
                    guard_id,
                    track_id: guard.backing_track_id,
                    qualified,
                });
            }
        }

        changes
    }

    /// Qualified guards with no current ticket, in guard-id order
    pub fn available_guards(&self) -> Vec<GuardId> {
        let mut ids: Vec<GuardId> = self
            .guards
            .values()
            .filter(|g| g.qualified && g.current_ticket_id.is_none())
            .map(|g| g.guard_id)
            .collect();
        ids.sort();
        ids
    }

    /// Qualified guards as `(guard_id, backing_track_id)`, in id order
    pub fn qualified_guards(&self) -> Vec<(GuardId, TrackId)> {
        let mut pairs: Vec<(GuardId, TrackId)> = self
            .guards
            .values()
            .filter(|g| g.qualified)
            .map(|g| (g.guard_id, g.backing_track_id))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn is_qualified(&self, guard_id: GuardId) -> bool {
        self.guards.get(&guard_id).map(|g| g.qualified).unwrap_or(false)
    }

    pub fn get(&self, guard_id: GuardId) -> Option<&Guard> {
        self.guards.get(&guard_id)
    }

    pub fn guard_for_track(&self, track_id: TrackId) -> Option<GuardId> {
        self.guard_by_track.get(&track_id).copied()
    }

    pub fn backing_track(&self, guard_id: GuardId) -> Option<TrackId> {
        self.guards.get(&guard_id).map(|g| g.backing_track_id)
    }

    pub fn set_current_ticket(&mut self, guard_id: GuardId, ticket: Option<TicketId>) {
        if let Some(guard) = self.guards.get_mut(&guard_id) {
            guard.current_ticket_id = ticket;
        }
    }

    pub fn current_ticket(&self, guard_id: GuardId) -> Option<TicketId> {
        self.guards.get(&guard_id).and_then(|g| g.current_ticket_id)
    }

    pub fn is_guard(&self, track_id: TrackId) -> bool {
        self.guard_by_track.contains_key(&track_id)
    }

    /// All guards sorted by id, for deterministic snapshots
    pub fn guards_sorted(&self) -> Vec<&Guard> {
        let mut guards: Vec<&Guard> = self.guards.values().collect();
        guards.sort_by_key(|g| g.guard_id);
        guards
    }

    pub fn active_guard_count(&self) -> usize {
        self.guards.values().filter(|g| g.qualified).count()
    }

    /// Drop stats and guard entries for tracks no longer active. Returns
    /// removed guards so the caller can resolve any held tickets.
    pub fn retain(&mut self, active: &[TrackId]) -> Vec<Guard> {
        self.stats.retain(|id, _| active.contains(id));

        let gone: Vec<GuardId> = self
            .guards
            .values()
            .filter(|g| !active.contains(&g.backing_track_id))
            .map(|g| g.guard_id)
            .collect();

        let mut removed = Vec::new();
        for guard_id in gone {
            if let Some(guard) = self.guards.remove(&guard_id) {
                self.guard_by_track.remove(&guard.backing_track_id);
                info!(guard_id = %guard_id, track_id = %guard.backing_track_id, "guard_track_lost");
                removed.push(guard);
            }
        }
        removed.sort_by_key(|g| g.guard_id);
        removed
    }
}
