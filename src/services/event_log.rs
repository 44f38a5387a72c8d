//! Append-only micro-event log and contact session tracking
//!
//! The log is a bounded ring: every state transition and predicate edge
//! appends synchronously, old entries fall off the front, and per-kind
//! counters accumulate independently of the ring so totals survive
//! eviction. Contact sessions aggregate per `(visitor, guard)` pair and
//! close with a summary event when the contact predicate drops.

use crate::domain::event::{ContactSession, Event, EventDetail, EventKind};
use crate::domain::types::{MonoTs, TrackId};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

pub struct EventLog {
    capacity: usize,
    events: VecDeque<Event>,
    counts: [u64; EventKind::COUNT],
    active_contacts: FxHashMap<(TrackId, TrackId), ContactSession>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: VecDeque::with_capacity(capacity.min(4096)),
            counts: [0; EventKind::COUNT],
            active_contacts: FxHashMap::default(),
        }
    }

    /// Append an event to the ring
    pub fn record(&mut self, event: &Event) {
        self.counts[event.kind.index()] += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
    }

    /// Feed one frame of contact metrics for a pair. Opens a session and
    /// returns a `contact_started` event on the first frame.
    pub fn update_contact(
        &mut self,
        visitor: TrackId,
        guard: TrackId,
        center_distance: f64,
        iou: f64,
        now: MonoTs,
    ) -> Option<Event> {
        let key = (visitor, guard);
        if let Some(session) = self.active_contacts.get_mut(&key) {
            session.update(center_distance, iou);
            return None;
        }

        let mut session = ContactSession::new(visitor, guard, now);
        session.update(center_distance, iou);
        self.active_contacts.insert(key, session);

        let event = Event::new(EventKind::ContactStarted, now)
            .with_track(visitor)
            .with_related(guard)
            .with_detail(EventDetail::Contact { center_distance, iou });
        self.record(&event);
        Some(event)
    }

    /// Close every active session not present in this frame's contact
    /// set. Returns the `contact_ended` events carrying final metrics.
    pub fn close_stale_contacts(
        &mut self,
        current: &[(TrackId, TrackId)],
        now: MonoTs,
    ) -> Vec<Event> {
        let mut stale: Vec<(TrackId, TrackId)> = self
            .active_contacts
            .keys()
            .filter(|key| !current.contains(key))
            .copied()
            .collect();
        stale.sort();

        let mut events = Vec::new();
        for key in stale {
            if let Some(mut session) = self.active_contacts.remove(&key) {
                session.end(now);
                let event = Event::new(EventKind::ContactEnded, now)
                    .with_track(session.visitor)
                    .with_related(session.guard)
                    .with_detail(EventDetail::ContactSummary {
                        duration: session.duration(now),
                        min_center_distance: session.min_center_distance,
                        max_iou: session.max_iou,
                        avg_center_distance: session.avg_center_distance,
                        avg_iou: session.avg_iou,
                    });
                self.record(&event);
                events.push(event);
            }
        }
        events
    }

    pub fn contact_session(&self, visitor: TrackId, guard: TrackId) -> Option<&ContactSession> {
        self.active_contacts.get(&(visitor, guard))
    }

    pub fn active_contacts(&self) -> Vec<&ContactSession> {
        let mut sessions: Vec<&ContactSession> = self.active_contacts.values().collect();
        sessions.sort_by_key(|s| (s.visitor, s.guard));
        sessions
    }

    /// Events involving a track, oldest first
    pub fn timeline(&self, track_id: TrackId) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| {
                e.track_id == Some(track_id) || e.related_track_id == Some(track_id)
            })
            .collect()
    }

    /// Events with `from <= ts < to`, oldest first
    pub fn events_in_window(&self, from: MonoTs, to: MonoTs) -> Vec<&Event> {
        self.events.iter().filter(|e| e.ts >= from && e.ts < to).collect()
    }

    pub fn count(&self, kind: EventKind) -> u64 {
        self.counts[kind.index()]
    }

    pub fn total_recorded(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
