//! Multi-object tracking across frames
//!
//! Two-pass association in the ByteTrack style: high-confidence detections
//! match against all tracks first, then low-confidence detections get a
//! rescue pass against the leftovers with a stricter IoU gate (weak boxes
//! must overlap well before we trust them). Matching is greedy in
//! ascending cost; ties resolve by center distance, then by lower track id,
//! so the same stream always produces the same assignments.
//!
//! The tracker never fails: detection gaps age tracks out, identity
//! switches are absorbed downstream by hysteresis and dwell windows.

use crate::domain::geometry::{center_distance_normalized, iou, BBox, Point};
use crate::domain::types::{MonoTs, Role, TrackId};
use crate::infra::config::TrackingConfig;
use std::collections::VecDeque;
use tracing::debug;

const POSITION_HISTORY_CAP: usize = 30;
const VELOCITY_HISTORY_CAP: usize = 10;
/// Positions considered when estimating velocity
const VELOCITY_WINDOW: usize = 5;

/// A tracked person with a stable identity
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: TrackId,
    pub bbox: BBox,
    pub confidence: f64,
    pub class_id: u32,
    /// Frames since creation
    pub age: u32,
    /// Successful detection matches
    pub hits: u32,
    /// Frames since the last matching detection
    pub time_since_update: u32,
    pub first_seen: MonoTs,
    pub last_seen: MonoTs,
    pub confirmed: bool,
    pub deleted: bool,
    /// Assigned by the guard classifier, not the tracker
    pub role: Role,
    position_history: VecDeque<Point>,
    velocity_history: VecDeque<(f64, f64)>,
}

impl Track {
    fn new(track_id: TrackId, bbox: BBox, confidence: f64, class_id: u32, now: MonoTs) -> Self {
        let mut position_history = VecDeque::with_capacity(POSITION_HISTORY_CAP);
        position_history.push_back(bbox.center());
        Self {
            track_id,
            bbox,
            confidence,
            class_id,
            age: 0,
            hits: 1,
            time_since_update: 0,
            first_seen: now,
            last_seen: now,
            confirmed: false,
            deleted: false,
            role: Role::Unknown,
            position_history,
            velocity_history: VecDeque::with_capacity(VELOCITY_HISTORY_CAP),
        }
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.bbox.center()
    }

    /// Average per-frame center delta over the most recent positions.
    /// Zero until at least two positions exist.
    pub fn velocity(&self) -> (f64, f64) {
        let n = self.position_history.len();
        if n < 2 {
            return (0.0, 0.0);
        }
        let window = n.min(VELOCITY_WINDOW);
        let recent: Vec<Point> = self.position_history.iter().skip(n - window).copied().collect();
        let steps = (recent.len() - 1) as f64;
        let first = recent[0];
        let last = recent[recent.len() - 1];
        ((last.x - first.x) / steps, (last.y - first.y) / steps)
    }

    /// Predicted bbox for the next frame: current box shifted by velocity
    pub fn predicted_bbox(&self) -> BBox {
        let (vx, vy) = self.velocity();
        self.bbox.shifted(vx, vy)
    }

    pub fn position_history(&self) -> impl Iterator<Item = &Point> {
        self.position_history.iter()
    }

    pub fn velocity_history(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.velocity_history.iter()
    }

    fn update(&mut self, bbox: BBox, confidence: f64, min_hits: u32, now: MonoTs) {
        self.bbox = bbox;
        self.confidence = confidence;
        self.time_since_update = 0;
        self.hits += 1;
        self.age += 1;
        self.last_seen = now;

        self.position_history.push_back(bbox.center());
        while self.position_history.len() > POSITION_HISTORY_CAP {
            self.position_history.pop_front();
        }

        let vel = self.velocity();
        if self.position_history.len() >= 2 {
            self.velocity_history.push_back(vel);
            while self.velocity_history.len() > VELOCITY_HISTORY_CAP {
                self.velocity_history.pop_front();
            }
        }

        if self.hits >= min_hits {
            self.confirmed = true;
        }
    }

    fn mark_missed(&mut self, max_age: u32) {
        self.time_since_update += 1;
        self.age += 1;
        if self.time_since_update > max_age {
            self.deleted = true;
        }
    }
}

/// A normalized detection ready for association
#[derive(Debug, Clone, Copy)]
pub struct TrackerInput {
    pub bbox: BBox,
    pub confidence: f64,
    pub class_id: u32,
}

pub struct Tracker {
    config: TrackingConfig,
    tracks: Vec<Track>,
    next_id: u64,
    frame_count: u64,
}

impl Tracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config, tracks: Vec::new(), next_id: 1, frame_count: 0 }
    }

    /// Process one frame of detections. Returns ids of currently confirmed
    /// tracks, sorted for deterministic downstream iteration.
    pub fn update(&mut self, detections: &[TrackerInput], now: MonoTs) -> Vec<TrackId> {
        self.frame_count += 1;

        let high: Vec<(usize, &TrackerInput)> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| d.confidence >= self.config.high_conf)
            .collect();
        let low: Vec<(usize, &TrackerInput)> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                d.confidence >= self.config.low_conf && d.confidence < self.config.high_conf
            })
            .collect();

        // First pass: high-confidence detections against all tracks
        let all_track_indices: Vec<usize> = (0..self.tracks.len()).collect();
        let (matched_high, unmatched_tracks, unmatched_high) =
            self.associate(&all_track_indices, &high, self.config.iou_threshold);

        let min_hits = self.config.min_hits;
        for (t_idx, d_idx) in &matched_high {
            let det = high[*d_idx].1;
            self.tracks[*t_idx].update(det.bbox, det.confidence, min_hits, now);
        }

        // Second pass: remaining tracks against low-confidence detections,
        // stricter IoU so weak boxes cannot steal identities
        let (matched_low, unmatched_after_low, _) =
            self.associate(&unmatched_tracks, &low, self.config.low_conf_iou_threshold);

        for (t_idx, d_idx) in &matched_low {
            let det = low[*d_idx].1;
            self.tracks[*t_idx].update(det.bbox, det.confidence, min_hits, now);
        }

        // Age out everything that found no detection this frame
        let max_age = self.config.max_age;
        for t_idx in unmatched_after_low {
            self.tracks[t_idx].mark_missed(max_age);
        }

        // Unmatched high-confidence detections start new tracks
        for d_idx in unmatched_high {
            let det = high[d_idx].1;
            let track_id = TrackId(self.next_id);
            self.next_id += 1;
            self.tracks.push(Track::new(track_id, det.bbox, det.confidence, det.class_id, now));
            debug!(track_id = %track_id, confidence = %det.confidence, "track_created");
        }

        let before = self.tracks.len();
        self.tracks.retain(|t| !t.deleted);
        let removed = before - self.tracks.len();
        if removed > 0 {
            debug!(removed = %removed, remaining = %self.tracks.len(), "tracks_expired");
        }

        let mut confirmed: Vec<TrackId> =
            self.tracks.iter().filter(|t| t.confirmed).map(|t| t.track_id).collect();
        confirmed.sort();
        confirmed
    }

    /// Greedy association of track indices with detections.
    ///
    /// Cost is `(1 - IoU(predicted, det)) + 0.1 * normalized center
    /// distance`; pairs below the IoU gate are not candidates at all.
    fn associate(
        &self,
        track_indices: &[usize],
        detections: &[(usize, &TrackerInput)],
        iou_threshold: f64,
    ) -> (Vec<(usize, usize)>, Vec<usize>, Vec<usize>) {
        if track_indices.is_empty() {
            return (Vec::new(), Vec::new(), (0..detections.len()).collect());
        }
        if detections.is_empty() {
            return (Vec::new(), track_indices.to_vec(), Vec::new());
        }

        struct Candidate {
            cost: f64,
            center_dist: f64,
            track_id: TrackId,
            t_idx: usize,
            d_idx: usize,
        }

        let mut candidates = Vec::new();
        for &t_idx in track_indices {
            let track = &self.tracks[t_idx];
            let predicted = track.predicted_bbox();
            for (d_idx, (_, det)) in detections.iter().enumerate() {
                let overlap = iou(&predicted, &det.bbox);
                if overlap < iou_threshold {
                    continue;
                }
                let center_dist = center_distance_normalized(&predicted, &det.bbox);
                let cost = (1.0 - overlap) + 0.1 * center_dist;
                candidates.push(Candidate {
                    cost,
                    center_dist,
                    track_id: track.track_id,
                    t_idx,
                    d_idx,
                });
            }
        }

        candidates.sort_by(|a, b| {
            a.cost
                .total_cmp(&b.cost)
                .then(a.center_dist.total_cmp(&b.center_dist))
                .then(a.track_id.cmp(&b.track_id))
        });

        let mut matched = Vec::new();
        let mut used_tracks = vec![false; self.tracks.len()];
        let mut used_dets = vec![false; detections.len()];

        for c in candidates {
            if used_tracks[c.t_idx] || used_dets[c.d_idx] {
                continue;
            }
            used_tracks[c.t_idx] = true;
            used_dets[c.d_idx] = true;
            matched.push((c.t_idx, c.d_idx));
        }

        let unmatched_tracks =
            track_indices.iter().copied().filter(|&i| !used_tracks[i]).collect();
        let unmatched_dets = (0..detections.len()).filter(|&i| !used_dets[i]).collect();
        (matched, unmatched_tracks, unmatched_dets)
    }

    pub fn get(&self, track_id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    pub fn get_mut(&mut self, track_id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.track_id == track_id)
    }

    pub fn set_role(&mut self, track_id: TrackId, role: Role) {
        if let Some(track) = self.get_mut(track_id) {
            track.role = role;
        }
    }

    pub fn iter_confirmed(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.confirmed)
    }

    #[allow(dead_code)]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
