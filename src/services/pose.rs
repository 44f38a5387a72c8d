//! Optional pose adapter: keypoint ingestion and interaction predicates
//!
//! The core never runs pose inference. An upstream estimator may attach
//! 17 COCO keypoints per track to a frame; this adapter keeps a short
//! per-track pose history and derives two predicates:
//!
//! - `hand_to_torso`: a visitor wrist close to the guard's torso
//! - `reach_gesture`: a wrist moving toward the guard torso, sustained
//!
//! When no pose source is present both predicates are false and the FSM
//! falls back to contact-only evidence.

use crate::domain::geometry::{BBox, Point};
use crate::domain::types::{Keypoint, MonoTs, TrackId};
use crate::infra::config::PoseConfig;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

// COCO keypoint indices
const LEFT_SHOULDER: usize = 5;
const RIGHT_SHOULDER: usize = 6;
const LEFT_WRIST: usize = 9;
const RIGHT_WRIST: usize = 10;
const LEFT_HIP: usize = 11;
const RIGHT_HIP: usize = 12;

/// Pose frames retained per track for gesture detection
const POSE_HISTORY_CAP: usize = 5;

#[derive(Debug, Clone)]
struct PoseFrame {
    ts: MonoTs,
    keypoints: Vec<Keypoint>,
}

pub struct PoseAdapter {
    config: PoseConfig,
    history: FxHashMap<TrackId, VecDeque<PoseFrame>>,
}

impl PoseAdapter {
    pub fn new(config: PoseConfig) -> Self {
        Self { config, history: FxHashMap::default() }
    }

    pub fn set_config(&mut self, config: PoseConfig) {
        self.config = config;
    }

    /// Attach one frame of keypoints to a track
    pub fn ingest(&mut self, track_id: TrackId, keypoints: Vec<Keypoint>, now: MonoTs) {
        if !self.config.enabled || keypoints.len() < 17 {
            return;
        }
        let entry = self.history.entry(track_id).or_insert_with(VecDeque::new);
        entry.push_back(PoseFrame { ts: now, keypoints });
        while entry.len() > POSE_HISTORY_CAP {
            entry.pop_front();
        }
    }

    pub fn has_pose(&self, track_id: TrackId) -> bool {
        self.history.get(&track_id).map(|h| !h.is_empty()).unwrap_or(false)
    }

    /// Drop pose history for tracks no longer active
    pub fn retain(&mut self, active: &[TrackId]) {
        self.history.retain(|id, _| active.contains(id));
    }

    fn latest(&self, track_id: TrackId) -> Option<&PoseFrame> {
        self.history.get(&track_id)?.back()
    }

    fn keypoint(&self, frame: &PoseFrame, idx: usize) -> Option<Point> {
        let (x, y, vis) = *frame.keypoints.get(idx)?;
        if vis < self.config.keypoint_visibility {
            return None;
        }
        Some(Point::new(x, y))
    }

    fn wrists(&self, frame: &PoseFrame) -> Vec<Point> {
        [LEFT_WRIST, RIGHT_WRIST].iter().filter_map(|&i| self.keypoint(frame, i)).collect()
    }

    /// Torso box from shoulders and hips; falls back to the upper 10–60%
    /// of the track bbox when joints are occluded.
    fn torso_bbox(&self, frame: &PoseFrame, track_bbox: &BBox) -> BBox {
        let joints: Vec<Point> = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP]
            .iter()
            .filter_map(|&i| self.keypoint(frame, i))
            .collect();

        if joints.len() >= 3 {
            let x1 = joints.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
            let x2 = joints.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
            let y1 = joints.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
            let y2 = joints.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
            return BBox::new(x1, y1, x2, y2);
        }

        let h = track_bbox.height();
        BBox::new(
            track_bbox.x1,
            track_bbox.y1 + 0.1 * h,
            track_bbox.x2,
            track_bbox.y1 + 0.6 * h,
        )
    }

    /// True when either visitor wrist is within `margin * guard_height`
    /// of the guard's torso box.
    pub fn hand_to_torso(&self, visitor: TrackId, guard: TrackId, guard_bbox: &BBox) -> bool {
        if !self.config.enabled {
            return false;
        }
        let (Some(visitor_frame), Some(guard_frame)) = (self.latest(visitor), self.latest(guard))
        else {
            return false;
        };

        let torso = self.torso_bbox(guard_frame, guard_bbox);
        let threshold = self.config.hand_to_torso_margin * guard_bbox.height();

        self.wrists(visitor_frame)
            .iter()
            .any(|wrist| point_to_bbox_distance(*wrist, &torso) <= threshold)
    }

    /// True when a visitor wrist has been moving toward the guard torso
    /// centroid at `reach_velocity_thresh` or faster for at least
    /// `reach_min_duration` seconds.
    pub fn reach_gesture(&self, visitor: TrackId, guard: TrackId, guard_bbox: &BBox) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(frames) = self.history.get(&visitor) else {
            return false;
        };
        let Some(guard_frame) = self.latest(guard) else {
            return false;
        };
        if frames.len() < 2 {
            return false;
        }

        let torso = self.torso_bbox(guard_frame, guard_bbox);
        let target = torso.center();

        // Walk consecutive pose-frame pairs; track how long the approach
        // has been sustained up to the newest frame.
        let mut sustained_since: Option<MonoTs> = None;
        let mut sustained_until = MonoTs::ZERO;

        let frames: Vec<&PoseFrame> = frames.iter().collect();
        for pair in frames.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            let dt = curr.ts.since(prev.ts);
            if dt < 1e-6 {
                continue;
            }

            let prev_wrists = self.wrists(prev);
            let curr_wrists = self.wrists(curr);

            let mut approaching = false;
            for (p, c) in prev_wrists.iter().zip(curr_wrists.iter()) {
                let prev_dist = dist(*p, target);
                let curr_dist = dist(*c, target);
                let radial_velocity = (curr_dist - prev_dist) / dt;
                if radial_velocity <= -self.config.reach_velocity_thresh {
                    approaching = true;
                    break;
                }
            }

            if approaching {
                if sustained_since.is_none() {
                    sustained_since = Some(prev.ts);
                }
                sustained_until = curr.ts;
            } else {
                sustained_since = None;
            }
        }

        match sustained_since {
            Some(since) => sustained_until.since(since) >= self.config.reach_min_duration,
            None => false,
        }
    }
}

fn dist(a: Point, b: Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

fn point_to_bbox_distance(p: Point, b: &BBox) -> f64 {
    let dx = (b.x1 - p.x).max(0.0).max(p.x - b.x2);
    let dy = (b.y1 - p.y).max(0.0).max(p.y - b.y2);
    (dx * dx + dy * dy).sqrt()
}
