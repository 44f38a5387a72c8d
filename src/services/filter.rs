//! Jitter smoothing over track trajectories
//!
//! Detector boxes wobble a few pixels frame to frame; zone membership and
//! proximity must not flap with them. Once a track has a full window of
//! positions, its smoothed center is the arithmetic mean of the window.
//! Until then positions pass through unfiltered.

use crate::domain::geometry::Point;
use crate::domain::types::TrackId;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

pub struct JitterFilter {
    window: usize,
    history: FxHashMap<TrackId, VecDeque<Point>>,
}

impl JitterFilter {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), history: FxHashMap::default() }
    }

    /// Record the latest raw center for a track
    pub fn add_position(&mut self, track_id: TrackId, position: Point) {
        let entry = self.history.entry(track_id).or_insert_with(VecDeque::new);
        entry.push_back(position);
        while entry.len() > self.window {
            entry.pop_front();
        }
    }

    /// Smoothed center for a track, or `None` if it was never observed
    pub fn smoothed(&self, track_id: TrackId) -> Option<Point> {
        let positions = self.history.get(&track_id)?;
        let last = *positions.back()?;

        if positions.len() < self.window {
            return Some(last);
        }

        let n = positions.len() as f64;
        let (sx, sy) = positions.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }

    /// Drop history for tracks no longer active
    pub fn retain(&mut self, active: &[TrackId]) {
        self.history.retain(|id, _| active.contains(id));
    }

    #[allow(dead_code)]
    pub fn tracked_count(&self) -> usize {
        self.history.len()
    }
}
