//! Explainable completion score
//!
//! The score is a sum of four semantic terms so an audit can attribute a
//! decision to its evidence: a base for reaching the examination states,
//! a contact term from proximity metrics, a pose term from reach
//! gestures, and a small persistence term for session length.

use crate::infra::config::{ProximityConfig, ScoreConfig};

/// Per-component attribution of one score evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub contact_confidence: f64,
    pub pose_confidence: f64,
    pub persistence_confidence: f64,
    pub total: f64,
}

pub struct ScoreEngine {
    config: ScoreConfig,
    proximity: ProximityConfig,
}

impl ScoreEngine {
    pub fn new(config: ScoreConfig, proximity: ProximityConfig) -> Self {
        Self { config, proximity }
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Compute the score from a person's accumulated interaction metrics
    pub fn compute(
        &self,
        interaction_time: f64,
        min_center_distance: f64,
        max_iou: f64,
        pose_reach_count: u32,
        session_secs: f64,
    ) -> ScoreBreakdown {
        // Contact confidence: zero until an interaction was ever observed
        let contact_confidence = if interaction_time > 0.0 {
            let dist_conf = if min_center_distance.is_finite() {
                clamp01(1.0 - min_center_distance / self.proximity.center_dist_scale)
            } else {
                0.0
            };
            let iou_conf = clamp01(max_iou / (3.0 * self.proximity.iou_min));
            dist_conf.max(iou_conf)
        } else {
            0.0
        };

        let pose_confidence =
            if pose_reach_count > 0 { (pose_reach_count as f64 / 10.0).min(1.0) } else { 0.0 };

        let persistence_confidence = (session_secs / 10.0).min(1.0);

        let total = self.config.base
            + self.config.contact_bonus * contact_confidence
            + self.config.pose_bonus * pose_confidence
            + self.config.persist_bonus * persistence_confidence;

        ScoreBreakdown {
            base: self.config.base,
            contact_confidence,
            pose_confidence,
            persistence_confidence,
            total: clamp01(total),
        }
    }
}

#[inline]
fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScoreEngine {
        ScoreEngine::new(ScoreConfig::default(), ProximityConfig::default())
    }

    #[test]
    fn test_base_only_without_evidence() {
        let b = engine().compute(0.0, f64::INFINITY, 0.0, 0, 0.0);
        assert_eq!(b.contact_confidence, 0.0);
        assert_eq!(b.pose_confidence, 0.0);
        assert_eq!(b.persistence_confidence, 0.0);
        assert!((b.total - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_contact_requires_interaction_time() {
        // Close distance recorded but interaction never held: no credit
        let b = engine().compute(0.0, 0.05, 0.2, 0, 5.0);
        assert_eq!(b.contact_confidence, 0.0);
    }

    #[test]
    fn test_perfect_contact() {
        let b = engine().compute(2.0, 0.0, 0.0, 0, 0.0);
        assert!((b.contact_confidence - 1.0).abs() < 1e-9);
        assert!((b.total - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_iou_alternative_path() {
        // Distance gives nothing, but IoU of 0.09 = 3 * iou_min saturates
        let b = engine().compute(1.0, 10.0, 0.09, 0, 0.0);
        assert!((b.contact_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pose_confidence_scales() {
        let b = engine().compute(0.0, f64::INFINITY, 0.0, 5, 0.0);
        assert!((b.pose_confidence - 0.5).abs() < 1e-9);
        assert!((b.total - (0.6 + 0.15 * 0.5)).abs() < 1e-9);

        let b = engine().compute(0.0, f64::INFINITY, 0.0, 25, 0.0);
        assert!((b.pose_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_persistence_saturates_at_ten_seconds() {
        let b = engine().compute(0.0, f64::INFINITY, 0.0, 0, 5.0);
        assert!((b.persistence_confidence - 0.5).abs() < 1e-9);

        let b = engine().compute(0.0, f64::INFINITY, 0.0, 0, 30.0);
        assert!((b.persistence_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_terms_max_is_exactly_one() {
        let b = engine().compute(5.0, 0.0, 1.0, 20, 60.0);
        assert!((b.total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_never_leaves_unit_interval() {
        let e = engine();
        for dist in [0.0, 0.1, 0.35, 1.0, f64::INFINITY] {
            for iou in [0.0, 0.05, 0.5, 1.0] {
                let b = e.compute(1.0, dist, iou, 7, 12.0);
                assert!((0.0..=1.0).contains(&b.total));
            }
        }
    }

    #[test]
    fn test_components_reconstruct_total() {
        let e = engine();
        let b = e.compute(1.5, 0.2, 0.04, 3, 4.0);
        let reconstructed = b.base
            + 0.2 * b.contact_confidence
            + 0.15 * b.pose_confidence
            + 0.05 * b.persistence_confidence;
        assert!((b.total - reconstructed).abs() < 1e-9);
    }
}
