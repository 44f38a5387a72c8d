//! Zone model: gate-area and guard-anchor polygons
//!
//! Zones are configuration, not state. Polygon swaps arrive via the
//! control channel and are validated before they replace the active pair;
//! a rejected polygon leaves the previous one in effect.

use crate::domain::geometry::{point_in_polygon, Point};
use crate::domain::types::ZoneKind;
use crate::infra::config::validate_polygon;
use tracing::info;

/// Zone membership of one track's smoothed center
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZonePresence {
    pub in_gate_area: bool,
    pub in_guard_anchor: bool,
}

pub struct ZoneModel {
    gate_area: Vec<Point>,
    guard_anchor: Vec<Point>,
}

impl ZoneModel {
    /// Build from already-validated config polygons
    pub fn new(gate_area: Vec<Point>, guard_anchor: Vec<Point>) -> Self {
        Self { gate_area, guard_anchor }
    }

    /// Classify a smoothed center against both zones
    pub fn classify(&self, center: Point) -> ZonePresence {
        ZonePresence {
            in_gate_area: point_in_polygon(center, &self.gate_area),
            in_guard_anchor: point_in_polygon(center, &self.guard_anchor),
        }
    }

    pub fn contains(&self, zone: ZoneKind, center: Point) -> bool {
        match zone {
            ZoneKind::GateArea => point_in_polygon(center, &self.gate_area),
            ZoneKind::GuardAnchor => point_in_polygon(center, &self.guard_anchor),
        }
    }

    /// Replace both polygons. Validation failure leaves the current pair
    /// active and returns the reason.
    pub fn update(
        &mut self,
        gate_area: Vec<Point>,
        guard_anchor: Vec<Point>,
    ) -> Result<(), String> {
        validate_polygon(&gate_area).map_err(|e| format!("gate_area: {}", e))?;
        validate_polygon(&guard_anchor).map_err(|e| format!("guard_anchor: {}", e))?;

        info!(
            gate_vertices = %gate_area.len(),
            anchor_vertices = %guard_anchor.len(),
            "zones_updated"
        );
        self.gate_area = gate_area;
        self.guard_anchor = guard_anchor;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ZoneModel {
        ZoneModel::new(
            vec![
                Point::new(0.3, 0.2),
                Point::new(0.7, 0.2),
                Point::new(0.7, 0.8),
                Point::new(0.3, 0.8),
            ],
            vec![
                Point::new(0.1, 0.15),
                Point::new(0.25, 0.15),
                Point::new(0.25, 0.85),
                Point::new(0.1, 0.85),
            ],
        )
    }

    #[test]
    fn test_classify_gate_center() {
        let presence = model().classify(Point::new(0.5, 0.5));
        assert!(presence.in_gate_area);
        assert!(!presence.in_guard_anchor);
    }

    #[test]
    fn test_classify_anchor() {
        let presence = model().classify(Point::new(0.15, 0.5));
        assert!(!presence.in_gate_area);
        assert!(presence.in_guard_anchor);
    }

    #[test]
    fn test_classify_outside_both() {
        let presence = model().classify(Point::new(0.9, 0.9));
        assert_eq!(presence, ZonePresence::default());
    }

    #[test]
    fn test_update_valid() {
        let mut zones = model();
        let result = zones.update(
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0), Point::new(1.0, 1.0)],
            vec![Point::new(0.0, 0.0), Point::new(0.1, 0.0), Point::new(0.1, 0.1)],
        );
        assert!(result.is_ok());
        assert!(zones.contains(ZoneKind::GateArea, Point::new(0.9, 0.5)));
    }

    #[test]
    fn test_update_invalid_keeps_previous() {
        let mut zones = model();
        let result = zones.update(
            vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)],
            vec![Point::new(0.0, 0.0), Point::new(0.1, 0.0), Point::new(0.1, 0.1)],
        );
        assert!(result.is_err());
        // Previous gate area still active
        assert!(zones.contains(ZoneKind::GateArea, Point::new(0.5, 0.5)));
    }
}
