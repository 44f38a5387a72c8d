//! Geometry primitives: bounding boxes, distances, polygon containment
//!
//! All coordinates are normalized to `[0, 1]` by frame dimensions before
//! they reach this module. Pixel-space conversion is a presentation concern.

use serde::{Deserialize, Serialize};

/// A 2D point in normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box in normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Normalize a pixel-space box by frame dimensions
    pub fn from_pixels(px: [f64; 4], frame_w: u32, frame_h: u32) -> Self {
        let w = frame_w.max(1) as f64;
        let h = frame_h.max(1) as f64;
        Self { x1: px[0] / w, y1: px[1] / h, x2: px[2] / w, y2: px[3] / h }
    }

    #[inline]
    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Area in square pixels for a given frame size
    pub fn world_area(&self, frame_w: u32, frame_h: u32) -> f64 {
        self.area() * frame_w as f64 * frame_h as f64
    }

    /// Shift the box by a velocity vector, keeping width/height
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self { x1: self.x1 + dx, y1: self.y1 + dy, x2: self.x2 + dx, y2: self.y2 + dy }
    }
}

/// Intersection over union of two boxes. Returns 0 on non-overlap.
pub fn iou(a: &BBox, b: &BBox) -> f64 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter = inter_w * inter_h;

    let union = a.area() + b.area() - inter;
    if union < 1e-9 {
        return 0.0;
    }
    inter / union
}

/// Euclidean distance between two normalized points
#[inline]
pub fn euclidean(p: Point, q: Point) -> f64 {
    let dx = p.x - q.x;
    let dy = p.y - q.y;
    (dx * dx + dy * dy).sqrt()
}

/// Center distance normalized by the mean box height.
///
/// Used for contact detection and tracker matching: people nearer the
/// camera are larger, so raw distance alone over-penalizes the foreground.
/// Returns `f64::INFINITY` for degenerate boxes.
pub fn center_distance_normalized(a: &BBox, b: &BBox) -> f64 {
    let dist = euclidean(a.center(), b.center());
    let mean_h = (a.height() + b.height()) / 2.0;
    if mean_h < 1e-6 {
        return f64::INFINITY;
    }
    dist / mean_h
}

/// Ray-casting point-in-polygon test. A point on the boundary counts as
/// inside.
pub fn point_in_polygon(pt: Point, poly: &[Point]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (poly[i], poly[j]);

        // Boundary check: point on the segment pi..pj
        if on_segment(pt, pi, pj) {
            return true;
        }

        if (pi.y > pt.y) != (pj.y > pt.y) {
            let x_cross = (pj.x - pi.x) * (pt.y - pi.y) / (pj.y - pi.y) + pi.x;
            if pt.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(pt: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (pt.y - a.y) - (b.y - a.y) * (pt.x - a.x);
    if cross.abs() > 1e-9 {
        return false;
    }
    pt.x >= a.x.min(b.x) - 1e-9
        && pt.x <= a.x.max(b.x) + 1e-9
        && pt.y >= a.y.min(b.y) - 1e-9
        && pt.y <= a.y.max(b.y) + 1e-9
}
