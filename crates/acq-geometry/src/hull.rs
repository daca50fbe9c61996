//! Planar helpers: convex hull, containment and tile/polygon overlap.

use serde::{Deserialize, Serialize};

const EPS: f64 = 1e-9;

/// A point in the stage XY plane (µm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    /// Build a point.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn sub(self, other: Point2) -> Point2 {
        Point2::new(self.x - other.x, self.y - other.y)
    }

    /// Squared euclidean distance.
    pub fn distance_sq(self, other: Point2) -> f64 {
        let d = self.sub(other);
        d.x * d.x + d.y * d.y
    }
}

fn cross(o: Point2, a: Point2, b: Point2) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull of a point set, counter-clockwise, without repeated points.
///
/// Degenerate input yields a hull of one (single point) or two (collinear
/// points) vertices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConvexHull {
    vertices: Vec<Point2>,
}

impl ConvexHull {
    /// Andrew's monotone chain.
    pub fn from_points(points: &[Point2]) -> Self {
        let mut pts: Vec<Point2> = points.to_vec();
        pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        pts.dedup_by(|a, b| a.distance_sq(*b) < EPS * EPS);

        if pts.len() <= 2 {
            return Self { vertices: pts };
        }

        let mut lower: Vec<Point2> = Vec::with_capacity(pts.len());
        for &p in &pts {
            while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= EPS {
                lower.pop();
            }
            lower.push(p);
        }
        let mut upper: Vec<Point2> = Vec::with_capacity(pts.len());
        for &p in pts.iter().rev() {
            while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= EPS {
                upper.pop();
            }
            upper.push(p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);

        Self { vertices: lower }
    }

    /// Hull vertices in counter-clockwise order.
    pub fn vertices(&self) -> &[Point2] {
        &self.vertices
    }

    /// Whether the hull has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Axis-aligned bounds `(min, max)`.
    pub fn bounds(&self) -> Option<(Point2, Point2)> {
        let first = *self.vertices.first()?;
        let (mut min, mut max) = (first, first);
        for v in &self.vertices[1..] {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
        }
        Some((min, max))
    }

    /// Whether `p` lies inside or on the hull.
    pub fn contains(&self, p: Point2) -> bool {
        match self.vertices.len() {
            0 => false,
            1 => self.vertices[0].distance_sq(p) < EPS,
            2 => on_segment(self.vertices[0], self.vertices[1], p),
            n => (0..n).all(|i| cross(self.vertices[i], self.vertices[(i + 1) % n], p) >= -EPS),
        }
    }

    /// Whether the hull overlaps the axis-aligned rectangle centred on
    /// `center` with the given width and height.
    pub fn intersects_rect(&self, center: Point2, width: f64, height: f64) -> bool {
        let rect = Rect::around(center, width, height);

        if self.vertices.iter().any(|v| rect.contains(*v)) {
            return true;
        }
        if rect.corners().iter().chain(std::iter::once(&center)).any(|c| self.contains(*c)) {
            return true;
        }

        let n = self.vertices.len();
        if n < 2 {
            return false;
        }
        let corners = rect.corners();
        for i in 0..n {
            let (a, b) = (self.vertices[i], self.vertices[(i + 1) % n]);
            for j in 0..4 {
                if segments_intersect(a, b, corners[j], corners[(j + 1) % 4]) {
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    min: Point2,
    max: Point2,
}

impl Rect {
    fn around(center: Point2, width: f64, height: f64) -> Self {
        Self {
            min: Point2::new(center.x - width / 2.0, center.y - height / 2.0),
            max: Point2::new(center.x + width / 2.0, center.y + height / 2.0),
        }
    }

    fn contains(&self, p: Point2) -> bool {
        p.x >= self.min.x - EPS && p.x <= self.max.x + EPS && p.y >= self.min.y - EPS && p.y <= self.max.y + EPS
    }

    fn corners(&self) -> [Point2; 4] {
        [
            self.min,
            Point2::new(self.max.x, self.min.y),
            self.max,
            Point2::new(self.min.x, self.max.y),
        ]
    }
}

fn on_segment(a: Point2, b: Point2, p: Point2) -> bool {
    cross(a, b, p).abs() <= EPS * (1.0 + a.distance_sq(b).sqrt())
        && p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}

fn segments_intersect(p1: Point2, p2: Point2, q1: Point2, q2: Point2) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    if ((d1 > EPS && d2 < -EPS) || (d1 < -EPS && d2 > EPS)) && ((d3 > EPS && d4 < -EPS) || (d3 < -EPS && d4 > EPS)) {
        return true;
    }
    on_segment(q1, q2, p1) || on_segment(q1, q2, p2) || on_segment(p1, p2, q1) || on_segment(p1, p2, q2)
}
