//! Interpolated sample surfaces.
//!
//! A [`Surface`] is the editable record (name, control points, method). A
//! [`SurfaceModel`] is an immutable snapshot built from it: the convex hull
//! and everything needed to answer Z queries. The provider rebuilds the model
//! lazily after any point mutation and hands out `Arc` snapshots, so readers
//! never observe a half-rebuilt model.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hull::{ConvexHull, Point2};

/// Stable surface identity within one [`GeometryProvider`](crate::GeometryProvider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// A measured control point (µm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    /// Build a control point.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Projection onto the XY plane.
    pub fn xy(&self) -> Point2 {
        Point2::new(self.x, self.y)
    }
}

/// How Z is computed inside the convex hull.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Z of the closest control point.
    NearestNeighbor,
    /// Shepard inverse-distance weighting.
    InverseDistance {
        /// Distance exponent
        power: f64,
    },
}

impl Default for InterpolationMethod {
    fn default() -> Self {
        InterpolationMethod::InverseDistance { power: 2.0 }
    }
}

/// Editable surface record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub name: String,
    pub points: Vec<Point3>,
    #[serde(default)]
    pub method: InterpolationMethod,
}

impl Surface {
    /// Empty surface.
    pub fn new(name: impl Into<String>, method: InterpolationMethod) -> Self {
        Self {
            name: name.into(),
            points: Vec::new(),
            method,
        }
    }
}

/// Result of a Z query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZSample {
    pub z: f64,
    /// The query fell outside the convex hull and was clamped to the nearest
    /// control point.
    pub extrapolated: bool,
}

/// Immutable interpolation snapshot of a surface.
#[derive(Debug, Clone)]
pub struct SurfaceModel {
    id: SurfaceId,
    name: String,
    points: Vec<Point3>,
    method: InterpolationMethod,
    hull: ConvexHull,
}

impl SurfaceModel {
    /// Build a model. Callers guarantee `points` is non-empty.
    pub(crate) fn build(id: SurfaceId, surface: &Surface) -> Self {
        let xy: Vec<Point2> = surface.points.iter().map(Point3::xy).collect();
        Self {
            id,
            name: surface.name.clone(),
            points: surface.points.clone(),
            method: surface.method,
            hull: ConvexHull::from_points(&xy),
        }
    }

    /// Surface id.
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Surface name at snapshot time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Footprint boundary.
    pub fn boundary(&self) -> &ConvexHull {
        &self.hull
    }

    /// Z at `(x, y)` without logging.
    pub fn sample(&self, x: f64, y: f64) -> ZSample {
        let p = Point2::new(x, y);
        if !self.hull.contains(p) {
            return ZSample {
                z: self.nearest(p).z,
                extrapolated: true,
            };
        }

        let z = match self.method {
            InterpolationMethod::NearestNeighbor => self.nearest(p).z,
            InterpolationMethod::InverseDistance { power } => self.inverse_distance(p, power),
        };
        ZSample {
            z,
            extrapolated: false,
        }
    }

    /// Z at `(x, y)`, warning when the point lies outside the surface.
    pub fn interpolated_z(&self, x: f64, y: f64) -> f64 {
        let sample = self.sample(x, y);
        if sample.extrapolated {
            tracing::warn!(
                surface = %self.name,
                x,
                y,
                z = sample.z,
                "Position outside surface boundary, using nearest control point"
            );
        }
        sample.z
    }

    fn nearest(&self, p: Point2) -> Point3 {
        // Non-empty by construction; ties resolve to the earliest point.
        let mut best = self.points[0];
        let mut best_d = best.xy().distance_sq(p);
        for candidate in &self.points[1..] {
            let d = candidate.xy().distance_sq(p);
            if d < best_d {
                best = *candidate;
                best_d = d;
            }
        }
        best
    }

    fn inverse_distance(&self, p: Point2, power: f64) -> f64 {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for point in &self.points {
            let d2 = point.xy().distance_sq(p);
            if d2 < 1e-12 {
                return point.z;
            }
            let w = 1.0 / d2.powf(power / 2.0);
            weighted += w * point.z;
            total += w;
        }
        weighted / total
    }
}
