//! `acq-geometry`
//!
//! Geometry Provider for rust-acq: named 3-D sample surfaces built from
//! measured control points, 2-D tile grids (regions), and footprint tiling.
//!
//! Everything here is pure computation with no device access. The
//! [`GeometryProvider`] owns surfaces and regions by value; acquisition
//! settings reference them through [`SurfaceId`] and [`RegionId`].
//!
//! ```rust
//! use acq_core::config::TilingConfig;
//! use acq_geometry::{Footprint, GeometryProvider, Point3};
//!
//! let geo = GeometryProvider::new(TilingConfig::default());
//! let surface = geo.add_surface("coverslip");
//! geo.add_point(surface, Point3::new(0.0, 0.0, 10.0)).unwrap();
//! assert_eq!(geo.interpolated_z(surface, 0.0, 0.0).unwrap(), 10.0);
//! let tiles = geo.tiles_for(&Footprint::Surface(surface), 10.0).unwrap();
//! assert_eq!(tiles.len(), 1);
//! ```

pub mod footprint;
pub mod hull;
pub mod provider;
pub mod region;
pub mod surface;

pub use footprint::{Footprint, TilePosition, MAX_TILES};
pub use hull::{ConvexHull, Point2};
pub use provider::{GeometryProvider, RegionInfo, SurfaceInfo};
pub use region::{Region, RegionId};
pub use surface::{InterpolationMethod, Point3, Surface, SurfaceId, SurfaceModel, ZSample};
