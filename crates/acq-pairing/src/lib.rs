//! `acq-pairing`
//!
//! Covariant pairings: a slave device property whose value is derived from a
//! master quantity through a piecewise-linear table of control points.
//!
//! A master is either another device property or a quantity derived from a
//! sample surface at the current tile (see [`SurfaceDataKind`]). The
//! [`PairingStore`] owns all pairings; the acquisition engine samples the
//! active ones before every capture.

pub mod pairing;
pub mod store;
pub mod surface_data;

pub use pairing::{ControlPoint, CovariantPairing, CovariantSource, CursorUpdate};
pub use store::{PairingId, PairingStore, PAIRINGS_FILE_VERSION};
pub use surface_data::{import_surface_data, SurfaceDataKind, SurfaceDataPrompt, SurfaceDataSelection};
