//! `acq-core`
//!
//! Core trait definitions and types shared by the rust-acq crates.
//!
//! ## Modules
//!
//! - [`capabilities`]: async capability traits the acquisition engine drives
//!   (stage, focus, properties, camera, autofocus, image writer)
//! - [`data`]: frames, property ids/values and image coordinates
//! - [`error`]: the [`AcqError`] taxonomy and driver errors
//! - [`abort`]: the cooperative [`AbortSignal`]
//! - [`config`]: Figment-based [`EngineConfig`]

pub mod abort;
pub mod capabilities;
pub mod config;
pub mod data;
pub mod error;

pub use abort::AbortSignal;
pub use capabilities::{
    Autofocus, Camera, FocusDrive, HardwareSet, ImageWriter, PropertyControl, XyStage,
};
pub use config::EngineConfig;
pub use data::{Frame, ImageCoordinates, PropertyId, PropertyValue};
pub use error::{AcqError, AcqResult, DriverError, DriverErrorKind};
