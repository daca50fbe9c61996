//! Error types shared by every rust-acq crate.
//!
//! `AcqError` is the single library error. Its variants follow the taxonomy the
//! acquisition engine relies on to decide whether a failure ends a run or only
//! a single event:
//!
//! - **Configuration** (`UnresolvedSurface`, `UnresolvedRegion`,
//!   `NonPositiveZStep`, `EmptyFootprint`, `Configuration`): detected while
//!   expanding settings, before any hardware is touched. Always fatal to the
//!   run and returned synchronously to the caller.
//! - **Autofocus**: recovered per position, except on the first position of the
//!   first time point where no focus baseline can be established.
//! - **Motion / Capture**: retried once, then the single event is marked failed.
//! - **Writer**: fatal to the single event only.
//!
//! Driver implementations report failures through `anyhow::Error`; a
//! [`DriverError`] can be used as the concrete payload when a driver wants to
//! carry a machine-readable [`DriverErrorKind`].

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Broad classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Communication,
    Hardware,
    Timeout,
    InvalidParameter,
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a hardware driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{device}' {kind} error: {message}")]
pub struct DriverError {
    pub device: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    /// Build a driver error for `device`.
    pub fn new(device: impl Into<String>, kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the library error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

/// Primary error type for acquisition scheduling and execution.
#[derive(Error, Debug)]
pub enum AcqError {
    /// Settings reference a surface id that is no longer in the geometry store.
    ///
    /// **Error Type**: Configuration - the surface was deleted after the
    /// settings were edited. Fix the settings and re-run.
    #[error("Configuration error: surface {0} does not exist")]
    UnresolvedSurface(u64),

    /// Settings reference a region id that is no longer in the geometry store.
    #[error("Configuration error: region {0} does not exist")]
    UnresolvedRegion(u64),

    /// A Z dimension is active but the step is zero, negative or not finite.
    #[error("Configuration error: z step must be > 0 (got {0})")]
    NonPositiveZStep(f64),

    /// The footprint produced no tiles at the requested overlap.
    #[error("Configuration error: footprint '{0}' covers no tiles")]
    EmptyFootprint(String),

    /// Any other semantic validation failure of settings or configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Z was requested from a surface without control points.
    ///
    /// **Recovery Strategy**: add at least one point to the surface.
    #[error("Surface '{0}' has no points to interpolate")]
    NotInterpolated(String),

    /// Autofocus measurement failed or exceeded the allowed displacement.
    #[error("Autofocus error: {0}")]
    Autofocus(String),

    /// Stage or focus motion failed.
    #[error("Motion error: {0}")]
    Motion(String),

    /// Camera capture failed.
    #[error("Capture error: {0}")]
    Capture(String),

    /// The image writer rejected a frame.
    #[error("Writer error: {0}")]
    Writer(String),

    /// The background task driving a run panicked or was cancelled.
    #[error("Run worker terminated: {0}")]
    Worker(String),

    /// A run is already active and only one may run at a time.
    #[error("A run is already in progress")]
    RunInProgress,

    /// Entries in one parallel group have incompatible time specs.
    #[error("Parallel group is incompatible: {0}")]
    IncompatibleGroup(String),

    /// An index did not address an existing entry or row.
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Saving or loading a settings or pairing blob failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Config file error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl AcqError {
    /// True for errors that fail expansion before any hardware contact.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AcqError::UnresolvedSurface(_)
                | AcqError::UnresolvedRegion(_)
                | AcqError::NonPositiveZStep(_)
                | AcqError::EmptyFootprint(_)
                | AcqError::Configuration(_)
                | AcqError::NotInterpolated(_)
        )
    }
}

impl From<serde_json::Error> for AcqError {
    fn from(err: serde_json::Error) -> Self {
        AcqError::Persistence(err.to_string())
    }
}
