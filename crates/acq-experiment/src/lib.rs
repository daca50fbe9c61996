//! `acq-experiment`
//!
//! Acquisition settings, their expansion into an ordered event sequence, the
//! [`AcquisitionEngine`] that executes them on hardware and the
//! [`MultiAcquisitionScheduler`] that runs several acquisitions in order or
//! in lockstep groups.
//!
//! ## Modules
//!
//! - [`settings`]: [`AcquisitionSettings`] and its versioned JSON blob
//! - [`expansion`]: [`expand`] settings against the geometry store
//! - [`run_engine`]: per-run state machine, [`RunHandle`] and [`RunSummary`]
//! - [`scheduler`]: ordered entries, parallel groups and `run_all`
//! - [`documents`]: Start/Event/Stop documents broadcast during runs

pub mod documents;
pub mod expansion;
pub mod run_engine;
pub mod scheduler;
pub mod settings;

pub use documents::{EventDoc, ExitStatus, RunDocument, StartDoc, StopDoc};
pub use expansion::{expand, AcquisitionEvent, ExpandedAcquisition, PositionPlan};
pub use run_engine::{
    AcquisitionEngine, EventFailure, EventProgress, FailureKind, ProgressCallback, RunHandle,
    RunState, RunSummary,
};
pub use scheduler::{
    BatchUpdate, CombinedRunHandle, CombinedRunState, CombinedSummary, EntryId, EntryOutcome,
    MultiAcquisitionScheduler, ScheduleEntry, SettingsUpdate,
};
pub use settings::{
    AcquisitionSettings, AutofocusSpec, Channel, FootprintSource, PropertySetting, SpaceMode,
    TimeSpec, TimeUnit, SETTINGS_VERSION,
};
