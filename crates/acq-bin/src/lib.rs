//! `acq-bin`
//!
//! Support code for the `rust-acq` command line: plan files and tracing
//! setup. The binary itself lives in `main.rs`.

pub mod plan;
pub mod tracing_setup;

pub use plan::{PlanFile, Session};
pub use tracing_setup::{OutputFormat, TracingConfig};
