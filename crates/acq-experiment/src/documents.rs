//! Run documents broadcast by the acquisition engine.
//!
//! Every run emits exactly one [`StartDoc`], one [`EventDoc`] per completed
//! image and one [`StopDoc`]:
//!
//! ```text
//! StartDoc (1)
//!    │
//!    ├── EventDoc (N, one per saved image)
//!    │
//! StopDoc (1)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Document types for acquisition runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunDocument {
    Start(StartDoc),
    Event(EventDoc),
    Stop(StopDoc),
}

impl RunDocument {
    /// The run UID this document belongs to
    pub fn run_uid(&self) -> &str {
        match self {
            RunDocument::Start(d) => &d.uid,
            RunDocument::Event(d) => &d.run_uid,
            RunDocument::Stop(d) => &d.run_uid,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Run start: what is about to be acquired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDoc {
    /// Run UID
    pub uid: String,
    pub time: DateTime<Utc>,
    pub acquisition: String,
    pub space_mode: String,
    pub num_time_points: usize,
    pub num_positions: usize,
    pub channels: Vec<String>,
    pub num_events: usize,
}

/// One saved image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDoc {
    pub uid: String,
    pub run_uid: String,
    pub seq_num: u64,
    pub time: DateTime<Utc>,
    pub time_index: usize,
    pub position_index: usize,
    pub slice_index: usize,
    pub channel: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Commanded focus position including autofocus offset
    pub z: Option<f64>,
    /// Slave values applied by covariant pairings, keyed by property
    #[serde(default)]
    pub pairings: BTreeMap<String, f64>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Abort,
    Fail,
}

/// Run stop: outcome and totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDoc {
    pub uid: String,
    pub run_uid: String,
    pub time: DateTime<Utc>,
    pub exit_status: ExitStatus,
    pub reason: Option<String>,
    pub num_events: u64,
    pub num_failed: usize,
}

impl StopDoc {
    pub(crate) fn new(
        run_uid: &str,
        exit_status: ExitStatus,
        reason: Option<String>,
        num_events: u64,
        num_failed: usize,
    ) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.to_string(),
            time: Utc::now(),
            exit_status,
            reason,
            num_events,
            num_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_json() {
        let doc = RunDocument::Stop(StopDoc::new("run-1", ExitStatus::Abort, Some("user".into()), 3, 1));
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"type\":\"stop\""));
        assert!(json.contains("\"exit_status\":\"abort\""));
        assert_eq!(doc.run_uid(), "run-1");
    }
}
