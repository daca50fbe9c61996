//! AcquisitionEngine - executes expanded acquisitions on hardware.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()  ┌───────────┐  ok   ┌─────────┐  all events  ┌───────────┐
//! │ Idle │────────▶│ Expanding │──────▶│ Running │─────────────▶│ Completed │
//! └──────┘         └─────┬─────┘       └────┬────┘              └───────────┘
//!                        │ config error     │ abort()            ┌─────────┐
//!                        │                  ├───────────────────▶│ Aborted │
//!                        ▼                  │ first-position     └─────────┘
//!                   ┌────────┐              │ autofocus failure
//!                   │ Failed │◀─────────────┘
//!                   └────────┘
//! ```
//!
//! Configuration errors are returned synchronously from [`AcquisitionEngine::run`]
//! before any hardware is touched. Per-event failures (motion, capture,
//! writer, property) are collected in the [`RunSummary`] and never end the
//! run. The abort signal is checked between events and raced against
//! time-point waits, never in the middle of a device call.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = AcquisitionEngine::new(hardware, geometry, pairings, &config);
//! let mut docs = engine.subscribe();
//!
//! let mut handle = engine.run(Arc::new(settings))?;
//! while let Ok(doc) = docs.recv().await {
//!     if let RunDocument::Stop(stop) = doc {
//!         println!("{:?}", stop.exit_status);
//!         break;
//!     }
//! }
//! let summary = handle.wait().await?;
//! ```

use acq_core::abort::AbortSignal;
use acq_core::capabilities::HardwareSet;
use acq_core::config::{EngineConfig, TilingConfig};
use acq_core::data::{ImageCoordinates, PropertyId, PropertyValue};
use acq_core::error::{AcqError, AcqResult};
use acq_geometry::GeometryProvider;
use acq_pairing::{CovariantPairing, CovariantSource, PairingStore};
use anyhow::Context;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::documents::{new_uid, EventDoc, ExitStatus, RunDocument, StartDoc, StopDoc};
use crate::expansion::{expand, AcquisitionEvent, ExpandedAcquisition};
use crate::settings::AcquisitionSettings;

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, not yet expanded
    Idle,
    /// Resolving settings against the geometry store
    Expanding,
    /// Driving hardware
    Running,
    /// Every time point executed
    Completed,
    /// Stopped by an abort request
    Aborted,
    /// Ended by a configuration or first-position autofocus error
    Failed,
}

impl RunState {
    /// Whether the run can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Expanding => "expanding",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
            RunState::Failed => "failed",
        };
        f.pad(label)
    }
}

/// Why a single event was not saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Autofocus,
    Motion,
    Property,
    Capture,
    Writer,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Autofocus => "autofocus",
            FailureKind::Motion => "motion",
            FailureKind::Property => "property",
            FailureKind::Capture => "capture",
            FailureKind::Writer => "writer",
        };
        f.write_str(label)
    }
}

/// A missing image and the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventFailure {
    pub time_index: usize,
    pub position_index: usize,
    pub slice_index: usize,
    pub channel: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Reported once per event, saved or not.
#[derive(Debug, Clone, PartialEq)]
pub struct EventProgress {
    pub acquisition: String,
    pub time_index: usize,
    pub position_index: usize,
    pub slice_index: usize,
    pub channel: String,
    pub success: bool,
}

/// Progress callback, invoked from the run worker.
pub type ProgressCallback = Arc<dyn Fn(&EventProgress) + Send + Sync>;

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_uid: String,
    pub acquisition: String,
    pub state: RunState,
    pub total_events: usize,
    /// Images saved
    pub completed_events: u64,
    pub failures: Vec<EventFailure>,
    /// Reason for `Failed`
    pub error: Option<String>,
}

impl RunSummary {
    /// Completed with every event saved.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.failures.is_empty()
    }
}

struct EngineShared {
    hardware: HardwareSet,
    geometry: Arc<GeometryProvider>,
    pairings: Arc<PairingStore>,
    retry_backoff: Duration,
    tiling: TilingConfig,
    doc_sender: broadcast::Sender<RunDocument>,
    progress: RwLock<Option<ProgressCallback>>,
    busy: AtomicBool,
}

/// Marks the engine busy until dropped.
pub(crate) struct BusyGuard {
    shared: Arc<EngineShared>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.shared.busy.store(false, Ordering::Release);
    }
}

/// Drives acquisitions on one set of hardware. Cloning shares the engine.
#[derive(Clone)]
pub struct AcquisitionEngine {
    shared: Arc<EngineShared>,
}

impl AcquisitionEngine {
    /// Create an engine.
    pub fn new(
        hardware: HardwareSet,
        geometry: Arc<GeometryProvider>,
        pairings: Arc<PairingStore>,
        config: &EngineConfig,
    ) -> Self {
        let (doc_sender, _) = broadcast::channel(config.engine.document_channel_capacity.max(1));
        Self {
            shared: Arc::new(EngineShared {
                hardware,
                geometry,
                pairings,
                retry_backoff: config.engine.retry_backoff(),
                tiling: config.tiling,
                doc_sender,
                progress: RwLock::new(None),
                busy: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to run documents.
    pub fn subscribe(&self) -> broadcast::Receiver<RunDocument> {
        self.shared.doc_sender.subscribe()
    }

    /// Install the per-event progress callback.
    pub fn set_progress_callback(&self, callback: ProgressCallback) {
        *self.shared.progress.write() = Some(callback);
    }

    /// Geometry store used for expansion.
    pub fn geometry(&self) -> &Arc<GeometryProvider> {
        &self.shared.geometry
    }

    /// Pairing store sampled during runs.
    pub fn pairings(&self) -> &Arc<PairingStore> {
        &self.shared.pairings
    }

    /// Whether a run currently owns the hardware.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Expand without running.
    pub fn preview(&self, settings: &AcquisitionSettings) -> AcqResult<ExpandedAcquisition> {
        expand(settings, &self.shared.geometry)
    }

    /// Expand `settings` and start executing it on a background task.
    ///
    /// Configuration errors are returned here and no hardware is contacted.
    /// Only one run may own the hardware at a time.
    pub fn run(&self, settings: Arc<AcquisitionSettings>) -> AcqResult<RunHandle> {
        let guard = self.try_acquire()?;
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let abort = AbortSignal::new();
        let run = self.prepare(settings, abort.clone(), state_tx)?;
        let run_uid = run.run_uid.clone();

        let signal = abort.clone();
        let worker = tokio::spawn(async move {
            let _guard = guard;
            drive(vec![run], &signal).await.into_iter().next()
        });

        Ok(RunHandle {
            run_uid,
            state: state_rx,
            abort,
            worker: Some(worker),
            summary: None,
        })
    }

    pub(crate) fn try_acquire(&self) -> AcqResult<BusyGuard> {
        self.shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AcqError::RunInProgress)?;
        Ok(BusyGuard {
            shared: self.shared.clone(),
        })
    }

    /// Expand and wrap into an executable run.
    pub(crate) fn prepare(
        &self,
        settings: Arc<AcquisitionSettings>,
        abort: AbortSignal,
        state: watch::Sender<RunState>,
    ) -> AcqResult<AcquisitionRun> {
        state.send_replace(RunState::Expanding);
        let expanded = match expand(&settings, &self.shared.geometry) {
            Ok(expanded) => expanded,
            Err(e) => {
                error!(acquisition = %settings.name, error = %e, "Expansion failed");
                state.send_replace(RunState::Failed);
                return Err(e);
            }
        };
        Ok(AcquisitionRun {
            shared: self.shared.clone(),
            run_uid: new_uid(),
            focus_offsets: vec![0.0; expanded.positions.len()],
            settings,
            expanded,
            abort,
            state,
            commanded: HashMap::new(),
            last_xy: None,
            last_z: None,
            active_channel: None,
            seq_num: 0,
            completed_time_points: 0,
            failures: Vec::new(),
        })
    }
}

/// Handle on a running acquisition.
pub struct RunHandle {
    run_uid: String,
    state: watch::Receiver<RunState>,
    abort: AbortSignal,
    worker: Option<JoinHandle<Option<RunSummary>>>,
    summary: Option<RunSummary>,
}

impl RunHandle {
    /// Run UID shared with the run's documents.
    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// State change notifications.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    /// Ask the run to stop at the next event boundary without waiting.
    pub fn request_abort(&self) {
        self.abort.abort();
    }

    /// Stop the run and wait for the worker to exit. Once this returns no
    /// further hardware call is made.
    pub async fn abort(&mut self) -> AcqResult<RunSummary> {
        info!(run_uid = %self.run_uid, "Abort requested");
        self.abort.abort();
        self.wait().await
    }

    /// Wait for the run to finish.
    pub async fn wait(&mut self) -> AcqResult<RunSummary> {
        if let Some(worker) = self.worker.take() {
            let summary = worker.await.map_err(|e| AcqError::Worker(e.to_string()))?;
            self.summary = summary;
        }
        self.summary
            .clone()
            .ok_or_else(|| AcqError::Worker("run finished without a summary".into()))
    }
}

pub(crate) enum TimePointOutcome {
    Completed,
    Aborted,
    Failed(AcqError),
}

enum RunEnd {
    Completed,
    Aborted,
    Failed(String),
}

/// One expanded acquisition being executed.
///
/// Runs are driven a time point at a time by [`drive`], which lets parallel
/// groups interleave several runs with a barrier after each time point.
pub(crate) struct AcquisitionRun {
    shared: Arc<EngineShared>,
    settings: Arc<AcquisitionSettings>,
    expanded: ExpandedAcquisition,
    run_uid: String,
    abort: AbortSignal,
    state: watch::Sender<RunState>,
    /// Accumulated autofocus correction per position
    focus_offsets: Vec<f64>,
    /// Last value the engine set on each property
    commanded: HashMap<PropertyId, PropertyValue>,
    last_xy: Option<(f64, f64)>,
    last_z: Option<f64>,
    active_channel: Option<String>,
    seq_num: u64,
    completed_time_points: usize,
    failures: Vec<EventFailure>,
}

impl AcquisitionRun {
    pub(crate) fn name(&self) -> &str {
        &self.settings.name
    }

    pub(crate) fn num_time_points(&self) -> usize {
        self.expanded.num_time_points
    }

    pub(crate) fn interval(&self) -> Duration {
        self.expanded.interval
    }

    fn is_finished(&self) -> bool {
        self.completed_time_points >= self.num_time_points()
    }

    /// Announce the run and apply the autofocus initial position.
    async fn begin(&mut self) -> AcqResult<()> {
        self.state.send_replace(RunState::Running);
        let start = StartDoc {
            uid: self.run_uid.clone(),
            time: Utc::now(),
            acquisition: self.settings.name.clone(),
            space_mode: self.settings.space.label().to_string(),
            num_time_points: self.expanded.num_time_points,
            num_positions: self.expanded.positions.len(),
            channels: self.expanded.channels.clone(),
            num_events: self.expanded.len(),
        };
        let _ = self.shared.doc_sender.send(RunDocument::Start(start));
        info!(
            run_uid = %self.run_uid,
            acquisition = %self.settings.name,
            events = self.expanded.len(),
            time_points = self.expanded.num_time_points,
            "Acquisition started"
        );

        let af = &self.settings.autofocus;
        if let (true, Some(position)) = (af.enabled, af.initial_position) {
            let property = PropertyId::new(af.z_device.clone(), "Position");
            let value = PropertyValue::Number(position);
            self.shared
                .hardware
                .properties
                .set_property(&property, &value)
                .await
                .map_err(|e| AcqError::Autofocus(format!("cannot apply initial position: {:#}", e)))?;
            debug!(device = %af.z_device, position, "Autofocus initial position applied");
            self.commanded.insert(property, value);
        }
        Ok(())
    }

    /// Execute every event of time point `t` in expansion order.
    pub(crate) async fn run_time_point(&mut self, t: usize) -> TimePointOutcome {
        let events = self.expanded.time_point(t).to_vec();
        let mut skipped_position: Option<usize> = None;

        for event in &events {
            if self.abort.is_aborted() {
                info!(run_uid = %self.run_uid, time_index = t, "Abort observed between events");
                return TimePointOutcome::Aborted;
            }

            if skipped_position == Some(event.position_index) {
                self.record_failure(event, FailureKind::Autofocus, "position skipped after autofocus failure");
                continue;
            }

            if event.autofocus_pending {
                if let Err(e) = self.autofocus(event).await {
                    self.record_failure(event, FailureKind::Autofocus, &e.to_string());
                    if t == 0 && event.position_index == 0 {
                        error!(run_uid = %self.run_uid, error = %e, "Autofocus failed on first position");
                        return TimePointOutcome::Failed(e);
                    }
                    warn!(
                        run_uid = %self.run_uid,
                        time_index = t,
                        position_index = event.position_index,
                        error = %e,
                        "Autofocus failed, skipping position"
                    );
                    skipped_position = Some(event.position_index);
                    continue;
                }
            }

            self.acquire(event).await;
        }

        self.completed_time_points += 1;
        debug!(run_uid = %self.run_uid, time_index = t, "Time point complete");
        TimePointOutcome::Completed
    }

    async fn autofocus(&mut self, event: &AcquisitionEvent) -> AcqResult<()> {
        let af = self.settings.autofocus.clone();
        if let Some((x, y)) = event.position {
            self.move_xy(x, y)
                .await
                .map_err(|e| AcqError::Autofocus(format!("cannot reach position: {:#}", e)))?;
        }
        self.activate_channel(&af.channel)
            .await
            .map_err(|e| AcqError::Autofocus(format!("cannot switch to channel {}: {:#}", af.channel, e)))?;

        let correction = self
            .shared
            .hardware
            .autofocus
            .measure(&af.channel)
            .await
            .map_err(|e| AcqError::Autofocus(format!("measurement failed: {:#}", e)))?;
        if !correction.is_finite() || correction.abs() > af.max_displacement {
            return Err(AcqError::Autofocus(format!(
                "correction {:.3} µm exceeds max displacement {:.3} µm",
                correction, af.max_displacement
            )));
        }

        if event.z.is_some() {
            self.focus_offsets[event.position_index] += correction;
        } else if correction != 0.0 {
            // No Z dimension: correct the current focus directly.
            let current = self
                .shared
                .hardware
                .focus
                .position()
                .await
                .map_err(|e| AcqError::Autofocus(format!("cannot read focus: {:#}", e)))?;
            self.move_z(current + correction)
                .await
                .map_err(|e| AcqError::Autofocus(format!("cannot apply correction: {:#}", e)))?;
        }
        debug!(
            position_index = event.position_index,
            correction,
            offset = self.focus_offsets[event.position_index],
            "Autofocus measured"
        );
        Ok(())
    }

    async fn acquire(&mut self, event: &AcquisitionEvent) {
        if let Some((x, y)) = event.position {
            if let Err(e) = self.move_xy(x, y).await {
                self.record_failure(event, FailureKind::Motion, &format!("{:#}", e));
                return;
            }
        }
        let z = event.z.map(|z| z + self.focus_offsets[event.position_index]);
        if let Some(z) = z {
            if let Err(e) = self.move_z(z).await {
                self.record_failure(event, FailureKind::Motion, &format!("{:#}", e));
                return;
            }
        }

        if let Err(e) = self.activate_channel(&event.channel).await {
            self.record_failure(event, FailureKind::Property, &format!("{:#}", e));
            return;
        }

        let applied = match self.apply_pairings(event, z).await {
            Ok(applied) => applied,
            Err(e) => {
                self.record_failure(event, FailureKind::Property, &format!("{:#}", e));
                return;
            }
        };

        let camera = self.shared.hardware.camera.clone();
        let frame = match with_retry(self.shared.retry_backoff, "capture", || camera.capture()).await {
            Ok(frame) => frame,
            Err(e) => {
                self.record_failure(event, FailureKind::Capture, &format!("{:#}", e));
                return;
            }
        };

        let coordinates = ImageCoordinates {
            acquisition: self.settings.name.clone(),
            time_index: event.time_index,
            position_index: event.position_index,
            slice_index: event.slice_index,
            channel_index: event.channel_index,
            channel: event.channel.clone(),
        };
        if let Err(e) = self.shared.hardware.writer.save(&frame, &coordinates).await {
            self.record_failure(event, FailureKind::Writer, &format!("{:#}", e));
            return;
        }

        self.seq_num += 1;
        let doc = EventDoc {
            uid: new_uid(),
            run_uid: self.run_uid.clone(),
            seq_num: self.seq_num,
            time: Utc::now(),
            time_index: event.time_index,
            position_index: event.position_index,
            slice_index: event.slice_index,
            channel: event.channel.clone(),
            x: event.position.map(|p| p.0),
            y: event.position.map(|p| p.1),
            z,
            pairings: applied,
        };
        let _ = self.shared.doc_sender.send(RunDocument::Event(doc));
        debug!(
            time_index = event.time_index,
            position_index = event.position_index,
            slice_index = event.slice_index,
            channel = %event.channel,
            "Event acquired"
        );
        self.report(event, true);
    }

    async fn move_xy(&mut self, x: f64, y: f64) -> anyhow::Result<()> {
        if self.last_xy == Some((x, y)) {
            return Ok(());
        }
        let stage = self.shared.hardware.stage.clone();
        with_retry(self.shared.retry_backoff, "move_xy", || stage.move_xy(x, y)).await?;
        self.last_xy = Some((x, y));
        let device = stage.device_name().to_string();
        self.commanded
            .insert(PropertyId::new(device.clone(), "X"), PropertyValue::Number(x));
        self.commanded
            .insert(PropertyId::new(device, "Y"), PropertyValue::Number(y));
        Ok(())
    }

    async fn move_z(&mut self, z: f64) -> anyhow::Result<()> {
        if self.last_z == Some(z) {
            return Ok(());
        }
        let focus = self.shared.hardware.focus.clone();
        with_retry(self.shared.retry_backoff, "move_z", || focus.move_z(z)).await?;
        self.last_z = Some(z);
        self.commanded.insert(
            PropertyId::new(focus.device_name(), "Position"),
            PropertyValue::Number(z),
        );
        Ok(())
    }

    /// Apply the property settings of channel `name` unless already active.
    async fn activate_channel(&mut self, name: &str) -> anyhow::Result<()> {
        if self.active_channel.as_deref() == Some(name) {
            return Ok(());
        }
        // Invalidate first so a partial failure re-applies next time.
        self.active_channel = None;
        let settings = self.settings.clone();
        if let Some(channel) = settings.channel(name) {
            for setting in &channel.settings {
                self.shared
                    .hardware
                    .properties
                    .set_property(&setting.property, &setting.value)
                    .await
                    .with_context(|| format!("setting {} for channel {}", setting.property, name))?;
                self.commanded.insert(setting.property.clone(), setting.value.clone());
            }
        }
        self.active_channel = Some(name.to_string());
        Ok(())
    }

    async fn apply_pairings(
        &mut self,
        event: &AcquisitionEvent,
        z: Option<f64>,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        let mut applied = BTreeMap::new();
        for pairing in self.shared.pairings.active_pairings() {
            let Some(master) = self.master_value(&pairing, event, z).await else {
                continue;
            };
            if !master.is_finite() {
                warn!(master = %pairing.master, slave = %pairing.slave, value = master, "Covariant master is not finite, skipping");
                continue;
            }
            let Some(value) = pairing.value_for(master) else {
                continue;
            };
            let value = PropertyValue::Number(value);
            self.shared
                .hardware
                .properties
                .set_property(&pairing.slave, &value)
                .await
                .with_context(|| format!("applying covariant {}", pairing.slave))?;
            debug!(master = %pairing.master, slave = %pairing.slave, %value, "Covariant applied");
            if let Some(v) = value.as_f64() {
                applied.insert(pairing.slave.to_string(), v);
            }
            self.commanded.insert(pairing.slave.clone(), value);
        }
        Ok(applied)
    }

    async fn master_value(
        &self,
        pairing: &CovariantPairing,
        event: &AcquisitionEvent,
        z: Option<f64>,
    ) -> Option<f64> {
        match &pairing.master {
            CovariantSource::Property { property } => {
                if let Some(v) = self.commanded.get(property).and_then(PropertyValue::as_f64) {
                    return Some(v);
                }
                match self.shared.hardware.properties.get_property(property).await {
                    Ok(value) => {
                        let v = value.as_f64();
                        if v.is_none() {
                            warn!(master = %property, %value, "Covariant master is not numeric");
                        }
                        v
                    }
                    Err(e) => {
                        warn!(master = %property, error = %e, "Cannot read covariant master");
                        None
                    }
                }
            }
            CovariantSource::SurfaceData { surface, kind } => {
                let (x, y) = event.position?;
                let z = match z {
                    Some(z) => z,
                    None => self.shared.hardware.focus.position().await.ok()?,
                };
                match self.shared.geometry.surface_model(*surface) {
                    Ok(model) => {
                        let tiling = self.shared.tiling;
                        Some(kind.evaluate(&model, x, y, z, tiling.tile_width_um, tiling.tile_height_um))
                    }
                    Err(e) => {
                        warn!(%surface, error = %e, "Surface data unavailable for covariant");
                        None
                    }
                }
            }
        }
    }

    fn record_failure(&mut self, event: &AcquisitionEvent, kind: FailureKind, message: &str) {
        warn!(
            run_uid = %self.run_uid,
            time_index = event.time_index,
            position_index = event.position_index,
            slice_index = event.slice_index,
            channel = %event.channel,
            %kind,
            reason = message,
            "Event failed"
        );
        self.failures.push(EventFailure {
            time_index: event.time_index,
            position_index: event.position_index,
            slice_index: event.slice_index,
            channel: event.channel.clone(),
            kind,
            message: message.to_string(),
        });
        self.report(event, false);
    }

    fn report(&self, event: &AcquisitionEvent, success: bool) {
        let callback = self.shared.progress.read().clone();
        if let Some(callback) = callback {
            callback(&EventProgress {
                acquisition: self.settings.name.clone(),
                time_index: event.time_index,
                position_index: event.position_index,
                slice_index: event.slice_index,
                channel: event.channel.clone(),
                success,
            });
        }
    }

    fn finish(self, end: RunEnd) -> RunSummary {
        let (state, status, reason) = match end {
            RunEnd::Completed => (RunState::Completed, ExitStatus::Success, None),
            RunEnd::Aborted => (
                RunState::Aborted,
                ExitStatus::Abort,
                Some("abort requested".to_string()),
            ),
            RunEnd::Failed(reason) => (RunState::Failed, ExitStatus::Fail, Some(reason)),
        };
        let stop = StopDoc::new(&self.run_uid, status, reason.clone(), self.seq_num, self.failures.len());
        let _ = self.shared.doc_sender.send(RunDocument::Stop(stop));
        self.state.send_replace(state);
        info!(
            run_uid = %self.run_uid,
            acquisition = %self.settings.name,
            %state,
            saved = self.seq_num,
            failed = self.failures.len(),
            "Acquisition finished"
        );

        RunSummary {
            run_uid: self.run_uid,
            acquisition: self.settings.name.clone(),
            state,
            total_events: self.expanded.len(),
            completed_events: self.seq_num,
            failures: self.failures,
            error: if state == RunState::Failed { reason } else { None },
        }
    }
}

/// Run `runs` in lockstep: time point `t` of every run completes before time
/// point `t + 1` of any run begins. Time point `t` starts no earlier than
/// `t * interval` after time point 0 started.
///
/// A single run is the degenerate case of a group of one.
pub(crate) async fn drive(runs: Vec<AcquisitionRun>, abort: &AbortSignal) -> Vec<RunSummary> {
    let mut slots: Vec<(AcquisitionRun, Option<RunEnd>)> = Vec::with_capacity(runs.len());
    for mut run in runs {
        let end = match run.begin().await {
            Ok(()) => None,
            Err(e) => {
                error!(acquisition = %run.name(), error = %e, "Acquisition could not start");
                Some(RunEnd::Failed(e.to_string()))
            }
        };
        slots.push((run, end));
    }

    let interval = slots.first().map(|(run, _)| run.interval()).unwrap_or_default();
    let num_time_points = slots.iter().map(|(run, _)| run.num_time_points()).max().unwrap_or(0);
    let start = Instant::now();

    'time: for t in 0..num_time_points {
        if t > 0 {
            let deadline = time_point_deadline(start, interval, t);
            if !abort.sleep_until(deadline).await {
                info!(time_index = t, "Abort observed while waiting for time point");
                abort_pending(&mut slots);
                break 'time;
            }
        }

        let mut aborted = false;
        for (run, end) in slots.iter_mut() {
            if end.is_some() || t >= run.num_time_points() {
                continue;
            }
            match run.run_time_point(t).await {
                TimePointOutcome::Completed => {}
                TimePointOutcome::Aborted => {
                    aborted = true;
                    break;
                }
                TimePointOutcome::Failed(e) => *end = Some(RunEnd::Failed(e.to_string())),
            }
        }
        if aborted {
            abort_pending(&mut slots);
            break 'time;
        }

        if slots.iter().all(|(_, end)| end.is_some()) {
            break;
        }
    }

    slots
        .into_iter()
        .map(|(run, end)| run.finish(end.unwrap_or(RunEnd::Completed)))
        .collect()
}

/// Start of time point `t`. Offsets past the clock's range wait until abort.
fn time_point_deadline(start: Instant, interval: Duration, t: usize) -> Instant {
    let offset = interval.saturating_mul(u32::try_from(t).unwrap_or(u32::MAX));
    start
        .checked_add(offset)
        .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365 * 30))
}

fn abort_pending(slots: &mut [(AcquisitionRun, Option<RunEnd>)]) {
    for (run, end) in slots.iter_mut() {
        if end.is_none() && !run.is_finished() {
            *end = Some(RunEnd::Aborted);
        }
    }
}

/// One attempt, then one retry after `backoff`.
async fn with_retry<T, F, Fut>(backoff: Duration, operation: &'static str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!(operation, error = %first, backoff_ms = backoff.as_millis() as u64, "Retrying after failure");
            tokio::time::sleep(backoff).await;
            op().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{AutofocusSpec, Channel, SpaceMode, TimeSpec, TimeUnit};
    use acq_driver_mock::{ops, ErrorConfig, ErrorScenario, HardwareCall, MockCamera, MockHardware};
    use acq_geometry::{Footprint, Point2, Region};
    use tracing_test::traced_test;

    struct Rig {
        mock: MockHardware,
        engine: AcquisitionEngine,
        geometry: Arc<GeometryProvider>,
    }

    fn rig(mock: MockHardware) -> Rig {
        let config = EngineConfig::default();
        let geometry = Arc::new(GeometryProvider::new(config.tiling));
        let engine = AcquisitionEngine::new(
            mock.hardware_set(),
            geometry.clone(),
            Arc::new(PairingStore::new()),
            &config,
        );
        Rig { mock, engine, geometry }
    }

    fn grid(geometry: &GeometryProvider, rows: usize, columns: usize) -> Footprint {
        Footprint::Region(geometry.add_region(Region::new("grid", Point2::new(0.0, 0.0), rows, columns)))
    }

    #[test]
    fn deadline_past_clock_range_does_not_overflow() {
        let start = Instant::now();
        assert_eq!(
            time_point_deadline(start, Duration::from_secs(10), 3),
            start + Duration::from_secs(30)
        );
        assert!(time_point_deadline(start, Duration::MAX, 5) > start);
    }

    #[tokio::test]
    async fn state_ends_completed() {
        let rig = rig(MockHardware::default());
        let mut handle = rig.engine.run(Arc::new(AcquisitionSettings::new("single"))).unwrap();
        let summary = handle.wait().await.unwrap();
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(handle.state(), RunState::Completed);
        assert_eq!(summary.completed_events, 1);
        assert!(summary.is_success());
        assert!(!rig.engine.is_busy());
    }

    #[tokio::test]
    async fn second_run_rejected_while_busy() {
        let rig = rig(MockHardware::default());
        let settings = Arc::new(AcquisitionSettings::new("a").with_time(TimeSpec::points(2, 1.0, TimeUnit::Seconds)));
        let mut first = rig.engine.run(settings.clone()).unwrap();
        assert!(matches!(rig.engine.run(settings), Err(AcqError::RunInProgress)));
        first.abort().await.unwrap();
    }

    #[tokio::test]
    async fn capture_retried_once() {
        let mock = MockHardware::default().with_camera(|log| {
            MockCamera::new("Camera", 4, 4, log).error_config(ErrorConfig::scenario(ErrorScenario::FailOnCall {
                operation: ops::CAPTURE,
                call: 1,
            }))
        });
        let rig = rig(mock);
        let summary = rig.engine.run(Arc::new(AcquisitionSettings::new("retry"))).unwrap().wait().await.unwrap();
        assert!(summary.is_success());
        assert_eq!(rig.mock.log.capture_count(), 2);
    }

    #[tokio::test]
    async fn persistent_capture_failure_marks_event_only() {
        let mock = MockHardware::default().with_camera(|log| {
            MockCamera::new("Camera", 4, 4, log).error_config(ErrorConfig::scenarios(vec![
                ErrorScenario::FailOnCall {
                    operation: ops::CAPTURE,
                    call: 1,
                },
                ErrorScenario::FailOnCall {
                    operation: ops::CAPTURE,
                    call: 2,
                },
            ]))
        });
        let rig = rig(mock);
        let footprint = grid(&rig.geometry, 1, 2);
        let settings = AcquisitionSettings::new("tiles").with_space(SpaceMode::Region2D { footprint });
        let summary = rig.engine.run(Arc::new(settings)).unwrap().wait().await.unwrap();

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.completed_events, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Capture);
        assert_eq!(summary.failures[0].position_index, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn retry_and_failure_are_logged() {
        let mock = MockHardware::default().with_camera(|log| {
            MockCamera::new("Camera", 4, 4, log).error_config(ErrorConfig::scenarios(vec![
                ErrorScenario::FailOnCall {
                    operation: ops::CAPTURE,
                    call: 1,
                },
                ErrorScenario::FailOnCall {
                    operation: ops::CAPTURE,
                    call: 2,
                },
            ]))
        });
        let rig = rig(mock);
        let summary = rig
            .engine
            .run(Arc::new(AcquisitionSettings::new("logged")))
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(summary.failures.len(), 1);
        assert!(logs_contain("Retrying after failure"));
        assert!(logs_contain("Event failed"));
    }

    #[tokio::test]
    async fn configuration_error_never_touches_hardware() {
        let rig = rig(MockHardware::default());
        let footprint = grid(&rig.geometry, 1, 1);
        if let Footprint::Region(id) = footprint {
            rig.geometry.delete_region(id).unwrap();
        }
        let settings = AcquisitionSettings::new("stale").with_space(SpaceMode::Region2D { footprint });
        let err = rig.engine.run(Arc::new(settings)).err().unwrap();
        assert!(err.is_configuration());
        assert!(rig.mock.log.is_empty());
        assert!(!rig.engine.is_busy());
    }

    fn af_settings(footprint: Footprint) -> AcquisitionSettings {
        AcquisitionSettings::new("af")
            .with_space(SpaceMode::SimpleZStack {
                footprint,
                z_start: 0.0,
                z_end: 1.0,
                z_step: 1.0,
            })
            .with_channel(Channel::new("GFP"))
            .with_autofocus(AutofocusSpec {
                enabled: true,
                channel: "GFP".into(),
                z_device: "ZStage".into(),
                max_displacement: 5.0,
                initial_position: None,
            })
    }

    #[tokio::test]
    async fn autofocus_failure_on_first_position_fails_run() {
        let mock = MockHardware::default().with_autofocus(|log| {
            acq_driver_mock::MockAutofocus::new("AF", log).corrections([50.0])
        });
        let rig = rig(mock);
        let footprint = grid(&rig.geometry, 1, 2);
        let summary = rig.engine.run(Arc::new(af_settings(footprint))).unwrap().wait().await.unwrap();
        assert_eq!(summary.state, RunState::Failed);
        assert!(summary.error.unwrap().contains("max displacement"));
        assert_eq!(rig.mock.log.capture_count(), 0);
    }

    #[tokio::test]
    async fn autofocus_failure_later_skips_position() {
        let mock = MockHardware::default().with_autofocus(|log| {
            acq_driver_mock::MockAutofocus::new("AF", log).corrections([1.0, 50.0])
        });
        let rig = rig(mock);
        let footprint = grid(&rig.geometry, 1, 2);
        let summary = rig.engine.run(Arc::new(af_settings(footprint))).unwrap().wait().await.unwrap();

        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.completed_events, 2);
        assert_eq!(summary.failures.len(), 2);
        assert!(summary
            .failures
            .iter()
            .all(|f| f.position_index == 1 && f.kind == FailureKind::Autofocus));

        // Position 0 slices are shifted by the accepted correction.
        let z_moves: Vec<f64> = rig
            .mock
            .log
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                HardwareCall::MoveZ { z } => Some(z),
                _ => None,
            })
            .collect();
        assert_eq!(z_moves, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn initial_autofocus_position_applied_first() {
        let rig = rig(MockHardware::default());
        let mut settings = AcquisitionSettings::new("af-init");
        settings.autofocus = AutofocusSpec {
            enabled: true,
            channel: "Default".into(),
            z_device: "AFOffset".into(),
            max_displacement: 5.0,
            initial_position: Some(12.0),
        };
        rig.engine.run(Arc::new(settings)).unwrap().wait().await.unwrap();
        let first = rig.mock.log.calls().into_iter().next().unwrap();
        assert_eq!(
            first,
            HardwareCall::SetProperty {
                property: PropertyId::new("AFOffset", "Position"),
                value: PropertyValue::Number(12.0),
            }
        );
    }

    #[tokio::test]
    async fn progress_reports_every_event() {
        let rig = rig(MockHardware::default());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        rig.engine
            .set_progress_callback(Arc::new(move |p: &EventProgress| sink.lock().push(p.clone())));
        let footprint = grid(&rig.geometry, 2, 2);
        let settings = AcquisitionSettings::new("p")
            .with_space(SpaceMode::Region2D { footprint })
            .with_channel(Channel::new("A"))
            .with_channel(Channel::new("B"));
        rig.engine.run(Arc::new(settings)).unwrap().wait().await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 8);
        assert!(seen.iter().all(|p| p.success));
        assert_eq!(seen[1].channel, "B");
        assert_eq!(seen[2].position_index, 1);
    }

    #[tokio::test]
    async fn documents_bracket_events() {
        let rig = rig(MockHardware::default());
        let mut docs = rig.engine.subscribe();
        let settings = AcquisitionSettings::new("docs").with_time(TimeSpec::points(3, 0.0, TimeUnit::Seconds));
        let summary = rig.engine.run(Arc::new(settings)).unwrap().wait().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(doc) = docs.try_recv() {
            assert_eq!(doc.run_uid(), summary.run_uid);
            kinds.push(match doc {
                RunDocument::Start(_) => "start",
                RunDocument::Event(_) => "event",
                RunDocument::Stop(_) => "stop",
            });
        }
        assert_eq!(kinds, vec!["start", "event", "event", "event", "stop"]);
    }
}
