//! MultiAcquisitionScheduler - an ordered list of acquisitions run as one.
//!
//! Entries run top to bottom. Entries sharing a parallel group form one unit
//! that starts where its first member sits in the list; its members advance
//! in lockstep, a time point at a time. Every other entry runs to completion
//! before the next unit starts.
//!
//! Mutating list operations return index deltas so a caller holding a
//! selection cursor can keep it in sync without re-reading the list:
//!
//! | operation     | delta                                         |
//! |---------------|-----------------------------------------------|
//! | `move_up`     | `-1`, or `0` at the top                       |
//! | `move_down`   | `+1`, or `0` at the bottom                    |
//! | `remove`      | `-1` if the last row was removed, else `0`    |
//!
//! Change notifications are published as a revision counter on a
//! [`watch`] channel. A [`BatchUpdate`] guard holds them back until the
//! outermost guard is dropped.

use acq_core::abort::AbortSignal;
use acq_core::error::{AcqError, AcqResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::run_engine::{drive, AcquisitionEngine, RunState, RunSummary};
use crate::settings::{AcquisitionSettings, TimeSpec};

/// Stable entry identity, unaffected by reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntryId(Uuid);

impl EntryId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the schedule.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: EntryId,
    pub settings: Arc<AcquisitionSettings>,
    /// Parallel group, `None` for serial entries
    pub group: Option<u32>,
}

/// Result of [`MultiAcquisitionScheduler::update_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsUpdate {
    Applied,
    /// Queued until the entry's run finishes
    Deferred,
}

/// Combined run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinedRunState {
    NotRunning,
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for CombinedRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinedRunState::NotRunning => write!(f, "not running"),
            CombinedRunState::Running => write!(f, "running"),
            CombinedRunState::Completed => write!(f, "completed"),
            CombinedRunState::Aborted => write!(f, "aborted"),
        }
    }
}

/// What happened to one entry during `run_all`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    pub entry: EntryId,
    pub name: String,
    /// `None` when the entry failed expansion
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

/// Outcome of a combined run, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedSummary {
    pub state: CombinedRunState,
    pub entries: Vec<EntryOutcome>,
}

impl CombinedSummary {
    /// Images saved across all entries.
    pub fn completed_events(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| e.summary.as_ref())
            .map(|s| s.completed_events)
            .sum()
    }
}

struct SchedulerState {
    entries: Vec<ScheduleEntry>,
    next_group: u32,
    next_name: usize,
    run_state: CombinedRunState,
    /// Entries whose unit is executing
    executing: HashSet<EntryId>,
    deferred: HashMap<EntryId, AcquisitionSettings>,
}

impl SchedulerState {
    fn check_index(&self, index: usize) -> AcqResult<()> {
        if index >= self.entries.len() {
            return Err(AcqError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            });
        }
        Ok(())
    }

    fn unused_name(&mut self) -> String {
        loop {
            self.next_name += 1;
            let name = format!("Acquisition {}", self.next_name);
            if !self.entries.iter().any(|e| e.settings.name == name) {
                return name;
            }
        }
    }

    /// Ungroup the last member of `group` if it is alone.
    fn dissolve_singleton(&mut self, group: Option<u32>) {
        let Some(group) = group else { return };
        let members: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.group == Some(group))
            .map(|(i, _)| i)
            .collect();
        if let [only] = members.as_slice() {
            self.entries[*only].group = None;
        }
    }

    /// Settings an entry will run with: its pending edit, else its current
    /// settings.
    fn effective_settings(&self, entry: &ScheduleEntry) -> Arc<AcquisitionSettings> {
        match self.deferred.get(&entry.id) {
            Some(pending) => Arc::new(pending.clone()),
            None => entry.settings.clone(),
        }
    }

    /// First other member of `index`'s group whose time-lapse differs from
    /// `time`.
    fn incompatible_member(&self, index: usize, time: &TimeSpec) -> Option<String> {
        let entry = &self.entries[index];
        let group = entry.group?;
        self.entries
            .iter()
            .filter(|e| e.id != entry.id && e.group == Some(group))
            .map(|e| self.effective_settings(e))
            .find(|s| !s.time.compatible_with(time))
            .map(|s| s.name.clone())
    }

    /// Execution units in list order; a group sits at its first member.
    fn units(&self) -> Vec<Vec<ScheduleEntry>> {
        let mut units: Vec<Vec<ScheduleEntry>> = Vec::new();
        let mut group_slot: HashMap<u32, usize> = HashMap::new();
        for entry in &self.entries {
            match entry.group {
                Some(group) => match group_slot.get(&group) {
                    Some(&slot) => units[slot].push(entry.clone()),
                    None => {
                        group_slot.insert(group, units.len());
                        units.push(vec![entry.clone()]);
                    }
                },
                None => units.push(vec![entry.clone()]),
            }
        }
        units
    }
}

struct Inner {
    state: Mutex<SchedulerState>,
    revision: watch::Sender<u64>,
    batch_depth: AtomicUsize,
    dirty: AtomicBool,
}

impl Inner {
    fn notify(&self) {
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            self.dirty.store(true, Ordering::Release);
        } else {
            self.bump();
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    fn mark_executing(&self, ids: &[EntryId]) {
        self.state.lock().executing.extend(ids.iter().copied());
    }

    /// Unlock entries and apply any edits queued while they ran.
    ///
    /// An applied edit that no longer matches its group's time-lapse takes
    /// the entry out of the group.
    fn release(&self, ids: &[EntryId]) {
        let mut applied = false;
        {
            let mut state = self.state.lock();
            for id in ids {
                state.executing.remove(id);
                let Some(settings) = state.deferred.remove(id) else {
                    continue;
                };
                let Some(index) = state.entries.iter().position(|e| e.id == *id) else {
                    continue;
                };
                debug!(entry = %id, acquisition = %settings.name, "Applying deferred settings");
                let time = settings.time;
                state.entries[index].settings = Arc::new(settings);
                applied = true;
                if let Some(other) = state.incompatible_member(index, &time) {
                    warn!(
                        acquisition = %state.entries[index].settings.name,
                        conflicts_with = %other,
                        "Deferred edit changed the time-lapse, leaving parallel group"
                    );
                    let group = state.entries[index].group.take();
                    state.dissolve_singleton(group);
                }
            }
        }
        if applied {
            self.notify();
        }
    }

    fn finish(&self, state: CombinedRunState) {
        self.state.lock().run_state = state;
        self.notify();
    }
}

/// Ordered multi-acquisition list. Clones share the same list.
#[derive(Clone)]
pub struct MultiAcquisitionScheduler {
    inner: Arc<Inner>,
}

impl Default for MultiAcquisitionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiAcquisitionScheduler {
    /// A schedule holding one default acquisition.
    pub fn new() -> Self {
        Self::with_entries(Vec::new())
    }

    /// A schedule holding `settings` in order, or one default acquisition
    /// if empty.
    pub fn with_entries(settings: Vec<AcquisitionSettings>) -> Self {
        let (revision, _) = watch::channel(0);
        let mut state = SchedulerState {
            entries: Vec::new(),
            next_group: 0,
            next_name: 0,
            run_state: CombinedRunState::NotRunning,
            executing: HashSet::new(),
            deferred: HashMap::new(),
        };
        for s in settings {
            state.entries.push(ScheduleEntry {
                id: EntryId::new(),
                settings: Arc::new(s),
                group: None,
            });
        }
        if state.entries.is_empty() {
            let name = state.unused_name();
            state.entries.push(ScheduleEntry {
                id: EntryId::new(),
                settings: Arc::new(AcquisitionSettings::new(name)),
                group: None,
            });
        }
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                revision,
                batch_depth: AtomicUsize::new(0),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    /// Revision counter bumped after every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Hold change notifications until the returned guard is dropped.
    pub fn batch(&self) -> BatchUpdate<'_> {
        self.inner.batch_depth.fetch_add(1, Ordering::AcqRel);
        BatchUpdate { scheduler: self }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Never true; the schedule keeps at least one entry.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<ScheduleEntry> {
        self.inner.state.lock().entries.clone()
    }

    pub fn settings(&self, index: usize) -> AcqResult<Arc<AcquisitionSettings>> {
        let state = self.inner.state.lock();
        state.check_index(index)?;
        Ok(state.entries[index].settings.clone())
    }

    pub fn group_of(&self, index: usize) -> AcqResult<Option<u32>> {
        let state = self.inner.state.lock();
        state.check_index(index)?;
        Ok(state.entries[index].group)
    }

    pub fn run_state(&self) -> CombinedRunState {
        self.inner.state.lock().run_state
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Append an acquisition with default settings and a fresh name.
    pub fn add_new(&self) -> usize {
        let index = {
            let mut state = self.inner.state.lock();
            let name = state.unused_name();
            state.entries.push(ScheduleEntry {
                id: EntryId::new(),
                settings: Arc::new(AcquisitionSettings::new(name)),
                group: None,
            });
            state.entries.len() - 1
        };
        self.inner.notify();
        index
    }

    /// Append `settings`.
    pub fn add(&self, settings: AcquisitionSettings) -> usize {
        let index = {
            let mut state = self.inner.state.lock();
            state.entries.push(ScheduleEntry {
                id: EntryId::new(),
                settings: Arc::new(settings),
                group: None,
            });
            state.entries.len() - 1
        };
        self.inner.notify();
        index
    }

    /// Insert a copy of entry `index` right below it, outside any group.
    pub fn duplicate(&self, index: usize) -> AcqResult<usize> {
        let inserted = {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            let mut settings = (*state.entries[index].settings).clone();
            settings.name = format!("{} copy", settings.name);
            state.entries.insert(
                index + 1,
                ScheduleEntry {
                    id: EntryId::new(),
                    settings: Arc::new(settings),
                    group: None,
                },
            );
            index + 1
        };
        self.inner.notify();
        Ok(inserted)
    }

    /// Remove entry `index`. The last remaining entry is kept.
    ///
    /// Returns `-1` when the bottom row was removed so a cursor on it moves
    /// up, `0` otherwise.
    pub fn remove(&self, index: usize) -> AcqResult<isize> {
        let delta = {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            if state.entries.len() == 1 {
                return Ok(0);
            }
            if state.executing.contains(&state.entries[index].id) {
                return Err(AcqError::RunInProgress);
            }
            let removed = state.entries.remove(index);
            state.deferred.remove(&removed.id);
            state.dissolve_singleton(removed.group);
            if index == state.entries.len() {
                -1
            } else {
                0
            }
        };
        self.inner.notify();
        Ok(delta)
    }

    /// Swap entry `index` with the one above. `-1`, or `0` at the top.
    pub fn move_up(&self, index: usize) -> AcqResult<isize> {
        let delta = {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            if index == 0 {
                return Ok(0);
            }
            state.entries.swap(index, index - 1);
            -1
        };
        self.inner.notify();
        Ok(delta)
    }

    /// Swap entry `index` with the one below. `+1`, or `0` at the bottom.
    pub fn move_down(&self, index: usize) -> AcqResult<isize> {
        let delta = {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            if index + 1 == state.entries.len() {
                return Ok(0);
            }
            state.entries.swap(index, index + 1);
            1
        };
        self.inner.notify();
        Ok(delta)
    }

    /// Put entry `index` in the parallel group of the entry above it,
    /// creating the group if needed. Returns the group id.
    ///
    /// Members must share the same time-lapse schedule.
    pub fn add_to_parallel_grouping(&self, index: usize) -> AcqResult<u32> {
        let group = {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            if index == 0 {
                return Err(AcqError::Configuration(
                    "the first acquisition has no entry above to group with".into(),
                ));
            }
            let above = state.entries[index - 1].clone();
            let entry = state.entries[index].clone();
            if above.group.is_some() && above.group == entry.group {
                return Ok(above.group.unwrap_or_default());
            }

            let incompatible = state
                .entries
                .iter()
                .filter(|e| e.id == above.id || (above.group.is_some() && e.group == above.group))
                .find(|e| !e.settings.time.compatible_with(&entry.settings.time));
            if let Some(other) = incompatible {
                return Err(AcqError::IncompatibleGroup(format!(
                    "'{}' and '{}' have different time-lapse settings",
                    entry.settings.name, other.settings.name
                )));
            }

            let group = match above.group {
                Some(group) => group,
                None => {
                    let group = state.next_group;
                    state.next_group += 1;
                    state.entries[index - 1].group = Some(group);
                    group
                }
            };
            state.entries[index].group = Some(group);
            state.dissolve_singleton(entry.group);
            debug!(acquisition = %entry.settings.name, group, "Joined parallel group");
            group
        };
        self.inner.notify();
        Ok(group)
    }

    /// Take entry `index` out of its parallel group.
    pub fn remove_from_parallel_grouping(&self, index: usize) -> AcqResult<()> {
        {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            let Some(group) = state.entries[index].group.take() else {
                return Ok(());
            };
            state.dissolve_singleton(Some(group));
        }
        self.inner.notify();
        Ok(())
    }

    /// Replace the settings of entry `index`; queued while it is executing.
    ///
    /// A grouped entry keeps its group, so its new time-lapse must match the
    /// other members or the update is rejected with
    /// [`AcqError::IncompatibleGroup`].
    pub fn update_settings(&self, index: usize, settings: AcquisitionSettings) -> AcqResult<SettingsUpdate> {
        let update = {
            let mut state = self.inner.state.lock();
            state.check_index(index)?;
            if let Some(other) = state.incompatible_member(index, &settings.time) {
                return Err(AcqError::IncompatibleGroup(format!(
                    "'{}' would no longer share the time-lapse of '{}'",
                    settings.name, other
                )));
            }
            let id = state.entries[index].id;
            if state.executing.contains(&id) {
                info!(acquisition = %settings.name, "Entry is running, deferring settings update");
                state.deferred.insert(id, settings);
                SettingsUpdate::Deferred
            } else {
                state.entries[index].settings = Arc::new(settings);
                SettingsUpdate::Applied
            }
        };
        if update == SettingsUpdate::Applied {
            self.inner.notify();
        }
        Ok(update)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run every entry on `engine` in a background task.
    ///
    /// Rejected with [`AcqError::RunInProgress`] while another combined run
    /// or any engine run is active. An entry that fails expansion is
    /// recorded and skipped.
    pub fn run_all(&self, engine: &AcquisitionEngine) -> AcqResult<CombinedRunHandle> {
        let guard = engine.try_acquire()?;
        let units = {
            let mut state = self.inner.state.lock();
            if state.run_state == CombinedRunState::Running {
                return Err(AcqError::RunInProgress);
            }
            state.run_state = CombinedRunState::Running;
            state.units()
        };
        self.inner.notify();
        info!(units = units.len(), "Starting combined run");

        let (state_tx, state_rx) = watch::channel(CombinedRunState::Running);
        let abort = AbortSignal::new();
        let inner = self.inner.clone();
        let engine = engine.clone();
        let signal = abort.clone();
        let worker = tokio::spawn(async move {
            let _guard = guard;
            let summary = execute(&inner, &engine, units, &signal).await;
            inner.finish(summary.state);
            state_tx.send_replace(summary.state);
            info!(state = %summary.state, entries = summary.entries.len(), "Combined run finished");
            summary
        });

        Ok(CombinedRunHandle {
            state: state_rx,
            abort,
            worker: Some(worker),
            summary: None,
        })
    }
}

async fn execute(
    inner: &Inner,
    engine: &AcquisitionEngine,
    units: Vec<Vec<ScheduleEntry>>,
    abort: &AbortSignal,
) -> CombinedSummary {
    let mut outcomes = Vec::new();
    let mut aborted = false;
    for unit in units {
        if abort.is_aborted() {
            aborted = true;
            break;
        }
        let ids: Vec<EntryId> = unit.iter().map(|e| e.id).collect();
        inner.mark_executing(&ids);

        let mut runs = Vec::new();
        let mut started = Vec::new();
        let mut slots: Vec<Option<EntryOutcome>> = Vec::with_capacity(unit.len());
        let lead = unit.first().map(|e| e.settings.clone());
        for entry in &unit {
            if let Some(lead) = lead.as_ref().filter(|l| !l.time.compatible_with(&entry.settings.time)) {
                let error = AcqError::IncompatibleGroup(format!(
                    "'{}' does not share the time-lapse of '{}'",
                    entry.settings.name, lead.name
                ));
                warn!(acquisition = %entry.settings.name, error = %error, "Skipping acquisition");
                slots.push(Some(EntryOutcome {
                    entry: entry.id,
                    name: entry.settings.name.clone(),
                    summary: None,
                    error: Some(error.to_string()),
                }));
                continue;
            }
            let (state, _) = watch::channel(RunState::Idle);
            match engine.prepare(entry.settings.clone(), abort.clone(), state) {
                Ok(run) => {
                    runs.push(run);
                    started.push(slots.len());
                    slots.push(None);
                }
                Err(e) => {
                    warn!(acquisition = %entry.settings.name, error = %e, "Skipping acquisition");
                    slots.push(Some(EntryOutcome {
                        entry: entry.id,
                        name: entry.settings.name.clone(),
                        summary: None,
                        error: Some(e.to_string()),
                    }));
                }
            }
        }

        if !runs.is_empty() {
            let summaries = drive(runs, abort).await;
            aborted |= summaries.iter().any(|s| s.state == RunState::Aborted);
            for (slot, summary) in started.into_iter().zip(summaries) {
                let entry = &unit[slot];
                slots[slot] = Some(EntryOutcome {
                    entry: entry.id,
                    name: entry.settings.name.clone(),
                    error: summary.error.clone(),
                    summary: Some(summary),
                });
            }
        }

        outcomes.extend(slots.into_iter().flatten());
        inner.release(&ids);
    }

    let state = if aborted {
        CombinedRunState::Aborted
    } else {
        CombinedRunState::Completed
    };
    CombinedSummary {
        state,
        entries: outcomes,
    }
}

/// Defers scheduler notifications; the outermost guard publishes one
/// revision on drop if anything changed.
pub struct BatchUpdate<'a> {
    scheduler: &'a MultiAcquisitionScheduler,
}

impl Drop for BatchUpdate<'_> {
    fn drop(&mut self) {
        let inner = &self.scheduler.inner;
        if inner.batch_depth.fetch_sub(1, Ordering::AcqRel) == 1 && inner.dirty.swap(false, Ordering::AcqRel) {
            inner.bump();
        }
    }
}

/// Handle on a combined run.
pub struct CombinedRunHandle {
    state: watch::Receiver<CombinedRunState>,
    abort: AbortSignal,
    worker: Option<JoinHandle<CombinedSummary>>,
    summary: Option<CombinedSummary>,
}

impl CombinedRunHandle {
    pub fn state(&self) -> CombinedRunState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CombinedRunState> {
        self.state.clone()
    }

    /// Stop at the next event boundary without waiting.
    pub fn request_abort(&self) {
        self.abort.abort();
    }

    /// Signal shared by every run of this combined run, e.g. for a Ctrl-C
    /// handler task.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Abort the active entry, start no further entries and wait for the
    /// worker to exit.
    pub async fn abort(&mut self) -> AcqResult<CombinedSummary> {
        info!("Combined run abort requested");
        self.abort.abort();
        self.wait().await
    }

    pub async fn wait(&mut self) -> AcqResult<CombinedSummary> {
        if let Some(worker) = self.worker.take() {
            let summary = worker.await.map_err(|e| AcqError::Worker(e.to_string()))?;
            self.summary = Some(summary);
        }
        self.summary
            .clone()
            .ok_or_else(|| AcqError::Worker("combined run finished without a summary".into()))
    }
}
