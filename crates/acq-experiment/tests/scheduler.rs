use acq_core::abort::AbortSignal;
use acq_core::config::EngineConfig;
use acq_core::error::AcqError;
use acq_driver_mock::{MockHardware, TimingConfig};
use acq_experiment::{
    AcquisitionEngine, AcquisitionSettings, CombinedRunState, EventProgress, MultiAcquisitionScheduler,
    RunState, SettingsUpdate, SpaceMode, TimeSpec, TimeUnit,
};
use acq_geometry::{Footprint, GeometryProvider, Point2, Region};
use acq_pairing::PairingStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn engine(mock: &MockHardware) -> (AcquisitionEngine, Arc<GeometryProvider>) {
    let config = EngineConfig::default();
    let geometry = Arc::new(GeometryProvider::new(config.tiling));
    let engine = AcquisitionEngine::new(
        mock.hardware_set(),
        geometry.clone(),
        Arc::new(PairingStore::new()),
        &config,
    );
    (engine, geometry)
}

fn lapse(name: &str, points: usize, interval_s: f64) -> AcquisitionSettings {
    AcquisitionSettings::new(name).with_time(TimeSpec::points(points, interval_s, TimeUnit::Seconds))
}

fn saved_order(mock: &MockHardware) -> Vec<(String, usize)> {
    mock.log
        .saved()
        .into_iter()
        .map(|c| (c.acquisition, c.time_index))
        .collect()
}

#[tokio::test]
async fn parallel_group_interleaves_by_time_point() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![lapse("A", 3, 0.0), lapse("B", 3, 0.0)]);
    scheduler.add_to_parallel_grouping(1).unwrap();

    let summary = scheduler.run_all(&engine).unwrap().wait().await.unwrap();
    assert_eq!(summary.state, CombinedRunState::Completed);
    assert_eq!(summary.completed_events(), 6);
    assert_eq!(
        saved_order(&mock),
        vec![
            ("A".to_string(), 0),
            ("B".to_string(), 0),
            ("A".to_string(), 1),
            ("B".to_string(), 1),
            ("A".to_string(), 2),
            ("B".to_string(), 2),
        ]
    );
    assert_eq!(scheduler.run_state(), CombinedRunState::Completed);
}

#[tokio::test]
async fn serial_entries_run_to_completion_in_order() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![lapse("A", 2, 0.0), lapse("B", 2, 0.0)]);
    scheduler.move_down(0).unwrap();

    scheduler.run_all(&engine).unwrap().wait().await.unwrap();
    assert_eq!(
        saved_order(&mock),
        vec![
            ("B".to_string(), 0),
            ("B".to_string(), 1),
            ("A".to_string(), 0),
            ("A".to_string(), 1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn grouped_time_points_share_the_interval() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![lapse("A", 3, 5.0), lapse("B", 3, 5.0)]);
    scheduler.add_to_parallel_grouping(1).unwrap();

    let started = tokio::time::Instant::now();
    scheduler.run_all(&engine).unwrap().wait().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));
}

#[tokio::test]
async fn configuration_failure_skips_only_that_entry() {
    let mock = MockHardware::default();
    let (engine, geometry) = engine(&mock);
    let region = geometry.add_region(Region::new("gone", Point2::new(0.0, 0.0), 1, 1));
    geometry.delete_region(region).unwrap();

    let broken = AcquisitionSettings::new("broken").with_space(SpaceMode::Region2D {
        footprint: Footprint::Region(region),
    });
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![broken, lapse("fine", 1, 0.0)]);
    let summary = scheduler.run_all(&engine).unwrap().wait().await.unwrap();

    assert_eq!(summary.state, CombinedRunState::Completed);
    assert_eq!(summary.entries.len(), 2);
    assert!(summary.entries[0].summary.is_none());
    assert!(summary.entries[0].error.as_deref().unwrap_or_default().contains("region"));
    assert_eq!(
        summary.entries[1].summary.as_ref().map(|s| s.state),
        Some(RunState::Completed)
    );
    assert_eq!(saved_order(&mock), vec![("fine".to_string(), 0)]);
}

#[tokio::test(start_paused = true)]
async fn abort_stops_active_entry_and_later_ones() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![
        lapse("first", 1, 0.0),
        lapse("second", 4, 60.0),
        lapse("third", 1, 0.0),
    ]);
    let mut handle = scheduler.run_all(&engine).unwrap();

    tokio::time::sleep(Duration::from_secs(90)).await;
    let summary = handle.abort().await.unwrap();
    let calls_at_abort = mock.log.len();

    assert_eq!(summary.state, CombinedRunState::Aborted);
    assert_eq!(handle.state(), CombinedRunState::Aborted);
    let states: Vec<Option<RunState>> = summary
        .entries
        .iter()
        .map(|e| e.summary.as_ref().map(|s| s.state))
        .collect();
    assert_eq!(states, vec![Some(RunState::Completed), Some(RunState::Aborted)]);
    assert_eq!(
        saved_order(&mock),
        vec![
            ("first".to_string(), 0),
            ("second".to_string(), 0),
            ("second".to_string(), 1),
        ]
    );

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(mock.log.len(), calls_at_abort);
}

#[tokio::test(start_paused = true)]
async fn second_run_all_is_rejected() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![lapse("slow", 2, 30.0)]);

    let mut handle = scheduler.run_all(&engine).unwrap();
    assert!(matches!(scheduler.run_all(&engine), Err(AcqError::RunInProgress)));
    assert!(matches!(
        engine.run(scheduler.settings(0).unwrap()),
        Err(AcqError::RunInProgress)
    ));

    handle.wait().await.unwrap();
    // Finished runs release the hardware.
    let again = scheduler.run_all(&engine).unwrap().wait().await.unwrap();
    assert_eq!(again.state, CombinedRunState::Completed);
}

#[tokio::test(start_paused = true)]
async fn edits_during_run_are_deferred() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![lapse("original", 2, 30.0), lapse("other", 1, 0.0)]);
    let mut handle = scheduler.run_all(&engine).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let update = scheduler.update_settings(0, lapse("edited", 2, 30.0)).unwrap();
    assert_eq!(update, SettingsUpdate::Deferred);
    assert_eq!(scheduler.settings(0).unwrap().name, "original");
    assert!(matches!(scheduler.remove(0), Err(AcqError::RunInProgress)));

    // Entries not yet executing stay editable.
    let update = scheduler.update_settings(1, lapse("renamed", 1, 0.0)).unwrap();
    assert_eq!(update, SettingsUpdate::Applied);

    let summary = handle.wait().await.unwrap();
    assert_eq!(scheduler.settings(0).unwrap().name, "edited");
    // The run used the snapshot taken when it started.
    assert!(summary.entries.iter().all(|e| e.name != "edited"));
    assert_eq!(summary.entries[0].name, "original");
    assert_eq!(summary.entries[1].name, "other");
}

#[tokio::test]
async fn grouped_edit_to_new_interval_is_rejected() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![lapse("A", 3, 0.0), lapse("B", 3, 0.0)]);
    scheduler.add_to_parallel_grouping(1).unwrap();

    let result = scheduler.update_settings(1, lapse("B", 3, 60.0));
    assert!(matches!(result, Err(AcqError::IncompatibleGroup(_))));
    assert!(scheduler.group_of(1).unwrap().is_some());

    let summary = scheduler.run_all(&engine).unwrap().wait().await.unwrap();
    assert_eq!(summary.state, CombinedRunState::Completed);
    assert_eq!(summary.completed_events(), 6);
}

#[tokio::test]
async fn abort_after_last_event_still_completes() {
    let mock = MockHardware::default();
    let (engine, _) = engine(&mock);
    let signal: Arc<Mutex<Option<AbortSignal>>> = Arc::new(Mutex::new(None));
    let on_progress = signal.clone();
    engine.set_progress_callback(Arc::new(move |_: &EventProgress| {
        if let Some(signal) = on_progress.lock().as_ref() {
            signal.abort();
        }
    }));
    let scheduler = MultiAcquisitionScheduler::with_entries(vec![AcquisitionSettings::new("single")]);

    // Current-thread runtime: the worker does not start before the signal is
    // installed.
    let mut handle = scheduler.run_all(&engine).unwrap();
    *signal.lock() = Some(handle.abort_signal());
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.state, CombinedRunState::Completed);
    assert_eq!(summary.completed_events(), 1);
    assert_eq!(summary.entries[0].summary.as_ref().unwrap().state, RunState::Completed);
}
