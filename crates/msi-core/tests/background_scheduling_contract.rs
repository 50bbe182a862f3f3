//! Architectural Contract Test: Background Scheduling
//!
//! This test verifies how background refreshes interact with the facility.
//!
//! Constraints verified:
//! - Registration submits a request and each launch re-arms the next one
//! - A run that outlives its expiration budget is cancelled and reported failed
//! - An expired run leaves no partial merge and releases the loading flag
//! - Every completion is reported exactly once
//! - Submission failures are non-fatal; foreground sync keeps working
//!
//! If this test fails, someone has:
//! - Ignored the expiration signal
//! - Reported success for a cancelled run
//! - Made a scheduling error abort the coordinator

mod common;

use common::*;
use msi_core::scheduler::{CompletionRecord, FacilitySettings};
use msi_core::source::DataSourceDescriptor;
use msi_core::{BackgroundScheduler, Coordinator, SourceCoordinator, TokioBackgroundFacility};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const HOUR: Duration = Duration::from_secs(3600);

fn facility(expiration: Duration, max_pending: usize) -> Arc<TokioBackgroundFacility> {
    Arc::new(TokioBackgroundFacility::new(FacilitySettings {
        expiration,
        max_pending,
        minimum_interval: Duration::ZERO,
    }))
}

async fn next_completion(rx: &mut broadcast::Receiver<CompletionRecord>) -> CompletionRecord {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("completion reported in time")
        .expect("facility still running")
}

#[tokio::test]
async fn registration_submits_first_request() {
    let facility = facility(Duration::from_secs(10), 16);
    let scheduler = BackgroundScheduler::new(facility.clone(), HOUR);
    let env = environment(
        Arc::new(CountingStore::new()),
        Arc::new(ScriptedRemote::new()),
        Arc::new(CountingBundle::with_hazards(&[])),
    );
    let coordinator: Arc<dyn Coordinator> =
        Arc::new(SourceCoordinator::new(HazardSource::new(), env));

    assert!(scheduler.register(coordinator));

    let pending = facility.pending_requests();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].identifier, "msi.refresh.hazards");
    assert!(pending[0].earliest_begin > chrono::Utc::now() + chrono::Duration::minutes(59));
}

#[tokio::test]
async fn completed_run_reports_success_and_rearms() {
    let facility = facility(Duration::from_secs(10), 16);
    let scheduler = BackgroundScheduler::new(facility.clone(), HOUR);
    let store = Arc::new(CountingStore::new());
    let remote = Arc::new(ScriptedRemote::new());
    remote.respond(&[hazard("h-2", 2)]);
    let env = environment(
        store.clone(),
        remote,
        Arc::new(CountingBundle::with_hazards(&[hazard("h-1", 1)])),
    );
    let coordinator: Arc<dyn Coordinator> =
        Arc::new(SourceCoordinator::new(HazardSource::new(), env));
    assert!(scheduler.register(coordinator));

    let mut completions = facility.subscribe_completions();
    facility.launch_now("msi.refresh.hazards").unwrap();
    let record = next_completion(&mut completions).await;

    assert!(record.success);
    assert!(!record.expired);
    assert_eq!(store.stored().await, 2);
    assert_eq!(facility.pending_requests().len(), 1, "next run is armed");
    assert_eq!(facility.completions().len(), 1);
}

#[tokio::test]
async fn expired_run_is_cancelled_and_reported_failed() {
    // Budget far shorter than the remote fetch.
    let facility = facility(Duration::from_millis(100), 16);
    let scheduler = BackgroundScheduler::new(facility.clone(), HOUR);
    let store = Arc::new(CountingStore::new());
    store.seed(&[hazard("h-1", 1)]).await;
    let remote = Arc::new(ScriptedRemote::with_delay(Duration::from_secs(30)));
    remote.respond(&[hazard("h-2", 2), hazard("h-3", 3)]);
    let env = environment(
        store.clone(),
        remote.clone(),
        Arc::new(CountingBundle::with_hazards(&[])),
    );
    let status = env.status.clone();
    let coordinator: Arc<dyn Coordinator> =
        Arc::new(SourceCoordinator::new(HazardSource::new(), env));
    assert!(scheduler.register(coordinator));

    let mut completions = facility.subscribe_completions();
    facility.launch_now("msi.refresh.hazards").unwrap();
    let record = next_completion(&mut completions).await;

    assert!(!record.success);
    assert!(record.expired);
    assert_eq!(remote.request_count(), 1);
    assert_eq!(store.import_count(), 0);
    assert_eq!(store.stored().await, 1, "no partial merge");
    assert!(!status.is_loading(&hazards_key()));
    assert_eq!(status.last_sync(&hazards_key()), None);
    assert_eq!(facility.pending_requests().len(), 1, "expired run still re-arms");
}

#[tokio::test]
async fn each_launch_reports_exactly_once() {
    let facility = facility(Duration::from_secs(10), 16);
    let scheduler = BackgroundScheduler::new(facility.clone(), HOUR);
    let env = environment(
        Arc::new(CountingStore::new()),
        Arc::new(ScriptedRemote::new()),
        Arc::new(CountingBundle::with_hazards(&[])),
    );
    let coordinator: Arc<dyn Coordinator> =
        Arc::new(SourceCoordinator::new(HazardSource::new(), env));
    assert!(scheduler.register(coordinator));

    let mut completions = facility.subscribe_completions();
    for _ in 0..3 {
        facility.launch_now("msi.refresh.hazards").unwrap();
        next_completion(&mut completions).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(facility.completions().len(), 3);
}

#[tokio::test]
async fn pending_limit_is_logged_not_fatal() {
    let facility = facility(Duration::from_secs(10), 1);
    let scheduler = BackgroundScheduler::new(facility.clone(), HOUR);
    let store = Arc::new(CountingStore::new());
    let env = environment(
        store.clone(),
        Arc::new(ScriptedRemote::new()),
        Arc::new(CountingBundle::with_hazards(&[hazard("w-1", 1)])),
    );

    let hazards: Arc<dyn Coordinator> =
        Arc::new(SourceCoordinator::new(HazardSource::new(), env.clone()));
    let wrecks_source =
        HazardSource::with_descriptor(DataSourceDescriptor::new("wrecks", "Wrecks"));
    let wrecks = Arc::new(SourceCoordinator::new(wrecks_source, env));

    assert!(scheduler.register(hazards));
    assert!(!scheduler.register(wrecks.clone()));

    // Foreground sync is unaffected.
    let report = wrecks.fetch().wait().await;
    assert!(!report.cancelled);
}

#[tokio::test]
async fn shut_down_facility_refuses_registration() {
    let facility = facility(Duration::from_secs(10), 16);
    facility.shutdown();
    let scheduler = BackgroundScheduler::new(facility.clone(), HOUR);
    let env = environment(
        Arc::new(CountingStore::new()),
        Arc::new(ScriptedRemote::new()),
        Arc::new(CountingBundle::with_hazards(&[hazard("h-1", 1)])),
    );
    let coordinator = Arc::new(SourceCoordinator::new(HazardSource::new(), env));

    assert!(!scheduler.register(coordinator.clone()));
    assert!(facility.pending_requests().is_empty());

    let report = coordinator.fetch().wait().await;
    assert_eq!(report.bootstrap_changed, 1);
}
