// Active run - wires sampler, throttle, uploader, guidance, stops and diversion
//
// One `ActiveRun` exists per vehicle session. Samples from the position
// watch drive telemetry and route recomputation; operator actions drive the
// stop tracker and the diversion controller and trigger a recomputation
// whenever the destination may have changed.
use crate::application::diversion::{Destination, DiversionController, DiversionError, StatusAction};
use crate::application::fleet_api::FleetApi;
use crate::application::geo_sampler::{
    GeoSampler, PositionWatch, SamplerConfig, SamplerEvent, TrackingStatus,
};
use crate::application::route_guidance::{PlanBoard, RouteGuidance};
use crate::application::stop_tracker::{StopError, StopTracker, VisitConfirmation};
use crate::application::telemetry_uploader::{
    DriverIdentity, TelemetryState, TelemetryUploader, TrackingSession,
};
use crate::domain::geo::Coordinate;
use crate::domain::route::{RouteStatus, RouteStep, Stop, StopId, StopStatus};
use crate::domain::sample::LocationSample;
use crate::domain::throttle::ThrottlePolicy;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Builds a fresh position watch for every tracking start.
pub type WatchFactory = Arc<dyn Fn() -> Box<dyn PositionWatch> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Stop(#[from] StopError),

    #[error(transparent)]
    Diversion(#[from] DiversionError),
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub route_id: String,
    pub depot: Coordinate,
    pub undo_display_window: Duration,
    pub throttle: ThrottlePolicy,
    pub identity: DriverIdentity,
    pub sampler: SamplerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub distance_meters: Option<f64>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopView {
    pub id: StopId,
    pub seq: i64,
    pub name: String,
    pub status: StopStatus,
}

/// Everything the operator screen renders.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub route_id: String,
    pub tracking_status: TrackingStatus,
    pub route_status: RouteStatus,
    pub diversion_active: bool,
    pub destination: Option<Destination>,
    pub position: Option<LocationSample>,
    pub summary: Option<PlanSummary>,
    pub steps: Vec<RouteStep>,
    pub polyline: Vec<Coordinate>,
    pub routing_failed: bool,
    pub provider: Option<String>,
    pub plan_computed_at: Option<DateTime<Utc>>,
    pub stops: Vec<StopView>,
    pub next_target: Option<StopView>,
    pub progress: f64,
    pub undo_available: bool,
    pub undo_stop: Option<StopId>,
    pub telemetry: TelemetryState,
}

pub struct ActiveRun {
    stops: StopTracker,
    diversion: DiversionController,
    uploader: TelemetryUploader,
    session: TrackingSession,
    guidance: RouteGuidance,
    board: Arc<PlanBoard>,
    // Held while a destination is read and its ticket issued, so a ticket
    // is never newer than the state it was computed from.
    route_gate: Mutex<()>,
    sampler: Mutex<GeoSampler>,
    watch_factory: WatchFactory,
    last_sample: RwLock<Option<LocationSample>>,
    revision: Arc<watch::Sender<u64>>,
}

impl ActiveRun {
    pub fn new(
        settings: RunSettings,
        api: Arc<dyn FleetApi>,
        guidance: RouteGuidance,
        watch_factory: WatchFactory,
    ) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        let user_id = settings.identity.session_user();

        Arc::new(Self {
            stops: StopTracker::new(api.clone(), settings.route_id.clone(), settings.undo_display_window),
            diversion: DiversionController::new(api.clone(), settings.route_id, user_id, settings.depot),
            uploader: TelemetryUploader::new(api, &settings.identity),
            session: TrackingSession::new(settings.throttle),
            guidance,
            board: Arc::new(PlanBoard::new()),
            route_gate: Mutex::new(()),
            sampler: Mutex::new(GeoSampler::new(settings.sampler)),
            watch_factory,
            last_sample: RwLock::new(None),
            revision: Arc::new(revision),
        })
    }

    /// Receives a new revision number after every visible change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn tracking_status(&self) -> TrackingStatus {
        self.lock_sampler().status()
    }

    /// Start (or restart) position tracking for this run.
    pub fn start_tracking(self: &Arc<Self>) {
        let watch = (self.watch_factory)();
        self.session.reset();
        let events = self.lock_sampler().start(watch);

        let run = Arc::clone(self);
        tokio::spawn(async move {
            run.consume_samples(events).await;
        });
        self.notify();
    }

    pub fn stop_tracking(&self) {
        self.lock_sampler().stop();
        self.notify();
    }

    async fn consume_samples(self: Arc<Self>, mut events: mpsc::Receiver<SamplerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SamplerEvent::Sample(sample) => self.on_sample(sample),
                SamplerEvent::Error(e) => {
                    tracing::debug!(error = %e, "Position watch reported an error");
                    self.notify();
                }
            }
        }
        tracing::debug!("Sample stream ended");
        self.notify();
    }

    /// Handle one position fix: throttled upload, unthrottled recompute.
    pub fn on_sample(&self, sample: LocationSample) {
        if self.session.try_accept(&sample, Utc::now()) {
            self.uploader.spawn_upload(sample.clone());
        }

        *self.last_sample.write().unwrap_or_else(|e| e.into_inner()) = Some(sample);
        self.recompute_route();
        self.notify();
    }

    /// Current guidance destination: the depot while diverting, else the
    /// resumed or next pending stop.
    pub fn destination(&self) -> Option<Destination> {
        self.diversion.destination(&self.stops.stops())
    }

    /// Issue a route request for the current position and destination.
    /// The response is published only if no newer request was issued.
    pub fn recompute_route(&self) {
        let _gate = self.route_gate.lock().unwrap_or_else(|e| e.into_inner());

        let origin = self
            .last_sample
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|s| s.position);
        let Some(origin) = origin else {
            return;
        };

        let Some(destination) = self.destination() else {
            self.board.clear();
            return;
        };

        let target = destination.position();
        let ticket = self.board.issue();
        let guidance = self.guidance.clone();
        let board = self.board.clone();
        let revision = self.revision.clone();

        tokio::spawn(async move {
            let outcome = guidance.compute_route(origin, target).await;
            if board.publish(ticket, target, outcome) {
                revision.send_modify(|r| *r += 1);
            }
        });
    }

    pub async fn refresh(&self) -> Result<(), RunError> {
        self.stops.refresh().await?;
        self.recompute_route();
        self.notify();
        Ok(())
    }

    pub fn prepare_visit(&self, stop_id: &StopId) -> Result<VisitConfirmation, RunError> {
        Ok(self.stops.prepare_visit(stop_id)?)
    }

    /// Rebuild the confirmation the operator answered, failing if the stop
    /// changed since the prompt was shown.
    pub fn answered_visit(&self, stop_id: &StopId, seq: i64) -> Result<VisitConfirmation, RunError> {
        Ok(self.stops.answered_visit(stop_id, seq)?)
    }

    pub async fn confirm_visit(&self, confirmation: VisitConfirmation) -> Result<StopId, RunError> {
        let result = self.stops.mark_visited(confirmation).await;
        self.recompute_route();
        self.notify();
        Ok(result?)
    }

    pub async fn undo(&self) -> Result<Option<StopId>, RunError> {
        let result = self.stops.undo().await;
        if matches!(result, Ok(Some(_))) {
            self.recompute_route();
            self.notify();
        }
        Ok(result?)
    }

    pub async fn apply_status(&self, action: StatusAction) -> Result<bool, RunError> {
        let current_target = match self.destination() {
            Some(Destination::Stop { stop }) => Some(stop),
            _ => None,
        };

        let diverted = self.diversion.apply_status(action, current_target).await?;
        if let Err(e) = self.stops.refresh().await {
            tracing::warn!(error = %e, "Route refresh after status update failed");
        }
        self.recompute_route();
        self.notify();
        Ok(diverted)
    }

    pub fn resume(&self) -> Result<Option<Stop>, RunError> {
        let (restored, _event) = self.diversion.resume(self.stops.next_target())?;
        self.recompute_route();
        self.notify();
        Ok(restored)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let stops = self.stops.stops();
        let plan = self.board.current();
        let to_view = |s: &Stop| StopView {
            id: s.id.clone(),
            seq: s.seq,
            name: s.name.clone(),
            status: s.status,
        };

        RunSnapshot {
            route_id: self.stops.route_id().to_string(),
            tracking_status: self.tracking_status(),
            route_status: self.stops.route_status(),
            diversion_active: self.diversion.is_diverting(),
            destination: self.diversion.destination(&stops),
            position: self.last_sample.read().unwrap_or_else(|e| e.into_inner()).clone(),
            summary: plan.as_ref().map(|p| PlanSummary {
                distance_meters: p.outcome.plan.distance_meters,
                duration_seconds: p.outcome.plan.duration_seconds,
            }),
            steps: plan.as_ref().map(|p| p.outcome.plan.steps.clone()).unwrap_or_default(),
            polyline: plan.as_ref().map(|p| p.outcome.plan.polyline.clone()).unwrap_or_default(),
            routing_failed: plan.as_ref().is_some_and(|p| p.outcome.routing_failed),
            provider: plan.as_ref().and_then(|p| p.outcome.provider.clone()),
            plan_computed_at: plan.as_ref().map(|p| p.computed_at),
            next_target: crate::application::stop_tracker::next_target(&stops).map(to_view),
            progress: self.stops.progress(),
            stops: stops.iter().map(to_view).collect(),
            undo_available: self.stops.undo_prompt_visible(Utc::now()),
            undo_stop: self.stops.undo_record().map(|r| r.stop_id),
            telemetry: self.uploader.state(),
        }
    }

    fn notify(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn lock_sampler(&self) -> std::sync::MutexGuard<'_, GeoSampler> {
        self.sampler.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fleet_api::fake::FakeFleetApi;
    use crate::application::geo_sampler::scripted::ScriptedWatch;
    use crate::application::geo_sampler::WatchError;
    use crate::application::route_guidance::fake::FakeProvider;
    use crate::domain::route::RouteDetails;

    const DEPOT: Coordinate = Coordinate { lat: 14.70, lng: 121.10 };

    fn stop(id: &str, seq: i64) -> Stop {
        Stop {
            id: StopId::from(id),
            seq,
            name: format!("Purok {}", seq),
            position: Coordinate { lat: 14.60 + seq as f64 * 0.01, lng: 121.0 },
            status: StopStatus::Pending,
        }
    }

    fn settings() -> RunSettings {
        RunSettings {
            route_id: "route-1".to_string(),
            depot: DEPOT,
            undo_display_window: Duration::from_secs(6),
            throttle: ThrottlePolicy::default(),
            identity: DriverIdentity {
                explicit: Some("drv-1".to_string()),
                ..Default::default()
            },
            sampler: SamplerConfig {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                channel_capacity: 8,
            },
        }
    }

    fn sample_at(lat: f64) -> LocationSample {
        LocationSample::new(Coordinate { lat, lng: 121.0 }, Utc::now())
    }

    fn run_with(script: Vec<Result<LocationSample, WatchError>>) -> (Arc<FakeFleetApi>, Arc<ActiveRun>) {
        let api = Arc::new(FakeFleetApi::with_details(RouteDetails {
            stops: vec![stop("s1", 1), stop("s2", 2)],
            route_status: RouteStatus::InProgress,
        }));
        let guidance = RouteGuidance::new(vec![Arc::new(FakeProvider::ok("osrm"))]);
        let script = Mutex::new(Some(script));
        let factory: WatchFactory = Arc::new(move || {
            let steps = script.lock().unwrap().take().unwrap_or_default();
            Box::new(ScriptedWatch::new(steps)) as Box<dyn PositionWatch>
        });
        let run = ActiveRun::new(settings(), api.clone(), guidance, factory);
        (api, run)
    }

    /// Wait until the published plan leads to `target`.
    async fn plan_towards(run: &ActiveRun, target: Coordinate) {
        let mut rx = run.subscribe();
        loop {
            if run.board.current().is_some_and(|p| p.destination == target) {
                return;
            }
            tokio::time::timeout(Duration::from_secs(2), rx.changed())
                .await
                .expect("plan not published in time")
                .unwrap();
        }
    }

    /// Wait until the newest issued request has been published and return
    /// where it leads.
    async fn settled_destination(run: &ActiveRun) -> Coordinate {
        let mut rx = run.subscribe();
        loop {
            if let Some(plan) = run.board.current() {
                if plan.seq == run.board.latest_issued() {
                    return plan.destination;
                }
            }
            tokio::time::timeout(Duration::from_secs(2), rx.changed())
                .await
                .expect("latest route request never published")
                .unwrap();
        }
    }

    fn truck_full() -> StatusAction {
        StatusAction {
            status: RouteStatus::InProgress,
            truck_full: true,
            note: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sample_never_leaves_stale_destination() {
        let (_api, run) = run_with(vec![]);
        run.refresh().await.unwrap();
        run.on_sample(sample_at(14.55));

        for i in 0..300 {
            let sampling = {
                let run = run.clone();
                tokio::spawn(async move { run.on_sample(sample_at(14.55)) })
            };
            let acting = {
                let run = run.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        run.apply_status(truck_full()).await.map(|_| ())
                    } else {
                        run.resume().map(|_| ())
                    }
                })
            };
            sampling.await.unwrap();
            acting.await.unwrap().unwrap();

            let want = run.destination().map(|d| d.position());
            assert_eq!(Some(settled_destination(&run).await), want, "iteration {}", i);
        }
    }

    #[tokio::test]
    async fn test_status_action_follows_refreshed_stop_list() {
        let (api, run) = run_with(vec![]);
        run.refresh().await.unwrap();
        run.on_sample(sample_at(14.55));
        plan_towards(&run, stop("s1", 1).position).await;

        // Another device completed s1; the refresh after the status action
        // picks that up.
        api.details.lock().unwrap().stops[0].status = StopStatus::Visited;
        let action = StatusAction {
            status: RouteStatus::InProgress,
            truck_full: false,
            note: None,
        };
        assert!(!run.apply_status(action).await.unwrap());

        assert_eq!(settled_destination(&run).await, stop("s2", 2).position);
    }

    #[tokio::test]
    async fn test_status_update_carries_session_user() {
        let api = Arc::new(FakeFleetApi::default());
        let mut settings = settings();
        settings.identity.session_user_id = Some("usr-3".to_string());
        let factory: WatchFactory =
            Arc::new(|| Box::new(ScriptedWatch::new(vec![])) as Box<dyn PositionWatch>);
        let run = ActiveRun::new(settings, api.clone(), RouteGuidance::new(vec![]), factory);

        let action = StatusAction {
            status: RouteStatus::InProgress,
            truck_full: false,
            note: None,
        };
        run.apply_status(action).await.unwrap();

        assert_eq!(api.route_updates.lock().unwrap()[0].user_id.as_deref(), Some("usr-3"));
    }

    #[tokio::test]
    async fn test_sample_uploads_and_routes_to_next_stop() {
        let (api, run) = run_with(vec![]);
        run.refresh().await.unwrap();

        run.on_sample(sample_at(14.55));
        plan_towards(&run, stop("s1", 1).position).await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.next_target.map(|s| s.seq), Some(1));
        assert_eq!(snapshot.provider.as_deref(), Some("osrm"));
        assert!(!snapshot.routing_failed);

        for _ in 0..100 {
            if !api.locations.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let reports = api.locations.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].driver_id.as_deref(), Some("drv-1"));
    }

    #[tokio::test]
    async fn test_completion_moves_guidance_to_next_stop() {
        let (_api, run) = run_with(vec![]);
        run.refresh().await.unwrap();
        run.on_sample(sample_at(14.55));

        let confirmation = run.prepare_visit(&StopId::from("s1")).unwrap();
        run.confirm_visit(confirmation).await.unwrap();
        plan_towards(&run, stop("s2", 2).position).await;

        let snapshot = run.snapshot();
        assert_eq!(snapshot.progress, 0.5);
        assert!(snapshot.undo_available);

        run.undo().await.unwrap();
        plan_towards(&run, stop("s1", 1).position).await;
        assert_eq!(run.snapshot().progress, 0.0);
    }

    #[tokio::test]
    async fn test_truck_full_then_resume() {
        let (api, run) = run_with(vec![]);
        run.refresh().await.unwrap();
        run.on_sample(sample_at(14.55));

        assert!(run.apply_status(truck_full()).await.unwrap());
        plan_towards(&run, DEPOT).await;
        assert!(run.snapshot().diversion_active);

        let restored = run.resume().unwrap();
        assert_eq!(restored.map(|s| s.id), Some(StopId::from("s1")));
        plan_towards(&run, stop("s1", 1).position).await;
        assert!(!run.snapshot().diversion_active);
        assert_eq!(api.route_updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_route_complete_clears_plan() {
        let (_api, run) = run_with(vec![]);
        run.refresh().await.unwrap();
        run.on_sample(sample_at(14.55));

        for id in ["s1", "s2"] {
            let confirmation = run.prepare_visit(&StopId::from(id)).unwrap();
            run.confirm_visit(confirmation).await.unwrap();
        }

        let snapshot = run.snapshot();
        assert!(snapshot.destination.is_none());
        assert!(snapshot.next_target.is_none());
        assert_eq!(snapshot.progress, 1.0);
        assert!(run.board.current().is_none());
    }

    #[tokio::test]
    async fn test_tracking_feeds_samples() {
        let (_api, run) = run_with(vec![Ok(sample_at(14.55))]);
        run.refresh().await.unwrap();

        run.start_tracking();
        plan_towards(&run, stop("s1", 1).position).await;
        assert_eq!(run.tracking_status(), TrackingStatus::Tracking);

        run.stop_tracking();
        run.stop_tracking();
        assert_eq!(run.tracking_status(), TrackingStatus::Idle);
    }

    #[tokio::test]
    async fn test_denied_tracking_surfaces_status() {
        let (_api, run) = run_with(vec![Err(WatchError::PermissionDenied)]);
        run.start_tracking();

        let mut rx = run.subscribe();
        while run.tracking_status() != TrackingStatus::Denied {
            tokio::time::timeout(Duration::from_secs(2), rx.changed())
                .await
                .expect("denied status not reached")
                .unwrap();
        }
        assert!(run.snapshot().position.is_none());
    }
}
