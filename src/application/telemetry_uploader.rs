// Telemetry uploader - best-effort location reporting
use crate::application::fleet_api::{FleetApi, LocationReport};
use crate::domain::sample::LocationSample;
use crate::domain::throttle::{SentMark, ThrottlePolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Per-run throttle state. Owns the last accepted send and makes the
/// accept decision under one lock so two samples can never both pass
/// against the same baseline.
#[derive(Debug)]
pub struct TrackingSession {
    policy: ThrottlePolicy,
    last_sent: Mutex<Option<SentMark>>,
}

impl TrackingSession {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            last_sent: Mutex::new(None),
        }
    }

    /// Returns true and records the sample as the new baseline when the
    /// throttle lets it through.
    pub fn try_accept(&self, sample: &LocationSample, now: DateTime<Utc>) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        if !self.policy.should_send(sample, last_sent.as_ref(), now) {
            return false;
        }

        *last_sent = Some(SentMark {
            position: sample.position,
            sent_at: now,
        });
        true
    }

    pub fn reset(&self) {
        *self.last_sent.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Where the driver id for location reports comes from, in priority order:
/// an explicit id, the stored session user id, then the session profile.
#[derive(Debug, Clone, Default)]
pub struct DriverIdentity {
    pub explicit: Option<String>,
    pub session_user_id: Option<String>,
    pub session_profile: Option<String>,
}

impl DriverIdentity {
    pub fn resolve(&self) -> Option<String> {
        non_empty(self.explicit.as_deref())
            .or_else(|| non_empty(self.session_user_id.as_deref()))
            .or_else(|| self.session_profile.as_deref().and_then(profile_driver_id))
    }

    /// The signed-in user, ignoring the explicit driver override. Used as
    /// `userId` on route status updates.
    pub fn session_user(&self) -> Option<String> {
        non_empty(self.session_user_id.as_deref())
            .or_else(|| self.session_profile.as_deref().and_then(profile_driver_id))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn profile_driver_id(raw: &str) -> Option<String> {
    let profile: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Session profile is not valid JSON");
            return None;
        }
    };

    ["id", "user_id", "userId"]
        .iter()
        .find_map(|key| match profile.get(*key) {
            Some(serde_json::Value::String(s)) => non_empty(Some(s.as_str())),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
}

/// Upload state shown to the operator. Failed uploads are not retried.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploaderStatus {
    #[default]
    NeverSent,
    Sending { since: DateTime<Utc> },
    Sent { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, error: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetryState {
    pub status: UploaderStatus,
    pub last_sent_at: Option<DateTime<Utc>>,
}

// Uploads overlap. Only the most recently started attempt writes the status.
#[derive(Debug, Default)]
struct UploadLedger {
    state: TelemetryState,
    started: u64,
}

#[derive(Clone)]
pub struct TelemetryUploader {
    api: Arc<dyn FleetApi>,
    driver_id: Option<String>,
    ledger: Arc<Mutex<UploadLedger>>,
}

impl TelemetryUploader {
    pub fn new(api: Arc<dyn FleetApi>, identity: &DriverIdentity) -> Self {
        let driver_id = identity.resolve();
        if driver_id.is_none() {
            tracing::warn!("No driver id available, location reports will be anonymous");
        }

        Self {
            api,
            driver_id,
            ledger: Arc::new(Mutex::new(UploadLedger::default())),
        }
    }

    pub fn state(&self) -> TelemetryState {
        self.lock_ledger().state.clone()
    }

    /// Post one sample. Errors are recorded in the status and swallowed.
    pub async fn upload(&self, sample: &LocationSample) {
        let report = LocationReport {
            driver_id: self.driver_id.clone(),
            lat: sample.position.lat,
            lng: sample.position.lng,
            speed: sample.speed,
            heading: sample.heading,
            accuracy: sample.accuracy,
        };

        let attempt = self.begin();

        match self.api.post_location(&report).await {
            Ok(()) => {
                tracing::debug!(lat = report.lat, lng = report.lng, "Location uploaded");
                self.finish(attempt, Ok(()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Location upload failed, sample dropped");
                self.finish(attempt, Err(format!("{:#}", e)));
            }
        }
    }

    fn begin(&self) -> u64 {
        let mut ledger = self.lock_ledger();
        ledger.started += 1;
        ledger.state.status = UploaderStatus::Sending { since: Utc::now() };
        ledger.started
    }

    fn finish(&self, attempt: u64, result: Result<(), String>) {
        let now = Utc::now();
        let mut ledger = self.lock_ledger();

        if result.is_ok() {
            ledger.state.last_sent_at = Some(ledger.state.last_sent_at.map_or(now, |t| t.max(now)));
        }
        if attempt < ledger.started {
            tracing::debug!(attempt, newest = ledger.started, "Ignoring outcome of superseded upload");
            return;
        }

        ledger.state.status = match result {
            Ok(()) => UploaderStatus::Sent { at: now },
            Err(error) => UploaderStatus::Failed { at: now, error },
        };
    }

    /// Fire-and-forget variant of [`upload`](Self::upload).
    pub fn spawn_upload(&self, sample: LocationSample) -> JoinHandle<()> {
        let uploader = self.clone();
        tokio::spawn(async move {
            uploader.upload(&sample).await;
        })
    }

    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, UploadLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}
