// Stop tracker - ordered stop list, confirmed completions and single-level undo
use crate::application::fleet_api::FleetApi;
use crate::domain::route::{RouteStatus, Stop, StopId, StopStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StopError {
    #[error("stop {0} not found")]
    NotFound(StopId),

    #[error("stop {0} is already visited")]
    AlreadyVisited(StopId),

    #[error("stop {stop_id} changed since it was prompted (expected seq {expected}, found {found})")]
    ConfirmationMismatch { stop_id: StopId, expected: i64, found: i64 },

    #[error("failed to persist status of stop {stop_id}: {reason}")]
    Persist { stop_id: StopId, reason: String },

    #[error("failed to refresh route: {0}")]
    Refresh(String),
}

/// The pending stop with the lowest sequence number, if any.
pub fn next_target(stops: &[Stop]) -> Option<&Stop> {
    stops
        .iter()
        .filter(|s| s.is_pending())
        .min_by_key(|s| s.seq)
}

/// Fraction of stops visited, 0 for an empty route.
pub fn progress(stops: &[Stop]) -> f64 {
    if stops.is_empty() {
        return 0.0;
    }
    let visited = stops.iter().filter(|s| s.status == StopStatus::Visited).count();
    visited as f64 / stops.len() as f64
}

/// The one undoable completion. A new completion overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoRecord {
    pub stop_id: StopId,
    pub previous_status: StopStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Proof that the operator was asked to confirm a completion. Only
/// [`StopTracker::prepare_visit`] can create one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitConfirmation {
    stop_id: StopId,
    seq: i64,
    name: String,
}

impl VisitConfirmation {
    pub fn seq(&self) -> i64 {
        self.seq
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    stops: Vec<Stop>,
    route_status: RouteStatus,
    undo: Option<UndoRecord>,
}

pub struct StopTracker {
    api: Arc<dyn FleetApi>,
    route_id: String,
    undo_display_window: Duration,
    state: RwLock<TrackerState>,
    // Serialises completion/undo so the undo slot always matches the
    // last persisted mutation.
    ops: tokio::sync::Mutex<()>,
}

impl StopTracker {
    pub fn new(api: Arc<dyn FleetApi>, route_id: impl Into<String>, undo_display_window: Duration) -> Self {
        Self {
            api,
            route_id: route_id.into(),
            undo_display_window,
            state: RwLock::new(TrackerState::default()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn stops(&self) -> Vec<Stop> {
        let mut stops = self.read().stops.clone();
        stops.sort_by_key(|s| s.seq);
        stops
    }

    pub fn route_status(&self) -> RouteStatus {
        self.read().route_status
    }

    pub fn next_target(&self) -> Option<Stop> {
        next_target(&self.read().stops).cloned()
    }

    pub fn progress(&self) -> f64 {
        progress(&self.read().stops)
    }

    pub fn undo_record(&self) -> Option<UndoRecord> {
        self.read().undo.clone()
    }

    /// Whether the undo prompt should still be shown. Only the prompt
    /// expires; [`undo`](Self::undo) stays available until overwritten.
    pub fn undo_prompt_visible(&self, now: DateTime<Utc>) -> bool {
        match &self.read().undo {
            Some(record) => (now - record.recorded_at)
                .to_std()
                .map(|age| age < self.undo_display_window)
                .unwrap_or(true),
            None => false,
        }
    }

    /// Replace the local list with the authoritative one.
    pub async fn refresh(&self) -> Result<(), StopError> {
        let details = self
            .api
            .route_details(&self.route_id)
            .await
            .map_err(|e| StopError::Refresh(format!("{:#}", e)))?;

        tracing::debug!(
            route_id = %self.route_id,
            stops = details.stops.len(),
            route_status = ?details.route_status,
            "Route refreshed"
        );

        let mut state = self.write();
        state.stops = details.stops;
        state.route_status = details.route_status;
        Ok(())
    }

    /// First half of a completion: validate the stop and return what the
    /// operator has to confirm.
    pub fn prepare_visit(&self, stop_id: &StopId) -> Result<VisitConfirmation, StopError> {
        let state = self.read();
        let stop = state
            .stops
            .iter()
            .find(|s| &s.id == stop_id)
            .ok_or_else(|| StopError::NotFound(stop_id.clone()))?;

        if !stop.is_pending() {
            return Err(StopError::AlreadyVisited(stop_id.clone()));
        }

        Ok(VisitConfirmation {
            stop_id: stop.id.clone(),
            seq: stop.seq,
            name: stop.name.clone(),
        })
    }

    /// Rebuild the confirmation for an operator answer. The answer echoes
    /// the `seq` it was shown, which must still match the stop.
    pub fn answered_visit(&self, stop_id: &StopId, seq: i64) -> Result<VisitConfirmation, StopError> {
        let confirmation = self.prepare_visit(stop_id)?;
        if confirmation.seq() != seq {
            return Err(StopError::ConfirmationMismatch {
                stop_id: stop_id.clone(),
                expected: seq,
                found: confirmation.seq(),
            });
        }
        Ok(confirmation)
    }

    /// Second half of a completion: persist, refresh, remember for undo.
    pub async fn mark_visited(&self, confirmation: VisitConfirmation) -> Result<StopId, StopError> {
        let _guard = self.ops.lock().await;
        let stop_id = confirmation.stop_id;

        let previous_status = self
            .read()
            .stops
            .iter()
            .find(|s| s.id == stop_id)
            .map(|s| s.status)
            .ok_or_else(|| StopError::NotFound(stop_id.clone()))?;
        if previous_status == StopStatus::Visited {
            return Err(StopError::AlreadyVisited(stop_id));
        }

        self.persist(&stop_id, StopStatus::Visited).await?;
        tracing::info!(stop_id = %stop_id, seq = confirmation.seq, name = %confirmation.name, "Stop marked visited");

        self.write().undo = Some(UndoRecord {
            stop_id: stop_id.clone(),
            previous_status,
            recorded_at: Utc::now(),
        });

        self.refresh().await?;
        Ok(stop_id)
    }

    /// Revert the last completion. Returns `Ok(None)` when there is nothing
    /// to undo. The record survives a failed persist so it can be retried.
    pub async fn undo(&self) -> Result<Option<StopId>, StopError> {
        let _guard = self.ops.lock().await;

        let record = self.read().undo.clone();
        let Some(record) = record else {
            return Ok(None);
        };

        self.persist(&record.stop_id, record.previous_status).await?;
        tracing::info!(stop_id = %record.stop_id, status = ?record.previous_status, "Stop completion undone");

        self.write().undo = None;
        self.refresh().await?;
        Ok(Some(record.stop_id))
    }

    async fn persist(&self, stop_id: &StopId, status: StopStatus) -> Result<(), StopError> {
        self.api
            .update_stop_status(stop_id, status)
            .await
            .map_err(|e| StopError::Persist {
                stop_id: stop_id.clone(),
                reason: format!("{:#}", e),
            })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
