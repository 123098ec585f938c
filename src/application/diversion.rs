// Diversion controller - depot override while the truck is full
use crate::application::fleet_api::{EventLog, FleetApi, RouteStatusUpdate};
use crate::application::stop_tracker::next_target;
use crate::domain::geo::Coordinate;
use crate::domain::route::{RouteStatus, Stop};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinHandle;

pub const VEHICLE_EMPTIED_EVENT: &str = "vehicle_emptied";

#[derive(Debug, Error)]
pub enum DiversionError {
    #[error("vehicle is not diverting")]
    NotDiverting,

    #[error("failed to persist route status: {0}")]
    Persist(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiversionMode {
    /// Normal guidance. `resumed_target` is the stop restored by the last
    /// resume and takes precedence while it is still pending.
    Routing { resumed_target: Option<Stop> },
    /// Guidance points at the depot; `saved_target` is what we were driving
    /// to when the truck filled up.
    Diverting { saved_target: Option<Stop> },
}

impl Default for DiversionMode {
    fn default() -> Self {
        DiversionMode::Routing { resumed_target: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    Depot { position: Coordinate },
    Stop { stop: Stop },
}

impl Destination {
    pub fn position(&self) -> Coordinate {
        match self {
            Destination::Depot { position } => *position,
            Destination::Stop { stop } => stop.position,
        }
    }
}

/// Operator status action: lifecycle status, truck-full flag and a note.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusAction {
    pub status: RouteStatus,
    #[serde(default)]
    pub truck_full: bool,
    #[serde(default)]
    pub note: Option<String>,
}

pub struct DiversionController {
    api: Arc<dyn FleetApi>,
    route_id: String,
    user_id: Option<String>,
    depot: Coordinate,
    mode: Mutex<DiversionMode>,
}

impl DiversionController {
    pub fn new(
        api: Arc<dyn FleetApi>,
        route_id: impl Into<String>,
        user_id: Option<String>,
        depot: Coordinate,
    ) -> Self {
        Self {
            api,
            route_id: route_id.into(),
            user_id,
            depot,
            mode: Mutex::new(DiversionMode::default()),
        }
    }

    pub fn is_diverting(&self) -> bool {
        matches!(*self.lock(), DiversionMode::Diverting { .. })
    }

    /// Where guidance should currently lead.
    pub fn destination(&self, stops: &[Stop]) -> Option<Destination> {
        match &*self.lock() {
            DiversionMode::Diverting { .. } => Some(Destination::Depot {
                position: self.depot,
            }),
            DiversionMode::Routing { resumed_target } => {
                let resumed = resumed_target.as_ref().and_then(|target| {
                    stops.iter().find(|s| s.id == target.id && s.is_pending())
                });
                resumed
                    .or_else(|| next_target(stops))
                    .map(|stop| Destination::Stop { stop: stop.clone() })
            }
        }
    }

    /// Persist a status action. When it raises the truck-full flag while
    /// routing, guidance switches to the depot and `current_target` is kept
    /// for the resume. Returns whether diversion was entered.
    pub async fn apply_status(
        &self,
        action: StatusAction,
        current_target: Option<Stop>,
    ) -> Result<bool, DiversionError> {
        let update = RouteStatusUpdate {
            route_id: self.route_id.clone(),
            status: action.status,
            truck_full: action.truck_full,
            note: action.note.filter(|n| !n.trim().is_empty()),
            user_id: self.user_id.clone(),
        };

        self.api
            .update_route_status(&update)
            .await
            .map_err(|e| DiversionError::Persist(format!("{:#}", e)))?;

        if !action.truck_full {
            return Ok(false);
        }

        let mut mode = self.lock();
        if let DiversionMode::Diverting { .. } = *mode {
            return Ok(false);
        }

        tracing::info!(
            route_id = %self.route_id,
            saved_target = ?current_target.as_ref().map(|s| &s.id),
            "Truck full, diverting to depot"
        );
        *mode = DiversionMode::Diverting {
            saved_target: current_target,
        };
        Ok(true)
    }

    /// Leave diversion. Restores the saved target, or `fallback` when none
    /// was saved, and reports the emptying to the event log in the
    /// background.
    pub fn resume(&self, fallback: Option<Stop>) -> Result<(Option<Stop>, JoinHandle<()>), DiversionError> {
        let restored = {
            let mut mode = self.lock();
            let saved_target = match &*mode {
                DiversionMode::Diverting { saved_target } => saved_target.clone(),
                DiversionMode::Routing { .. } => return Err(DiversionError::NotDiverting),
            };

            let restored = saved_target.or(fallback);
            *mode = DiversionMode::Routing {
                resumed_target: restored.clone(),
            };
            restored
        };

        tracing::info!(
            route_id = %self.route_id,
            target = ?restored.as_ref().map(|s| &s.id),
            "Vehicle emptied, resuming route"
        );

        let event = EventLog {
            event_type: VEHICLE_EMPTIED_EVENT.to_string(),
            context: serde_json::json!({
                "routeId": self.route_id,
                "userId": self.user_id,
                "resumedStopId": restored.as_ref().map(|s| s.id.to_string()),
            }),
        };
        let api = self.api.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = api.log_event(&event).await {
                tracing::warn!(error = %e, "Failed to record vehicle-emptied event");
            }
        });

        Ok((restored, handle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DiversionMode> {
        self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }
}
