// Fleet backend trait - remote persistence and ingestion endpoints
use crate::domain::route::{RouteDetails, RouteStatus, StopId, StopStatus};
use async_trait::async_trait;
use serde::Serialize;

/// Body of a location-ingest call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
}

/// Body of a route-status-update call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatusUpdate {
    pub route_id: String,
    pub status: RouteStatus,
    pub truck_full: bool,
    pub note: Option<String>,
    pub user_id: Option<String>,
}

/// Audit event sent to the event-log sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub event_type: String,
    pub context: serde_json::Value,
}

#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Fetch the authoritative stop list and lifecycle status of a route
    async fn route_details(&self, route_id: &str) -> anyhow::Result<RouteDetails>;

    async fn update_stop_status(&self, stop_id: &StopId, status: StopStatus) -> anyhow::Result<()>;

    async fn update_route_status(&self, update: &RouteStatusUpdate) -> anyhow::Result<()>;

    async fn post_location(&self, report: &LocationReport) -> anyhow::Result<()>;

    async fn log_event(&self, event: &EventLog) -> anyhow::Result<()>;
}
