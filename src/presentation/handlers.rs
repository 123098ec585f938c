// HTTP request handlers for the operator screen
use crate::application::active_run::{RunError, RunSnapshot};
use crate::application::diversion::{DiversionError, StatusAction};
use crate::application::stop_tracker::{StopError, VisitConfirmation};
use crate::domain::route::StopId;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

/// Operator action failure rendered as a JSON error body.
pub struct ApiError(RunError);

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RunError::Stop(StopError::NotFound(_)) => StatusCode::NOT_FOUND,
            RunError::Stop(StopError::AlreadyVisited(_))
            | RunError::Stop(StopError::ConfirmationMismatch { .. })
            | RunError::Diversion(DiversionError::NotDiverting) => StatusCode::CONFLICT,
            RunError::Stop(StopError::Persist { .. })
            | RunError::Stop(StopError::Refresh(_))
            | RunError::Diversion(DiversionError::Persist(_)) => StatusCode::BAD_GATEWAY,
        };

        tracing::warn!(error = %self.0, status = status.as_u16(), "Operator action failed");
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Current state of the active run
pub async fn get_run(State(state): State<Arc<AppState>>) -> Json<RunSnapshot> {
    Json(state.run.snapshot())
}

/// Server-sent snapshot stream, one event per change
pub async fn run_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let run = state.run.clone();
    let stream = WatchStream::new(run.subscribe())
        .map(move |_revision| Event::default().event("snapshot").json_data(run.snapshot()));

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn start_tracking(State(state): State<Arc<AppState>>) -> Json<RunSnapshot> {
    state.run.start_tracking();
    Json(state.run.snapshot())
}

pub async fn stop_tracking(State(state): State<Arc<AppState>>) -> Json<RunSnapshot> {
    state.run.stop_tracking();
    Json(state.run.snapshot())
}

/// First step of a stop completion: what the operator must confirm
pub async fn prepare_visit(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<VisitConfirmation>, ApiError> {
    let confirmation = state.run.prepare_visit(&StopId(id))?;
    Ok(Json(confirmation))
}

/// Operator answer to a visit prompt, echoing the prompted `seq`
#[derive(Debug, Deserialize)]
pub struct VisitAnswer {
    pub seq: i64,
}

/// Second step: the operator confirmed, persist the completion
pub async fn confirm_visit(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(answer): Json<VisitAnswer>,
) -> Result<Json<RunSnapshot>, ApiError> {
    let confirmation = state.run.answered_visit(&StopId(id), answer.seq)?;
    state.run.confirm_visit(confirmation).await?;
    Ok(Json(state.run.snapshot()))
}

pub async fn undo(State(state): State<Arc<AppState>>) -> Result<Json<RunSnapshot>, ApiError> {
    state.run.undo().await?;
    Ok(Json(state.run.snapshot()))
}

/// Route lifecycle status, truck-full flag and note
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Json(action): Json<StatusAction>,
) -> Result<Json<RunSnapshot>, ApiError> {
    state.run.apply_status(action).await?;
    Ok(Json(state.run.snapshot()))
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Result<Json<RunSnapshot>, ApiError> {
    state.run.resume()?;
    Ok(Json(state.run.snapshot()))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<RunSnapshot>, ApiError> {
    state.run.refresh().await?;
    Ok(Json(state.run.snapshot()))
}
