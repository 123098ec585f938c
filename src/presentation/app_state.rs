// Application state for HTTP handlers
use crate::application::active_run::ActiveRun;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub run: Arc<ActiveRun>,
}
