use std::sync::Arc;

use tracklet_config::Config;
use tracklet_core::{
    AutoUpdateScheduler, Database, RefreshCache, RefreshCoordinator,
};

/// Server application state: Arc'd handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub cache: Arc<RefreshCache>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub scheduler: Arc<AutoUpdateScheduler>,
}
