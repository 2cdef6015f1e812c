//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::worker::Worker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub worker: Arc<Worker>,
}

impl AppState {
    pub fn new(config: Arc<Config>, worker: Arc<Worker>) -> Self {
        Self { config, worker }
    }
}
