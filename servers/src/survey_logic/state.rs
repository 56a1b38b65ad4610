use lib_survey::ResilientWriteService;
use std::sync::Arc;

/// Shared handler state. Cloned per request; the service itself is shared.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ResilientWriteService>,
}

impl AppState {
    pub fn new(service: Arc<ResilientWriteService>) -> Self {
        Self { service }
    }
}
