use std::sync::Arc;
use std::time::Duration;

use crate::services::{comfy::RenderService, orchestrator::Orchestrator};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub service: Arc<dyn RenderService>,
    pub render_timeout: Duration,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        service: Arc<dyn RenderService>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            service,
            render_timeout,
        }
    }
}
