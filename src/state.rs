use std::sync::Arc;

use crate::engine::{ExternalServices, LifecycleController};
use crate::observability::metrics::Metrics;
use crate::store::RequestStore;

pub struct AppState {
    pub lifecycle: LifecycleController,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(store: Arc<dyn RequestStore>, services: ExternalServices) -> Self {
        let metrics = Metrics::new();

        Self {
            lifecycle: LifecycleController::new(store, services, metrics.clone()),
            metrics,
        }
    }
}
