use std::sync::Arc;

use crate::services::{DailyReporter, LifecycleManager};

/// Handles shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub reporter: Arc<DailyReporter>,
}

impl AppState {
    pub fn new(lifecycle: LifecycleManager, reporter: DailyReporter) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
            reporter: Arc::new(reporter),
        }
    }
}
