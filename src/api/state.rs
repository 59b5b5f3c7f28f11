use std::sync::Arc;

use crate::executor::Executor;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub executor: Executor,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(executor: Executor, settings: Settings) -> Self {
        Self {
            executor,
            settings: Arc::new(settings),
        }
    }
}
