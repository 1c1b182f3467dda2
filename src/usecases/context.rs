use crate::{infra::config::AppConfig, usecases::unread_tracker::TrackerSettings};

#[derive(Debug)]
pub struct AppContext {
    pub config: AppConfig,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings::from_config(&self.config)
    }
}
