use crate::config::AppConfig;
use crate::store::ManifestStore;

pub struct AppState {
    pub store: ManifestStore,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(store: ManifestStore, config: AppConfig) -> Self {
        Self { store, config }
    }
}
