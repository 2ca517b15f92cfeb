use std::sync::Arc;

use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::store::RecordStore;
use crate::sync_service::types::EngineConfig;
use crate::sync_service::SyncEngine;

/// Store handle shared by the engine and the admin server.
pub type SharedStore = Arc<dyn RecordStore>;

pub struct AppState {
    pub engine: SyncEngine<SharedStore>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
}

impl AppState {
    pub fn new(store: SharedStore, config: EngineConfig, shutdown_token: CancellationToken) -> Self {
        Self {
            engine: SyncEngine::new(store, config),
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
        }
    }
}
