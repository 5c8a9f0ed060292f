//! Application state.

use std::sync::Arc;

use mediaflow_db::{MediaStore, PgStore, TaskStore};
use mediaflow_models::PipelineObserver;
use mediaflow_queue::{MetricsObserver, RedisTransport, TaskDispatcher, Transport};
use mediaflow_storage::{ObjectStore, S3ObjectStore};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub tasks: Arc<dyn TaskStore>,
    pub media: Arc<dyn MediaStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub transport: Arc<dyn Transport>,
    pub dispatcher: TaskDispatcher,
}

impl AppState {
    /// Assemble state from already-built components.
    pub fn with_components<S>(
        config: ApiConfig,
        store: Arc<S>,
        objects: Arc<dyn ObjectStore>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self
    where
        S: TaskStore + MediaStore + 'static,
    {
        let tasks: Arc<dyn TaskStore> = store.clone();
        let media: Arc<dyn MediaStore> = store;
        let dispatcher = TaskDispatcher::new(tasks.clone(), transport.clone(), observer);

        Self {
            config,
            tasks,
            media,
            objects,
            transport,
            dispatcher,
        }
    }

    /// Connect to PostgreSQL, the object store and Redis from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = PgStore::from_env().await?;
        store.migrate().await?;

        let objects = S3ObjectStore::from_env().await?;
        let transport = RedisTransport::from_env()?;
        transport.init().await?;

        Ok(Self::with_components(
            config,
            Arc::new(store),
            Arc::new(objects),
            Arc::new(transport),
            Arc::new(MetricsObserver::new()),
        ))
    }
}
