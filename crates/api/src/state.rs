use std::sync::Arc;

use modelhub_core::{ChannelConfig, ModelRegistry, RoomManager, TaskExecutor};
use modelhub_ollama::{OllamaClient, OllamaError};

use crate::config::ServerConfig;
use crate::storage::ModelStore;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Bounded pool running task bodies.
    pub executor: Arc<TaskExecutor>,
    /// Progress channel sizing for new tasks.
    pub channel: ChannelConfig,
    /// Subscription rooms for broadcast delivery.
    pub rooms: RoomManager,
    /// Models currently being operated on.
    pub registry: ModelRegistry,
    /// Model directories on disk.
    pub store: ModelStore,
    /// Downstream model server.
    pub ollama: OllamaClient,
}

impl AppState {
    /// Wire every component from the server configuration.
    pub fn from_config(config: ServerConfig) -> Result<Self, OllamaError> {
        let ollama = OllamaClient::new(&config.ollama_config())?;
        Ok(Self {
            executor: Arc::new(TaskExecutor::new(config.executor_config())),
            channel: config.channel_config(),
            rooms: RoomManager::new(config.room_config()),
            registry: ModelRegistry::new(),
            store: ModelStore::new(config.upload_dir.clone()),
            ollama,
            config: Arc::new(config),
        })
    }
}
