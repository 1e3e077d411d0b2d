use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use modelhub_core::{ChannelConfig, ExecutorConfig, RoomConfig};
use modelhub_ollama::OllamaConfig;

/// Errors raised while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Models folder not found: {0}")]
    MissingUploadDir(PathBuf),
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for a single-host deployment next to
/// the model server. Core components receive typed sub-configs built from
/// this struct and never read the environment themselves.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins; `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// Time allowed until the first response byte, in seconds.
    pub request_timeout_secs: u64,
    /// Root of the model store.
    pub upload_dir: PathBuf,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    pub model_server_ip: String,
    pub model_server_port: u16,
    /// Connect timeout and mid-stream idle timeout for the model server.
    pub model_server_timeout_secs: u64,
    /// Directory under which the model server sees the model store.
    pub model_server_mount_dir: String,
    pub max_workers: usize,
    pub task_queue_depth: usize,
    pub progress_channel_capacity: usize,
    pub publish_timeout_ms: u64,
    pub room_grace_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `HOST`                      | `0.0.0.0`                |
    /// | `MODEL_HANDLER_PORT`        | `5000`                   |
    /// | `CORS_ORIGINS`              | `*`                      |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                     |
    /// | `UPLOAD_DIR`                | `/workspace/models/inno` |
    /// | `MAX_UPLOAD_BYTES`          | `8589934592` (8 GiB)     |
    /// | `MODEL_SERVER_IP`           | `127.0.0.1`              |
    /// | `MODEL_SERVER_PORT`         | `11434`                  |
    /// | `MODEL_SERVER_TIMEOUT_SECS` | `60`                     |
    /// | `MODEL_SERVER_MOUNT_DIR`    | `/home`                  |
    /// | `MAX_WORKERS`               | `10`                     |
    /// | `TASK_QUEUE_DEPTH`          | `64`                     |
    /// | `PROGRESS_CHANNEL_CAPACITY` | `256`                    |
    /// | `PUBLISH_TIMEOUT_MS`        | `5000`                   |
    /// | `ROOM_GRACE_SECS`           | `10`                     |
    ///
    /// `UPLOAD_DIR` must already exist.
    pub fn from_env() -> Result<Self, ConfigError> {
        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let upload_dir = PathBuf::from(env_or("UPLOAD_DIR", "/workspace/models/inno"));
        if !upload_dir.is_dir() {
            return Err(ConfigError::MissingUploadDir(upload_dir));
        }

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: parse_env("MODEL_HANDLER_PORT", "5000", "u16")?,
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", "30", "u64")?,
            upload_dir,
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", "8589934592", "usize")?,
            model_server_ip: env_or("MODEL_SERVER_IP", "127.0.0.1"),
            model_server_port: parse_env("MODEL_SERVER_PORT", "11434", "u16")?,
            model_server_timeout_secs: parse_env("MODEL_SERVER_TIMEOUT_SECS", "60", "u64")?,
            model_server_mount_dir: env_or("MODEL_SERVER_MOUNT_DIR", "/home"),
            max_workers: parse_env("MAX_WORKERS", "10", "usize")?,
            task_queue_depth: parse_env("TASK_QUEUE_DEPTH", "64", "usize")?,
            progress_channel_capacity: parse_env("PROGRESS_CHANNEL_CAPACITY", "256", "usize")?,
            publish_timeout_ms: parse_env("PUBLISH_TIMEOUT_MS", "5000", "u64")?,
            room_grace_secs: parse_env("ROOM_GRACE_SECS", "10", "u64")?,
        })
    }

    /// Default settings around an explicit store root.
    pub fn with_upload_dir(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            upload_dir: upload_dir.into(),
            max_upload_bytes: 8 * 1024 * 1024 * 1024,
            model_server_ip: "127.0.0.1".to_string(),
            model_server_port: 11434,
            model_server_timeout_secs: 60,
            model_server_mount_dir: "/home".to_string(),
            max_workers: 10,
            task_queue_depth: 64,
            progress_channel_capacity: 256,
            publish_timeout_ms: 5000,
            room_grace_secs: 10,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_workers: self.max_workers,
            queue_depth: self.task_queue_depth,
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            capacity: self.progress_channel_capacity,
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            grace_period: Duration::from_secs(self.room_grace_secs),
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig::new(
            &self.model_server_ip,
            self.model_server_port,
            Duration::from_secs(self.model_server_timeout_secs),
        )
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(
    name: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = env_or(name, default);
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value,
    })
}
