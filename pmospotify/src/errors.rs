use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Échecs du cycle de vie du processus go-librespot.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("go-librespot binary not found at {0}")]
    BinaryNotFound(PathBuf),
    #[error("go-librespot binary at {0} is not executable")]
    NotExecutable(PathBuf),
    #[error("Port {0} is not available")]
    PortUnavailable(u16),
    #[error("Failed to write config file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize go-librespot config: {0}")]
    ConfigSerialize(#[from] serde_yaml::Error),
    #[error("Failed to spawn go-librespot: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("go-librespot exited during startup ({0})")]
    ExitedDuringStartup(String),
    #[error("go-librespot did not answer on its control API within {0:?}")]
    ReadinessTimeout(Duration),
    #[error("Startup aborted: stop requested")]
    Aborted,
    #[error("go-librespot is already running (PID {0})")]
    AlreadyRunning(u32),
}

/// Échecs d'un appel à l'API HTTP de go-librespot.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error to go-librespot at {0}")]
    Connection(String),
    #[error("Timeout connecting to go-librespot at {0}")]
    Timeout(String),
    #[error("HTTP error {status} from go-librespot at {url}")]
    Status { url: String, status: u16 },
    #[error("Invalid JSON from go-librespot at {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("Unknown repeat mode: {0}")]
    InvalidRepeatMode(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
