//! Supervision du processus go-librespot
//!
//! [`LibrespotManager`] lance le binaire go-librespot avec une configuration
//! générée, attend que son API de contrôle réponde, puis le surveille depuis
//! un thread dédié et le relance en cas d'arrêt inattendu, dans la limite de
//! [`RestartPolicy::max_restarts`].

use std::path::PathBuf;

pub mod config_file;
pub mod manager;
pub mod preflight;
pub mod restart;
pub mod run;

pub use manager::LibrespotManager;
pub use restart::{RestartPolicy, RestartState};
pub use run::{RunGate, RunToken};

/// Nom de l'exécutable, utilisé pour la recherche du binaire et pour
/// reconnaître une instance orpheline.
pub const BINARY_NAME: &str = "go-librespot";

/// Paramètres d'une instance supervisée.
///
/// Immuable pour la durée de vie du [`LibrespotManager`] ; une
/// reconfiguration remplace le manager entier.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub device_name: String,
    pub api_port: u16,
    pub audio_backend: String,
    pub audio_device: String,
    pub bitrate: u32,
    pub initial_volume: u32,
    pub binary_path: PathBuf,
    pub config_dir: PathBuf,
    pub policy: RestartPolicy,
}

impl SupervisorConfig {
    /// URL de base de l'API de contrôle (toujours en local).
    pub fn api_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.api_port)
    }
}
