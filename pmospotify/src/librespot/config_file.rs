//! Génération du fichier `config.yml` lu par go-librespot.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use super::SupervisorConfig;
use crate::errors::ManagerError;

pub const CONFIG_FILE_NAME: &str = "config.yml";

const DEVICE_TYPE: &str = "speaker";
const VOLUME_STEPS: u32 = 64;
const LOG_LEVEL: &str = "info";

#[derive(Debug, Serialize)]
struct LibrespotConfig<'a> {
    device_name: &'a str,
    device_type: &'a str,
    audio_backend: &'a str,
    audio_device: &'a str,
    bitrate: u32,
    initial_volume: u32,
    volume_steps: u32,
    zeroconf_enabled: bool,
    zeroconf_port: u16,
    credentials: Credentials,
    server: Server,
    log_level: &'a str,
}

#[derive(Debug, Serialize)]
struct Credentials {
    #[serde(rename = "type")]
    kind: &'static str,
    zeroconf: Zeroconf,
}

#[derive(Debug, Serialize)]
struct Zeroconf {
    persist_credentials: bool,
}

#[derive(Debug, Serialize)]
struct Server {
    enabled: bool,
    address: &'static str,
    port: u16,
}

/// Sérialise la configuration go-librespot.
///
/// Découverte zeroconf active avec identifiants persistés ; le serveur
/// HTTP n'écoute que sur la boucle locale.
pub fn render(config: &SupervisorConfig) -> Result<String, ManagerError> {
    let document = LibrespotConfig {
        device_name: &config.device_name,
        device_type: DEVICE_TYPE,
        audio_backend: &config.audio_backend,
        audio_device: &config.audio_device,
        bitrate: config.bitrate,
        initial_volume: config.initial_volume,
        volume_steps: VOLUME_STEPS,
        zeroconf_enabled: true,
        zeroconf_port: 0,
        credentials: Credentials {
            kind: "zeroconf",
            zeroconf: Zeroconf {
                persist_credentials: true,
            },
        },
        server: Server {
            enabled: true,
            address: "127.0.0.1",
            port: config.api_port,
        },
        log_level: LOG_LEVEL,
    };
    Ok(serde_yaml::to_string(&document)?)
}

/// Écrit un `config.yml` neuf dans `config.config_dir` et retourne son chemin.
pub fn write(config: &SupervisorConfig) -> Result<PathBuf, ManagerError> {
    let path = config.config_dir.join(CONFIG_FILE_NAME);
    let yaml = render(config)?;

    fs::create_dir_all(&config.config_dir).map_err(|source| ManagerError::ConfigFile {
        path: config.config_dir.clone(),
        source,
    })?;
    fs::write(&path, yaml).map_err(|source| ManagerError::ConfigFile {
        path: path.clone(),
        source,
    })?;

    debug!(path = %path.display(), "Wrote go-librespot config");
    Ok(path)
}
