//! Configuration du service Spotify Connect
//!
//! La configuration est un document YAML. Le document par défaut intégré
//! (`pmospotify.yaml`) est fusionné avec le fichier fourni, les clés sont
//! passées en minuscules, puis les variables `PMOSPOTIFY_CONFIG__<CLE>`
//! surchargent les valeurs individuelles.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::librespot::{BINARY_NAME, RestartPolicy, SupervisorConfig};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmospotify.yaml");

const ENV_PREFIX: &str = "PMOSPOTIFY_CONFIG__";
const ENV_MODULE_ROOT: &str = "VIAM_MODULE_ROOT";
const SYSTEM_BINARY_PATH: &str = "/usr/local/bin/go-librespot";

pub const DEFAULT_API_PORT: u16 = 3678;
const ALLOWED_BITRATES: [u32; 3] = [96, 160, 320];

/// Paramètres du service, tels que lus depuis le YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Nom affiché dans les applications Spotify (obligatoire).
    pub device_name: String,
    pub api_port: u16,
    pub audio_backend: String,
    pub audio_device: String,
    pub bitrate: u32,
    pub initial_volume: u32,
    /// Chemin explicite du binaire ; sinon recherche automatique.
    pub binary_path: Option<PathBuf>,
    /// Répertoire où go-librespot garde sa config et ses identifiants.
    pub config_dir: Option<PathBuf>,
    pub event_listener: bool,
    pub color_cache_size: usize,
    pub status_max_age_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            api_port: DEFAULT_API_PORT,
            audio_backend: "pulseaudio".to_string(),
            audio_device: "default".to_string(),
            bitrate: 320,
            initial_volume: 50,
            binary_path: None,
            config_dir: None,
            event_listener: false,
            color_cache_size: pmocovers::DEFAULT_COLOR_CACHE_SIZE,
            status_max_age_ms: 1000,
            request_timeout_ms: 5000,
        }
    }
}

impl ServiceConfig {
    /// Charge la configuration depuis un fichier YAML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        info!(config_file = %path.display(), "Loaded config file");
        Self::from_yaml_str(&data)
    }

    /// Parse un document YAML en appliquant les défauts et les surcharges
    /// d'environnement du processus.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with_env(yaml, env::vars())
    }

    /// Comme [`from_yaml_str`](Self::from_yaml_str), avec une source de
    /// variables explicite.
    pub fn from_yaml_with_env<I>(yaml: &str, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !yaml.trim().is_empty() {
            let external: Value = serde_yaml::from_str(yaml)?;
            merge_yaml(&mut value, &external);
        }
        let mut value = lower_keys_value(value);
        apply_env_overrides(&mut value, vars);
        Ok(serde_yaml::from_value(value)?)
    }

    /// Vérifie la cohérence des paramètres.
    ///
    /// Toutes les erreurs sont rapportées, pas seulement la première.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.device_name.trim().is_empty() {
            errors.push("device_name is required".to_string());
        }
        if self.api_port == 0 {
            errors.push("api_port must be between 1 and 65535".to_string());
        }
        if !ALLOWED_BITRATES.contains(&self.bitrate) {
            errors.push(format!(
                "bitrate must be one of {:?}, got {}",
                ALLOWED_BITRATES, self.bitrate
            ));
        }
        if self.initial_volume > 100 {
            errors.push(format!(
                "initial_volume must be between 0 and 100, got {}",
                self.initial_volume
            ));
        }
        if self.audio_backend.trim().is_empty() {
            errors.push("audio_backend must not be empty".to_string());
        }
        if self.color_cache_size == 0 {
            errors.push("color_cache_size must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn status_max_age(&self) -> Duration {
        Duration::from_millis(self.status_max_age_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Répertoire de configuration de go-librespot.
    pub fn resolve_config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        match home_dir() {
            Some(home) => home.join(".config").join("go-librespot"),
            None => PathBuf::from(".go-librespot"),
        }
    }

    /// Chemin du binaire go-librespot à lancer.
    pub fn resolve_binary_path(&self) -> PathBuf {
        match &self.binary_path {
            Some(path) => path.clone(),
            None => discover_binary(),
        }
    }

    /// Paramètres du superviseur dérivés de cette configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            device_name: self.device_name.clone(),
            api_port: self.api_port,
            audio_backend: self.audio_backend.clone(),
            audio_device: self.audio_device.clone(),
            bitrate: self.bitrate,
            initial_volume: self.initial_volume.min(100),
            binary_path: self.resolve_binary_path(),
            config_dir: self.resolve_config_dir(),
            policy: RestartPolicy::default(),
        }
    }
}

/// Emplacements candidats du binaire, par ordre de préférence.
pub fn binary_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(root) = env::var(ENV_MODULE_ROOT) {
        if !root.is_empty() {
            candidates.push(Path::new(&root).join(BINARY_NAME));
        }
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(BINARY_NAME));
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join(BINARY_NAME));
            }
        }
    }

    candidates.push(PathBuf::from(SYSTEM_BINARY_PATH));
    candidates
}

/// Premier candidat existant, ou le chemin système par défaut.
pub fn discover_binary() -> PathBuf {
    for candidate in binary_candidates() {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Found go-librespot binary");
            return candidate;
        }
    }
    PathBuf::from(SYSTEM_BINARY_PATH)
}

fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path: Vec<&str> = name.split("__").collect();
        let yaml_value = convert_env_value(&value);
        debug!(key = %key, "Applying environment override");
        set_value_internal(config, &key_path, yaml_value);
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *data = value;
        return;
    };
    if let Value::Mapping(map) = data {
        let key = Value::String(head.to_lowercase());
        if rest.is_empty() {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, rest, value);
        }
    }
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other.clone(),
                };
                match dmap.get_mut(&k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k, v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // scalaires et séquences : remplacement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn test_defaults_from_embedded_yaml() {
        let config = ServiceConfig::from_yaml_with_env("device_name: Kitchen", no_env()).unwrap();
        assert_eq!(config.device_name, "Kitchen");
        assert_eq!(config.api_port, 3678);
        assert_eq!(config.audio_backend, "pulseaudio");
        assert_eq!(config.audio_device, "default");
        assert_eq!(config.bitrate, 320);
        assert_eq!(config.initial_volume, 50);
        assert_eq!(config.binary_path, None);
        assert!(!config.event_listener);
        assert_eq!(config.color_cache_size, 100);
        assert_eq!(config.status_max_age(), Duration::from_secs(1));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_embedded_yaml_matches_default_impl() {
        let parsed = ServiceConfig::from_yaml_with_env("", no_env()).unwrap();
        assert_eq!(parsed, ServiceConfig::default());
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let config =
            ServiceConfig::from_yaml_with_env("Device_Name: Salon\nAPI_PORT: 4000", no_env())
                .unwrap();
        assert_eq!(config.device_name, "Salon");
        assert_eq!(config.api_port, 4000);
    }

    #[test]
    fn test_env_overrides() {
        let env = vec![
            ("PMOSPOTIFY_CONFIG__API_PORT".to_string(), "3700".to_string()),
            ("PMOSPOTIFY_CONFIG__EVENT_LISTENER".to_string(), "true".to_string()),
            ("UNRELATED".to_string(), "1".to_string()),
        ];
        let config = ServiceConfig::from_yaml_with_env("device_name: Office", env).unwrap();
        assert_eq!(config.api_port, 3700);
        assert!(config.event_listener);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let config = ServiceConfig {
            bitrate: 256,
            initial_volume: 150,
            ..ServiceConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors[0].contains("device_name"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_ok() {
        let config = ServiceConfig {
            device_name: "Living Room".to_string(),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = ServiceConfig {
            device_name: "x".to_string(),
            binary_path: Some(PathBuf::from("/opt/bin/go-librespot")),
            config_dir: Some(PathBuf::from("/tmp/librespot")),
            ..ServiceConfig::default()
        };
        let supervisor = config.supervisor_config();
        assert_eq!(supervisor.binary_path, PathBuf::from("/opt/bin/go-librespot"));
        assert_eq!(supervisor.config_dir, PathBuf::from("/tmp/librespot"));
    }

    #[test]
    fn test_system_path_is_last_candidate() {
        let candidates = binary_candidates();
        assert_eq!(candidates.last(), Some(&PathBuf::from(SYSTEM_BINARY_PATH)));
    }
}
