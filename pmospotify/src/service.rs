//! Service de commandes Spotify Connect
//!
//! [`SpotifyService`] reçoit des commandes JSON `{"command": ..., ...}` et
//! rend un enregistrement JSON plat. Les appels bloquants (HTTP, signaux)
//! sont exécutés sur le pool `spawn_blocking` de tokio : la boucle de
//! commandes n'est jamais bloquée et une erreur interne n'y remonte jamais.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pmocovers::{ColorCache, colors_for_url, fallback_colors};
use serde_json::{Map, Value, json};
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::capabilities::{PlayerControl, ProcessSupervisor};
use crate::client::status::format_artists;
use crate::client::{LibrespotClient, PlayerStatus};
use crate::config::ServiceConfig;
use crate::errors::ConfigError;
use crate::librespot::LibrespotManager;

/// Calcul de la palette d'un artwork (bloquant).
pub type ColorExtractor = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Nombre maximal d'entrées rendues par `get_queue`.
pub const QUEUE_LIMIT: usize = 20;

const COLOR_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Événements après lesquels le statut en cache est périmé.
const INVALIDATING_EVENTS: [&str; 5] = ["metadata", "playing", "paused", "seek", "volume"];

const NOT_CONFIGURED: &str = "Service not configured";
const NOT_RUNNING: &str = "go-librespot not running. It may have crashed - check logs for details.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Backend {
    supervisor: Arc<dyn ProcessSupervisor>,
    player: Arc<dyn PlayerControl>,
    status_max_age: Duration,
}

pub struct SpotifyService {
    backend: Option<Backend>,
    startup_error: Option<String>,
    color_cache: Mutex<ColorCache>,
    color_extractor: ColorExtractor,
}

impl Default for SpotifyService {
    fn default() -> Self {
        Self::new()
    }
}

impl SpotifyService {
    /// Service non configuré ; toute commande rend `Service not configured`.
    pub fn new() -> Self {
        Self {
            backend: None,
            startup_error: None,
            color_cache: Mutex::new(ColorCache::default()),
            color_extractor: Arc::new(|url: &str| colors_for_url(url, COLOR_FETCH_TIMEOUT)),
        }
    }

    pub fn with_color_extractor(mut self, extractor: ColorExtractor) -> Self {
        self.color_extractor = extractor;
        self
    }

    pub fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
        config.validate()
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Message d'échec du dernier démarrage.
    pub fn startup_error(&self) -> Option<&str> {
        self.startup_error.as_deref()
    }

    /// (Re)configure le service.
    ///
    /// L'instance go-librespot précédente est arrêtée avant que la nouvelle
    /// ne soit lancée. Un échec de démarrage n'est pas une erreur de
    /// configuration : il est mémorisé et rendu par chaque commande.
    pub async fn configure(&mut self, config: &ServiceConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.close().await;

        let supervisor_config = config.supervisor_config();
        let binary = supervisor_config.binary_path.clone();
        let port = supervisor_config.api_port;

        let manager = Arc::new(LibrespotManager::new(supervisor_config));
        let client = Arc::new(LibrespotClient::new(&manager.api_url(), config.request_timeout()));
        *lock(&self.color_cache) = ColorCache::new(config.color_cache_size);

        let starter = Arc::clone(&manager);
        let started = task::spawn_blocking(move || starter.start())
            .await
            .unwrap_or_else(|e| {
                error!("go-librespot start task failed: {}", e);
                false
            });

        if started {
            info!(device = %config.device_name, "Spotify Connect device starting");
            if config.event_listener {
                let cache = client.status_cache();
                client.add_event_callback(Arc::new(move |event: &Value| {
                    let kind = event.get("type").and_then(Value::as_str).unwrap_or("");
                    if INVALIDATING_EVENTS.contains(&kind) {
                        cache.invalidate();
                    }
                }));
                client.start_event_listener();
            }
            self.startup_error = None;
        } else {
            let message = format!(
                "Failed to start go-librespot. Check that the binary is installed at {} and port {} is available.",
                binary.display(),
                port
            );
            error!("{}", message);
            self.startup_error = Some(message);
        }

        self.attach(manager, client, config.status_max_age());
        Ok(())
    }

    /// Branche un superviseur et un client déjà construits.
    pub fn attach(
        &mut self,
        supervisor: Arc<dyn ProcessSupervisor>,
        player: Arc<dyn PlayerControl>,
        status_max_age: Duration,
    ) {
        self.backend = Some(Backend {
            supervisor,
            player,
            status_max_age,
        });
    }

    /// Arrête le client puis go-librespot. Sans effet si non configuré.
    pub async fn close(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        let Backend {
            supervisor, player, ..
        } = backend;
        let result = task::spawn_blocking(move || {
            player.close();
            supervisor.stop();
        })
        .await;
        if let Err(e) = result {
            warn!("Shutdown task failed: {}", e);
        }
    }

    /// Exécute une commande.
    pub async fn do_command(&self, command: &Value) -> Value {
        let name = command.get("command").and_then(Value::as_str).unwrap_or("");
        debug!(command = name, "Dispatching command");

        match name {
            "get_status" => self.cmd_get_status().await,
            "get_current_track" => self.cmd_get_current_track().await,
            "play" => self.cmd_play(command).await,
            "pause" => self.control(|p| p.pause()).await,
            "toggle_playback" => self.control(|p| p.play_pause()).await,
            "next" => self.control(|p| p.next_track()).await,
            "previous" => self.control(|p| p.previous_track()).await,
            "seek" => self.cmd_seek(command).await,
            "set_volume" => self.cmd_set_volume(command).await,
            "shuffle" => self.cmd_shuffle(command).await,
            "repeat" => self.cmd_repeat(command).await,
            "add_to_queue" => self.cmd_add_to_queue(command).await,
            "play_uri" => self.cmd_play_uri(command).await,
            "get_queue" => self.cmd_get_queue().await,
            other => json!({ "error": format!("Unknown command: {other}") }),
        }
    }

    fn check_ready(&self) -> Result<(Arc<dyn PlayerControl>, Duration), Value> {
        let Some(backend) = &self.backend else {
            return Err(json!({ "error": NOT_CONFIGURED }));
        };
        if let Some(message) = &self.startup_error {
            return Err(json!({ "error": message }));
        }
        if !backend.supervisor.is_running() {
            return Err(json!({ "error": NOT_RUNNING }));
        }
        Ok((Arc::clone(&backend.player), backend.status_max_age))
    }

    async fn control<F>(&self, operation: F) -> Value
    where
        F: FnOnce(&dyn PlayerControl) -> bool + Send + 'static,
    {
        let player = match self.check_ready() {
            Ok((player, _)) => player,
            Err(e) => return e,
        };
        match run_blocking(player, operation).await {
            Ok(success) => json!({ "success": success }),
            Err(e) => failure(e),
        }
    }

    async fn cmd_get_status(&self) -> Value {
        let player = match self.check_ready() {
            Ok((player, _)) => player,
            Err(e) => return e,
        };
        match run_blocking(player, |p| p.get_status()).await {
            Ok(Some(status)) => status_record(&status),
            Ok(None) => json!({ "error": "Failed to get status from go-librespot" }),
            Err(e) => json!({ "error": e }),
        }
    }

    async fn cmd_get_current_track(&self) -> Value {
        let (player, max_age) = match self.check_ready() {
            Ok(ready) => ready,
            Err(e) => return e,
        };
        let status = match run_blocking(player, move |p| p.get_cached_status(max_age)).await {
            Ok(Some(status)) => status,
            Ok(None) => return empty_track_record(),
            Err(e) => return json!({ "error": e }),
        };

        let colors = if status.track.artwork_url.is_empty() {
            Vec::new()
        } else {
            self.colors_for(&status.track.artwork_url).await
        };
        track_record(&status, colors)
    }

    async fn colors_for(&self, artwork_url: &str) -> Vec<String> {
        let key = artwork_url.to_string();
        let cached = lock(&self.color_cache).get(&key);
        if let Some(colors) = cached {
            return colors;
        }

        let extractor = Arc::clone(&self.color_extractor);
        let url = key.clone();
        let colors = task::spawn_blocking(move || extractor(&url))
            .await
            .unwrap_or_else(|e| {
                warn!("Color extraction task failed: {}", e);
                fallback_colors()
            });

        lock(&self.color_cache).put(key, colors.clone());
        colors
    }

    async fn cmd_play(&self, command: &Value) -> Value {
        match string_arg(command, "uri") {
            Some(uri) => self.control(move |p| p.play_uri(&uri, None)).await,
            None => self.control(|p| p.resume()).await,
        }
    }

    async fn cmd_seek(&self, command: &Value) -> Value {
        if let Err(e) = self.check_ready() {
            return e;
        }
        match int_arg(command, "position_ms", 0) {
            Ok(position) => self.control(move |p| p.seek(position)).await,
            Err(e) => failure(e),
        }
    }

    async fn cmd_set_volume(&self, command: &Value) -> Value {
        if let Err(e) = self.check_ready() {
            return e;
        }
        match int_arg(command, "volume", 50) {
            Ok(volume) => {
                let volume = volume.clamp(0, 100);
                self.control(move |p| p.set_volume(volume)).await
            }
            Err(e) => failure(e),
        }
    }

    async fn cmd_shuffle(&self, command: &Value) -> Value {
        if let Err(e) = self.check_ready() {
            return e;
        }
        let state = match command.get("state") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(state)) => *state,
            Some(_) => return failure("state must be a boolean".to_string()),
        };
        self.control(move |p| p.set_shuffle(state)).await
    }

    async fn cmd_repeat(&self, command: &Value) -> Value {
        if let Err(e) = self.check_ready() {
            return e;
        }
        let state = command
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("off")
            .to_string();
        if !matches!(state.as_str(), "off" | "context" | "track") {
            return failure("Invalid repeat state".to_string());
        }
        self.control(move |p| p.set_repeat(&state)).await
    }

    async fn cmd_add_to_queue(&self, command: &Value) -> Value {
        if let Err(e) = self.check_ready() {
            return e;
        }
        match string_arg(command, "uri") {
            Some(uri) => self.control(move |p| p.add_to_queue(&uri)).await,
            None => failure("uri is required".to_string()),
        }
    }

    async fn cmd_play_uri(&self, command: &Value) -> Value {
        if let Err(e) = self.check_ready() {
            return e;
        }
        let Some(uri) = string_arg(command, "uri") else {
            return failure("uri is required".to_string());
        };
        let skip_to = string_arg(command, "skip_to_uri");
        self.control(move |p| p.play_uri(&uri, skip_to.as_deref()))
            .await
    }

    async fn cmd_get_queue(&self) -> Value {
        let player = match self.check_ready() {
            Ok((player, _)) => player,
            Err(e) => return e,
        };
        match run_blocking(player, |p| p.get_queue()).await {
            Ok(Some(tracks)) => {
                let queue: Vec<Value> = tracks.iter().take(QUEUE_LIMIT).map(queue_entry).collect();
                json!({ "queue": queue })
            }
            Ok(None) => json!({ "queue": [], "error": "Queue not available" }),
            Err(e) => json!({ "queue": [], "error": e }),
        }
    }
}

async fn run_blocking<T, F>(player: Arc<dyn PlayerControl>, operation: F) -> Result<T, String>
where
    F: FnOnce(&dyn PlayerControl) -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(move || operation(player.as_ref()))
        .await
        .map_err(|e| {
            error!("Command worker failed: {}", e);
            format!("Command failed: {e}")
        })
}

fn failure(message: String) -> Value {
    json!({ "success": false, "error": message })
}

/// Chaîne non vide, ou `None`.
fn string_arg(command: &Value, key: &str) -> Option<String> {
    command
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Entier (ou nombre tronqué, ou chaîne numérique) ; `default` si absent.
fn int_arg(command: &Value, key: &str, default: i64) -> Result<i64, String> {
    match command.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("{key} must be a number")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{key} must be a number")),
        Some(_) => Err(format!("{key} must be a number")),
    }
}

fn non_empty(s: &str) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        Value::from(s)
    }
}

fn status_record(status: &PlayerStatus) -> Value {
    let track = &status.track;
    json!({
        "active": status.active,
        "device_id": status.device_id,
        "device_name": status.device_name,
        "username": non_empty(&status.username),
        "device_type": non_empty(&status.device_type),
        "play_origin": non_empty(&status.play_origin),
        "buffering": status.buffering,
        "volume_steps": status.volume_steps,
        "is_playing": track.is_playing,
        "volume": track.volume,
        "shuffle": track.shuffle,
        "repeat_track": track.repeat_track,
        "repeat_context": track.repeat_context,
        "progress_ms": track.progress_ms,
        "duration_ms": track.duration_ms,
        "uri": non_empty(&track.uri),
        "name": non_empty(&track.name),
        "artist": non_empty(&track.artist),
        "album": non_empty(&track.album),
        "artwork_url": non_empty(&track.artwork_url),
        "release_date": non_empty(&track.release_date),
        "track_number": track.track_number,
        "disc_number": track.disc_number,
    })
}

fn track_record(status: &PlayerStatus, colors: Vec<String>) -> Value {
    let track = &status.track;
    json!({
        "is_playing": track.is_playing,
        "buffering": status.buffering,
        "name": non_empty(&track.name),
        "artist": non_empty(&track.artist),
        "album": non_empty(&track.album),
        "artwork_url": non_empty(&track.artwork_url),
        "colors": colors,
        "progress_ms": track.progress_ms,
        "duration_ms": track.duration_ms,
        "uri": non_empty(&track.uri),
        "release_date": non_empty(&track.release_date),
        "track_number": track.track_number,
        "disc_number": track.disc_number,
    })
}

fn empty_track_record() -> Value {
    json!({
        "is_playing": false,
        "buffering": false,
        "name": null,
        "artist": null,
        "album": null,
        "artwork_url": null,
        "colors": [],
        "progress_ms": 0,
        "duration_ms": 0,
        "uri": null,
        "release_date": null,
        "track_number": null,
        "disc_number": null,
    })
}

fn queue_entry(track: &Value) -> Value {
    let artist = match track.get("artist") {
        Some(artist) if !artist.is_null() => artist.clone(),
        _ => match track.get("artist_names") {
            Some(names) => non_empty(&format_artists(names)),
            None => Value::Null,
        },
    };

    let mut entry = Map::new();
    entry.insert("name".to_string(), track.get("name").cloned().unwrap_or(Value::Null));
    entry.insert("artist".to_string(), artist);
    entry.insert("uri".to_string(), track.get("uri").cloned().unwrap_or(Value::Null));
    Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arg() {
        let cmd = json!({"a": 12, "b": 3.9, "c": "42", "d": "x", "e": null, "f": [1]});
        assert_eq!(int_arg(&cmd, "a", 0), Ok(12));
        assert_eq!(int_arg(&cmd, "b", 0), Ok(3));
        assert_eq!(int_arg(&cmd, "c", 0), Ok(42));
        assert!(int_arg(&cmd, "d", 0).is_err());
        assert_eq!(int_arg(&cmd, "e", 7), Ok(7));
        assert_eq!(int_arg(&cmd, "missing", 50), Ok(50));
        assert!(int_arg(&cmd, "f", 0).is_err());
    }

    #[test]
    fn test_string_arg_rejects_empty() {
        let cmd = json!({"uri": "", "other": "spotify:track:1", "n": 3});
        assert_eq!(string_arg(&cmd, "uri"), None);
        assert_eq!(string_arg(&cmd, "n"), None);
        assert_eq!(string_arg(&cmd, "other").as_deref(), Some("spotify:track:1"));
    }

    #[test]
    fn test_queue_entry_formats_artist_names() {
        let entry = queue_entry(&json!({
            "name": "Song",
            "uri": "spotify:track:9",
            "artist_names": ["A", "B"]
        }));
        assert_eq!(entry, json!({"name": "Song", "artist": "A, B", "uri": "spotify:track:9"}));

        let entry = queue_entry(&json!({"artist": "Solo"}));
        assert_eq!(entry, json!({"name": null, "artist": "Solo", "uri": null}));
    }

    #[test]
    fn test_empty_status_record_uses_nulls() {
        let status = PlayerStatus::from_json(&json!({}));
        let record = status_record(&status);
        assert_eq!(record["uri"], Value::Null);
        assert_eq!(record["username"], Value::Null);
        assert_eq!(record["volume"], json!(50));
        assert_eq!(record["device_id"], json!(""));
    }

    #[tokio::test]
    async fn test_unconfigured_service() {
        let service = SpotifyService::new();
        let result = service.do_command(&json!({"command": "pause"})).await;
        assert_eq!(result, json!({"error": "Service not configured"}));
    }

    #[tokio::test]
    async fn test_close_when_never_configured() {
        let mut service = SpotifyService::new();
        service.close().await;
        assert!(!service.is_configured());
    }
}
