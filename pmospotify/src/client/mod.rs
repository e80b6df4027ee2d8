//! Client de l'API HTTP locale de go-librespot
//!
//! Toutes les méthodes sont bloquantes et ne lèvent jamais d'erreur vers
//! l'appelant : un échec réseau, un timeout, un statut HTTP non 2xx ou un
//! corps JSON invalide sont journalisés puis rendus sous forme de `None` ou
//! de `false`.

pub mod cache;
pub mod events;
pub mod status;

use std::fmt;
use std::io::ErrorKind;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};
use ureq::Agent;

use crate::capabilities::PlayerControl;
use crate::errors::ClientError;
pub use cache::StatusCache;
pub use events::{CallbackId, EventCallback, EventListener};
pub use status::{PlayerStatus, TrackMetadata};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:3678";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STATUS_MAX_AGE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// Mode de répétition tel qu'exposé par l'API de commandes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    Off,
    Context,
    Track,
}

impl FromStr for RepeatMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(RepeatMode::Off),
            "context" => Ok(RepeatMode::Context),
            "track" => Ok(RepeatMode::Track),
            other => Err(ClientError::InvalidRepeatMode(other.to_string())),
        }
    }
}

/// Client de l'API de contrôle d'une instance go-librespot.
pub struct LibrespotClient {
    api_url: String,
    agent: Agent,
    cache: Arc<StatusCache>,
    events: EventListener,
}

impl LibrespotClient {
    pub fn new(api_url: &str, timeout: Duration) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            events: EventListener::new(&api_url),
            api_url,
            agent,
            cache: Arc::new(StatusCache::new()),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Cache partagé du dernier statut (invalidation depuis les événements).
    pub fn status_cache(&self) -> Arc<StatusCache> {
        Arc::clone(&self.cache)
    }

    /// Appel à l'API ; `None` en cas d'échec, `{}` pour un corps vide.
    pub fn request(&self, method: HttpMethod, path: &str, body: Option<&Value>) -> Option<Value> {
        match self.try_request(method, path, body) {
            Ok(value) => Some(value),
            Err(e @ ClientError::Connection(_)) => {
                debug!("{}", e);
                None
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn try_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let url = format!("{}{}", self.api_url, path);
        debug!(%method, url = %url, "go-librespot request");

        let result = match (method, body) {
            (HttpMethod::Get, _) => self.agent.get(&url).call(),
            (HttpMethod::Post, Some(body)) => self
                .agent
                .post(&url)
                .header("Content-Type", "application/json")
                .send(body.to_string()),
            (HttpMethod::Post, None) => self.agent.post(&url).send_empty(),
        };

        let mut response = result.map_err(|e| classify_error(&url, e))?;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| classify_error(&url, e))?;

        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text).map_err(|source| ClientError::Json { url, source })
    }

    fn post(&self, path: &str, body: Option<Value>) -> bool {
        self.request(HttpMethod::Post, path, body.as_ref()).is_some()
    }

    /// Vrai si `/status` répond.
    pub fn is_available(&self) -> bool {
        self.request(HttpMethod::Get, "/status", None).is_some()
    }

    /// Lit `/status` et met à jour le cache.
    pub fn get_status(&self) -> Option<PlayerStatus> {
        let data = self.request(HttpMethod::Get, "/status", None)?;
        let status = PlayerStatus::from_json(&data);
        self.cache.store(status.clone());
        Some(status)
    }

    /// Statut en cache s'il a moins de `max_age`, sinon lecture fraîche.
    pub fn get_cached_status(&self, max_age: Duration) -> Option<PlayerStatus> {
        self.cache
            .get_fresh(max_age)
            .or_else(|| self.get_status())
    }

    pub fn resume(&self) -> bool {
        self.post("/player/resume", None)
    }

    pub fn pause(&self) -> bool {
        self.post("/player/pause", None)
    }

    pub fn play_pause(&self) -> bool {
        self.post("/player/playpause", None)
    }

    pub fn next_track(&self) -> bool {
        self.post("/player/next", None)
    }

    pub fn previous_track(&self) -> bool {
        self.post("/player/prev", None)
    }

    pub fn seek(&self, position_ms: i64) -> bool {
        self.post("/player/seek", Some(json!({ "position": position_ms })))
    }

    /// Volume ramené dans 0..=100.
    pub fn set_volume(&self, volume: i64) -> bool {
        let volume = volume.clamp(0, 100);
        self.post("/player/volume", Some(json!({ "volume": volume })))
    }

    pub fn set_shuffle(&self, enabled: bool) -> bool {
        self.post(
            "/player/shuffle_context",
            Some(json!({ "shuffle_context": enabled })),
        )
    }

    /// `"off"`, `"context"` ou `"track"`. Un mode inconnu n'envoie rien.
    pub fn set_repeat(&self, mode: &str) -> bool {
        match mode.parse::<RepeatMode>() {
            Ok(mode) => self.set_repeat_mode(mode),
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// go-librespot expose deux drapeaux indépendants ; le drapeau à couper
    /// est envoyé en premier.
    pub fn set_repeat_mode(&self, mode: RepeatMode) -> bool {
        let (first, second) = match mode {
            RepeatMode::Off => (("repeat_context", false), ("repeat_track", false)),
            RepeatMode::Context => (("repeat_track", false), ("repeat_context", true)),
            RepeatMode::Track => (("repeat_context", false), ("repeat_track", true)),
        };
        let first_ok = self.set_repeat_flag(first.0, first.1);
        let second_ok = self.set_repeat_flag(second.0, second.1);
        first_ok && second_ok
    }

    fn set_repeat_flag(&self, flag: &str, value: bool) -> bool {
        let mut body = serde_json::Map::new();
        body.insert(flag.to_string(), Value::Bool(value));
        self.post(&format!("/player/{flag}"), Some(Value::Object(body)))
    }

    pub fn play_uri(&self, uri: &str, skip_to_uri: Option<&str>) -> bool {
        let mut body = json!({ "uri": uri });
        if let Some(skip) = skip_to_uri.filter(|s| !s.is_empty()) {
            body["skip_to_uri"] = Value::from(skip);
        }
        self.post("/player/play", Some(body))
    }

    pub fn add_to_queue(&self, uri: &str) -> bool {
        self.post("/player/add_to_queue", Some(json!({ "uri": uri })))
    }

    /// Pistes de `/queue` ; liste vide si le champ `tracks` manque.
    pub fn get_queue(&self) -> Option<Vec<Value>> {
        let data = self.request(HttpMethod::Get, "/queue", None)?;
        Some(
            data.get("tracks")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        )
    }

    pub fn start_event_listener(&self) {
        self.events.start();
    }

    pub fn stop_event_listener(&self) {
        self.events.stop();
    }

    pub fn event_listener(&self) -> &EventListener {
        &self.events
    }

    pub fn add_event_callback(&self, callback: EventCallback) -> CallbackId {
        self.events.add_callback(callback)
    }

    pub fn remove_event_callback(&self, id: CallbackId) -> bool {
        self.events.remove_callback(id)
    }

    pub fn close(&self) {
        self.stop_event_listener();
    }
}

impl Default for LibrespotClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, DEFAULT_TIMEOUT)
    }
}

fn classify_error(url: &str, error: ureq::Error) -> ClientError {
    let url = url.to_string();
    match error {
        ureq::Error::StatusCode(status) => ClientError::Status { url, status },
        ureq::Error::Timeout(_) => ClientError::Timeout(url),
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => ClientError::Connection(url),
        ureq::Error::Io(e) if e.kind() == ErrorKind::TimedOut => ClientError::Timeout(url),
        ureq::Error::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::NotConnected
            ) =>
        {
            ClientError::Connection(url)
        }
        other => ClientError::Transport {
            url,
            reason: other.to_string(),
        },
    }
}

impl PlayerControl for LibrespotClient {
    fn get_status(&self) -> Option<PlayerStatus> {
        LibrespotClient::get_status(self)
    }

    fn get_cached_status(&self, max_age: Duration) -> Option<PlayerStatus> {
        LibrespotClient::get_cached_status(self, max_age)
    }

    fn resume(&self) -> bool {
        LibrespotClient::resume(self)
    }

    fn pause(&self) -> bool {
        LibrespotClient::pause(self)
    }

    fn play_pause(&self) -> bool {
        LibrespotClient::play_pause(self)
    }

    fn next_track(&self) -> bool {
        LibrespotClient::next_track(self)
    }

    fn previous_track(&self) -> bool {
        LibrespotClient::previous_track(self)
    }

    fn seek(&self, position_ms: i64) -> bool {
        LibrespotClient::seek(self, position_ms)
    }

    fn set_volume(&self, volume: i64) -> bool {
        LibrespotClient::set_volume(self, volume)
    }

    fn set_shuffle(&self, enabled: bool) -> bool {
        LibrespotClient::set_shuffle(self, enabled)
    }

    fn set_repeat(&self, mode: &str) -> bool {
        LibrespotClient::set_repeat(self, mode)
    }

    fn play_uri(&self, uri: &str, skip_to_uri: Option<&str>) -> bool {
        LibrespotClient::play_uri(self, uri, skip_to_uri)
    }

    fn add_to_queue(&self, uri: &str) -> bool {
        LibrespotClient::add_to_queue(self, uri)
    }

    fn get_queue(&self) -> Option<Vec<Value>> {
        LibrespotClient::get_queue(self)
    }

    fn close(&self) {
        LibrespotClient::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_mode_parse() {
        assert_eq!("off".parse::<RepeatMode>().unwrap(), RepeatMode::Off);
        assert_eq!("context".parse::<RepeatMode>().unwrap(), RepeatMode::Context);
        assert_eq!("track".parse::<RepeatMode>().unwrap(), RepeatMode::Track);
        assert!("all".parse::<RepeatMode>().is_err());
        assert!("".parse::<RepeatMode>().is_err());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = LibrespotClient::new("http://127.0.0.1:3678/", DEFAULT_TIMEOUT);
        assert_eq!(client.api_url(), "http://127.0.0.1:3678");
        assert_eq!(client.event_listener().ws_url(), "ws://127.0.0.1:3678/events");
    }

    #[test]
    fn test_unreachable_api() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = LibrespotClient::new(
            &format!("http://127.0.0.1:{port}"),
            Duration::from_millis(500),
        );
        assert!(!client.is_available());
        assert!(client.get_status().is_none());
        assert!(!client.pause());
    }
}
