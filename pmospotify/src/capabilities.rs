//! Interfaces consommées par [`SpotifyService`](crate::service::SpotifyService).
//!
//! Le service ne connaît que ces traits : les implémentations réelles sont
//! [`LibrespotManager`] et [`LibrespotClient`](crate::client::LibrespotClient), les tests peuvent y brancher
//! des doublures.

use std::time::Duration;

use serde_json::Value;

use crate::client::PlayerStatus;
use crate::librespot::LibrespotManager;

/// Cycle de vie du moteur de lecture.
pub trait ProcessSupervisor: Send + Sync {
    fn start(&self) -> bool;
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// Contrôle de la lecture.
///
/// Chaque méthode est bloquante et rapporte un échec par `false`/`None`.
pub trait PlayerControl: Send + Sync {
    fn get_status(&self) -> Option<PlayerStatus>;
    fn get_cached_status(&self, max_age: Duration) -> Option<PlayerStatus>;
    fn resume(&self) -> bool;
    fn pause(&self) -> bool;
    fn play_pause(&self) -> bool;
    fn next_track(&self) -> bool;
    fn previous_track(&self) -> bool;
    fn seek(&self, position_ms: i64) -> bool;
    fn set_volume(&self, volume: i64) -> bool;
    fn set_shuffle(&self, enabled: bool) -> bool;
    fn set_repeat(&self, mode: &str) -> bool;
    fn play_uri(&self, uri: &str, skip_to_uri: Option<&str>) -> bool;
    fn add_to_queue(&self, uri: &str) -> bool;
    fn get_queue(&self) -> Option<Vec<Value>>;
    fn close(&self);
}

impl ProcessSupervisor for LibrespotManager {
    fn start(&self) -> bool {
        LibrespotManager::start(self)
    }

    fn stop(&self) {
        LibrespotManager::stop(self)
    }

    fn is_running(&self) -> bool {
        LibrespotManager::is_running(self)
    }
}

