use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::status::PlayerStatus;

/// Dernier statut obtenu, horodaté.
///
/// Un seul emplacement : chaque lecture réussie écrase la précédente. Les
/// âges sont mesurés sur l'horloge monotone, un statut ne peut donc pas
/// dater du futur.
#[derive(Debug, Default)]
pub struct StatusCache {
    slot: Mutex<Option<(PlayerStatus, Instant)>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<(PlayerStatus, Instant)>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self, status: PlayerStatus) {
        *self.slot() = Some((status, Instant::now()));
    }

    /// Statut en cache s'il a moins de `max_age`.
    pub fn get_fresh(&self, max_age: Duration) -> Option<PlayerStatus> {
        match self.slot().as_ref() {
            Some((status, at)) if at.elapsed() < max_age => Some(status.clone()),
            _ => None,
        }
    }

    pub fn invalidate(&self) {
        *self.slot() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    fn status(name: &str) -> PlayerStatus {
        PlayerStatus::from_json(&json!({"device_name": name}))
    }

    #[test]
    fn test_empty_cache() {
        let cache = StatusCache::new();
        assert!(cache.get_fresh(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_fresh_then_stale() {
        let cache = StatusCache::new();
        cache.store(status("a"));

        assert_eq!(
            cache.get_fresh(Duration::from_secs(60)).map(|s| s.device_name),
            Some("a".to_string())
        );

        thread::sleep(Duration::from_millis(30));
        assert!(cache.get_fresh(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_zero_max_age_is_never_fresh() {
        let cache = StatusCache::new();
        cache.store(status("a"));
        assert!(cache.get_fresh(Duration::ZERO).is_none());
    }

    #[test]
    fn test_last_store_wins() {
        let cache = StatusCache::new();
        cache.store(status("a"));
        cache.store(status("b"));
        assert_eq!(
            cache.get_fresh(Duration::from_secs(60)).unwrap().device_name,
            "b"
        );
    }

    #[test]
    fn test_invalidate() {
        let cache = StatusCache::new();
        cache.store(status("a"));
        cache.invalidate();
        assert!(cache.get_fresh(Duration::from_secs(60)).is_none());
    }
}
