use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Délais et limites du cycle de vie.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Nombre de relances automatiques avant abandon.
    pub max_restarts: u32,
    /// Pause fixe avant chaque relance.
    pub restart_delay: Duration,
    /// Temps maximal pour que `/status` réponde après le lancement.
    pub readiness_timeout: Duration,
    pub readiness_poll: Duration,
    /// Timeout de chaque sonde `/status` pendant l'attente.
    pub readiness_request_timeout: Duration,
    /// Période de vérification du thread de surveillance.
    pub check_interval: Duration,
    /// Délai entre SIGTERM et SIGKILL.
    pub stop_grace: Duration,
    pub monitor_join_timeout: Duration,
    pub port_attempts: u32,
    pub port_retry_delay: Duration,
    /// Pause après avoir terminé une instance orpheline.
    pub orphan_grace: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            restart_delay: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(10),
            readiness_poll: Duration::from_millis(200),
            readiness_request_timeout: Duration::from_secs(1),
            check_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(5),
            monitor_join_timeout: Duration::from_secs(2),
            port_attempts: 5,
            port_retry_delay: Duration::from_secs(1),
            orphan_grace: Duration::from_millis(500),
        }
    }
}

/// Compteur de relances automatiques.
///
/// Remis à zéro par un `start()` explicite, incrémenté par le thread de
/// surveillance à chaque relance.
#[derive(Debug, Default)]
pub struct RestartState {
    count: AtomicU32,
}

impl RestartState {
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Réserve une relance.
    ///
    /// Retourne le numéro de la tentative (à partir de 1), ou `None` si le
    /// plafond est atteint.
    pub fn next_attempt(&self, max_restarts: u32) -> Option<u32> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_restarts).then_some(n + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_up_to_ceiling() {
        let state = RestartState::default();
        let attempts: Vec<_> = (0..7).map(|_| state.next_attempt(5)).collect();
        assert_eq!(
            attempts,
            vec![Some(1), Some(2), Some(3), Some(4), Some(5), None, None]
        );
        assert_eq!(state.count(), 5);
    }

    #[test]
    fn test_reset_allows_new_attempts() {
        let state = RestartState::default();
        while state.next_attempt(2).is_some() {}
        state.reset();
        assert_eq!(state.next_attempt(2), Some(1));
    }

    #[test]
    fn test_zero_ceiling_never_restarts() {
        let state = RestartState::default();
        assert_eq!(state.next_attempt(0), None);
        assert_eq!(state.count(), 0);
    }

    #[test]
    fn test_default_policy() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.max_restarts, 5);
        assert_eq!(policy.restart_delay, Duration::from_secs(2));
        assert_eq!(policy.readiness_timeout, Duration::from_secs(10));
    }
}
