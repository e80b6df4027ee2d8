//! Jetons d'exécution du superviseur.
//!
//! Chaque `start()` ouvre un nouveau « run » identifié par un numéro de
//! génération. Tout ce qui travaille pour ce run (lancement, attente,
//! thread de surveillance) tient un [`RunToken`] : dès qu'un `stop()` ou un
//! autre `start()` fait avancer la génération, le jeton est annulé pour
//! toujours, même si un `start()` ultérieur relance le superviseur.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Émetteur des jetons ; une seule génération est active à la fois.
#[derive(Debug, Default)]
pub struct RunGate {
    current: Arc<AtomicU64>,
    /// Relâché à l'annulation pour réveiller les pauses du run actif.
    wake: Mutex<Option<Sender<()>>>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annule le run actif et en ouvre un nouveau.
    pub fn begin(&self) -> RunToken {
        let mut wake = lock(&self.wake);
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = bounded::<()>(0);
        *wake = Some(tx);
        RunToken {
            generation,
            current: Arc::clone(&self.current),
            wake: rx,
        }
    }

    /// Annule le run actif, quel qu'il soit.
    pub fn cancel(&self) {
        let mut wake = lock(&self.wake);
        self.current.fetch_add(1, Ordering::SeqCst);
        drop(wake.take());
    }

    /// Annule le run de `token` s'il est encore actif.
    ///
    /// Retourne false si un autre run l'a déjà remplacé.
    pub fn cancel_run(&self, token: &RunToken) -> bool {
        let mut wake = lock(&self.wake);
        let cancelled = self
            .current
            .compare_exchange(
                token.generation,
                token.generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if cancelled {
            drop(wake.take());
        }
        cancelled
    }
}

/// Droit de travailler pour un run donné.
#[derive(Debug, Clone)]
pub struct RunToken {
    generation: u64,
    current: Arc<AtomicU64>,
    wake: Receiver<()>,
}

impl RunToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.generation
    }

    /// Dort `duration`, ou moins si le run est annulé entre-temps.
    ///
    /// Retourne true si le run est toujours actif au réveil.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        match self.wake.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_cancelled(),
            _ => false,
        }
    }
}
