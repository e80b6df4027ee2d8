use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};
use ureq::Agent;

use super::restart::RestartState;
use super::run::{RunGate, RunToken};
use super::{BINARY_NAME, SupervisorConfig, config_file, preflight};
use crate::errors::ManagerError;

/// Dernières lignes de stderr conservées pour le diagnostic.
const STDERR_TAIL_LINES: usize = 50;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Superviseur du processus go-librespot.
///
/// `start()` et `stop()` sont idempotents et peuvent être appelés depuis
/// n'importe quel thread. Le handle du processus n'est jamais exposé.
///
/// Chaque `start()` ouvre un run ([`RunToken`]) ; un thread de surveillance
/// détaché par un `stop()` trop lent reste lié à son run annulé et ne peut
/// plus lancer de processus.
pub struct LibrespotManager {
    inner: Arc<Inner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: SupervisorConfig,
    /// Au plus un processus ; n'est jamais remplacé tant qu'il vit.
    child: Mutex<Option<Child>>,
    runs: RunGate,
    restarts: RestartState,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    status_agent: Agent,
}

impl LibrespotManager {
    pub fn new(config: SupervisorConfig) -> Self {
        let status_agent: Agent = Agent::config_builder()
            .timeout_global(Some(config.policy.readiness_request_timeout))
            .build()
            .into();

        Self {
            inner: Arc::new(Inner {
                config,
                child: Mutex::new(None),
                runs: RunGate::new(),
                restarts: RestartState::default(),
                stderr_tail: Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES))),
                status_agent,
            }),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// URL de base de l'API de contrôle.
    pub fn api_url(&self) -> String {
        self.inner.config.api_url()
    }

    /// Lance go-librespot et attend qu'il réponde.
    ///
    /// Retourne true sans rien faire si le processus tourne déjà. En cas
    /// d'échec le manager est remis dans l'état arrêté et retourne false.
    pub fn start(&self) -> bool {
        if self.is_running() {
            debug!("go-librespot already running");
            return true;
        }

        // Une surveillance restée d'un lancement précédent (relance en
        // cours ou abandon) est arrêtée avant de repartir de zéro.
        self.shutdown_monitor();

        self.inner.restarts.reset();
        let run = self.inner.runs.begin();

        match self.inner.launch(&run) {
            Ok(pid) => {
                self.spawn_monitor(run, pid);
                true
            }
            Err(ManagerError::Aborted) => {
                info!("go-librespot startup aborted");
                self.inner.runs.cancel_run(&run);
                false
            }
            Err(e) => {
                error!(
                    binary = %self.inner.config.binary_path.display(),
                    port = self.inner.config.api_port,
                    "Failed to start go-librespot: {}",
                    e
                );
                self.inner.runs.cancel_run(&run);
                false
            }
        }
    }

    /// Arrête go-librespot et la surveillance.
    ///
    /// Sans effet si rien n'a été lancé.
    pub fn stop(&self) {
        self.shutdown_monitor();
    }

    /// Vrai si un processus existe et n'est pas terminé.
    pub fn is_running(&self) -> bool {
        match lock(&self.inner.child).as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// PID du processus courant.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.inner.child).as_ref().map(Child::id)
    }

    /// Nombre de relances automatiques depuis le dernier `start()`.
    pub fn restart_count(&self) -> u32 {
        self.inner.restarts.count()
    }

    /// Dernières lignes écrites par go-librespot sur stderr.
    pub fn recent_stderr(&self) -> Vec<String> {
        self.inner.stderr_snapshot()
    }

    fn shutdown_monitor(&self) {
        // L'annulation précède la prise du handle : un lancement concurrent
        // soit a déjà rangé son processus, soit verra le run annulé.
        self.inner.runs.cancel();
        self.inner.terminate_child();
        self.join_monitor();
    }

    fn spawn_monitor(&self, run: RunToken, pid: u32) {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("librespot-monitor".to_string())
            .spawn(move || monitor_loop(inner, run, pid));

        match spawned {
            Ok(handle) => *lock(&self.monitor) = Some(handle),
            Err(e) => warn!("Failed to spawn monitor thread, crashes will not be recovered: {}", e),
        }
    }

    fn join_monitor(&self) {
        let Some(handle) = lock(&self.monitor).take() else {
            return;
        };
        let deadline = Instant::now() + self.inner.config.policy.monitor_join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Monitor thread did not stop in time, detaching it");
                return;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        if handle.join().is_err() {
            error!("Monitor thread panicked");
        }
    }
}

impl Drop for LibrespotManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Séquence complète : préconditions, config, lancement, attente.
    ///
    /// Retourne le PID du processus prêt. En cas d'échec, le processus
    /// lancé par cet appel (et lui seul) est arrêté.
    fn launch(&self, run: &RunToken) -> Result<u32, ManagerError> {
        let config = &self.config;
        let policy = &config.policy;

        preflight::ensure_executable(&config.binary_path)?;
        preflight::cleanup_orphans(config.api_port, BINARY_NAME, policy.orphan_grace, run);
        preflight::ensure_port_available(
            config.api_port,
            policy.port_attempts,
            policy.port_retry_delay,
            run,
        )?;
        if run.is_cancelled() {
            return Err(ManagerError::Aborted);
        }
        config_file::write(config)?;

        let pid = self.spawn_child(run)?;
        if let Err(e) = self.wait_until_ready(run, pid) {
            self.terminate_pid(pid);
            return Err(e);
        }
        Ok(pid)
    }

    fn spawn_child(&self, run: &RunToken) -> Result<u32, ManagerError> {
        let config = &self.config;

        // Le verrou est tenu jusqu'au rangement du nouveau handle : stop()
        // annule avant de le prendre, un run annulé ne lance donc rien.
        let mut slot = lock(&self.child);
        if run.is_cancelled() {
            return Err(ManagerError::Aborted);
        }
        if let Some(existing) = slot.as_mut() {
            if matches!(existing.try_wait(), Ok(None)) {
                let pid = existing.id();
                warn!(pid, "A go-librespot process is still running, not spawning another");
                return Err(ManagerError::AlreadyRunning(pid));
            }
        }

        lock(&self.stderr_tail).clear();

        // stdout ignoré, stderr vidé en continu : l'enfant ne peut pas
        // bloquer sur un pipe plein.
        let mut child = Command::new(&config.binary_path)
            .arg("--config_dir")
            .arg(&config.config_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ManagerError::Spawn)?;

        let pid = child.id();
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr, Arc::clone(&self.stderr_tail));
        }
        info!(pid, port = config.api_port, "Started go-librespot");

        *slot = Some(child);
        Ok(pid)
    }

    /// Interroge `/status` jusqu'à obtenir une réponse 2xx.
    fn wait_until_ready(&self, run: &RunToken, pid: u32) -> Result<(), ManagerError> {
        let policy = &self.config.policy;
        let url = format!("{}/status", self.config.api_url());
        let started = Instant::now();

        loop {
            if run.is_cancelled() {
                return Err(ManagerError::Aborted);
            }
            if let Some(exit) = self.child_exit(pid) {
                let tail = self.stderr_snapshot();
                if !tail.is_empty() {
                    error!("go-librespot stderr:\n{}", tail.join("\n"));
                }
                return Err(ManagerError::ExitedDuringStartup(exit));
            }

            match self.status_agent.get(&url).call() {
                Ok(_) => {
                    info!(pid, elapsed = ?started.elapsed(), "go-librespot API ready");
                    return Ok(());
                }
                Err(e) => trace!("go-librespot not ready yet: {}", e),
            }

            if started.elapsed() >= policy.readiness_timeout {
                return Err(ManagerError::ReadinessTimeout(policy.readiness_timeout));
            }
            if !run.sleep(policy.readiness_poll) {
                return Err(ManagerError::Aborted);
            }
        }
    }

    /// Description de la fin du processus `pid`, ou `None` s'il tourne.
    fn child_exit(&self, pid: u32) -> Option<String> {
        match lock(&self.child).as_mut() {
            None => Some("no process".to_string()),
            Some(child) if child.id() != pid => Some(format!("replaced by PID {}", child.id())),
            Some(child) => match child.try_wait() {
                Ok(None) => None,
                Ok(Some(status)) => Some(status.to_string()),
                Err(e) => Some(format!("wait failed: {e}")),
            },
        }
    }

    /// Retire le handle si le processus `pid` est mort.
    ///
    /// Un autre processus dans l'emplacement n'appartient pas à l'appelant
    /// et n'est pas touché.
    fn reap_dead_child(&self, pid: u32) -> Option<String> {
        let mut slot = lock(&self.child);
        let exit = match slot.as_mut() {
            None => "not running".to_string(),
            Some(child) if child.id() != pid => return None,
            Some(child) => match child.try_wait() {
                Ok(None) => return None,
                Ok(Some(status)) => status.to_string(),
                Err(e) => format!("wait failed: {e}"),
            },
        };
        *slot = None;
        Some(exit)
    }

    /// Arrête le processus courant, quel qu'il soit.
    fn terminate_child(&self) {
        let child = lock(&self.child).take();
        if let Some(child) = child {
            self.shutdown_child(child);
        }
    }

    /// Arrête le processus courant seulement s'il s'agit de `pid`.
    fn terminate_pid(&self, pid: u32) {
        let child = {
            let mut slot = lock(&self.child);
            if slot.as_ref().is_some_and(|child| child.id() == pid) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(child) = child {
            self.shutdown_child(child);
        }
    }

    /// SIGTERM, attente bornée, puis SIGKILL.
    fn shutdown_child(&self, mut child: Child) {
        let pid = child.id();

        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid, %status, "go-librespot already exited");
            return;
        }

        info!(pid, "Stopping go-librespot");
        if !pmoutils::terminate_process(pid) {
            debug!(pid, "SIGTERM could not be delivered");
        }

        let deadline = Instant::now() + self.config.policy.stop_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(pid, %status, "go-librespot stopped");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => break,
                Err(e) => {
                    warn!(pid, "Cannot wait for go-librespot: {}", e);
                    break;
                }
            }
        }

        warn!(pid, "go-librespot did not exit gracefully, killing it");
        if let Err(e) = child.kill() {
            warn!(pid, "Failed to kill go-librespot: {}", e);
        }
        let _ = child.wait();
    }

    fn stderr_snapshot(&self) -> Vec<String> {
        lock(&self.stderr_tail).iter().cloned().collect()
    }
}

fn monitor_loop(inner: Arc<Inner>, run: RunToken, mut pid: u32) {
    let policy = inner.config.policy.clone();
    debug!(generation = run.generation(), "Monitor thread started");

    while run.sleep(policy.check_interval) {
        let Some(exit) = inner.reap_dead_child(pid) else {
            continue;
        };
        if run.is_cancelled() {
            break;
        }

        warn!(pid, exit = %exit, "go-librespot exited unexpectedly");
        let tail = inner.stderr_snapshot();
        if !tail.is_empty() {
            warn!("Last go-librespot output:\n{}", tail.join("\n"));
        }

        let Some(attempt) = inner.restarts.next_attempt(policy.max_restarts) else {
            error!(
                max_restarts = policy.max_restarts,
                "go-librespot crashed too many times, giving up"
            );
            inner.runs.cancel_run(&run);
            break;
        };

        info!(
            attempt,
            max_restarts = policy.max_restarts,
            "Restarting go-librespot in {:?}",
            policy.restart_delay
        );
        if !run.sleep(policy.restart_delay) {
            break;
        }

        match inner.launch(&run) {
            Ok(new_pid) => {
                info!(attempt, pid = new_pid, "go-librespot restarted");
                pid = new_pid;
            }
            Err(ManagerError::Aborted) => break,
            Err(e) => warn!(attempt, "Restart failed: {}", e),
        }
    }

    debug!(generation = run.generation(), "Monitor thread exiting");
}

fn drain_stderr(stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let spawned = thread::Builder::new()
        .name("librespot-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else {
                    break;
                };
                debug!(target: "go-librespot", "{}", line);
                let mut tail = lock(&tail);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to spawn stderr reader: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::librespot::RestartPolicy;
    use std::path::PathBuf;

    fn manager_for(binary: PathBuf) -> LibrespotManager {
        LibrespotManager::new(SupervisorConfig {
            device_name: "test".to_string(),
            api_port: 3678,
            audio_backend: "pipe".to_string(),
            audio_device: "default".to_string(),
            bitrate: 320,
            initial_volume: 50,
            binary_path: binary,
            config_dir: std::env::temp_dir().join("pmospotify-manager-unit"),
            policy: RestartPolicy::default(),
        })
    }

    #[test]
    fn test_stop_without_start() {
        let manager = manager_for(PathBuf::from("/nonexistent/go-librespot"));
        manager.stop();
        manager.stop();
        assert!(!manager.is_running());
        assert_eq!(manager.pid(), None);
    }

    #[test]
    fn test_api_url() {
        let manager = manager_for(PathBuf::from("/nonexistent/go-librespot"));
        assert_eq!(manager.api_url(), "http://127.0.0.1:3678");
    }

    #[test]
    fn test_failed_start_leaves_manager_inert() {
        let manager = manager_for(PathBuf::from("/nonexistent/go-librespot"));
        assert!(!manager.start());
        assert!(!manager.is_running());
        assert_eq!(manager.restart_count(), 0);
        assert!(lock(&manager.monitor).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_child_is_never_replaced() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let binary = dir.path().join("go-librespot");
        fs::write(&binary, "#!/bin/sh\nexec sleep 30\n").unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

        let manager = manager_for(binary);
        let run = manager.inner.runs.begin();
        let pid = manager.inner.spawn_child(&run).unwrap();

        assert!(matches!(
            manager.inner.spawn_child(&run),
            Err(ManagerError::AlreadyRunning(running)) if running == pid
        ));
        assert_eq!(manager.pid(), Some(pid));

        // un run annulé ne lance plus rien, même une fois l'emplacement vide
        manager.stop();
        assert!(matches!(manager.inner.spawn_child(&run), Err(ManagerError::Aborted)));
        assert_eq!(manager.pid(), None);
        assert!(!pmoutils::process_exists(pid));
    }
}
