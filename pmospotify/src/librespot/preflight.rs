//! Vérifications préalables au lancement : binaire exécutable, instance
//! orpheline, port libre.

use std::path::Path;
use std::time::Duration;

use pmoutils::{
    TransportProtocol, find_processes_using_port, is_local_port_available, terminate_process,
};
use tracing::{debug, error, info, warn};

use super::run::RunToken;
use crate::errors::ManagerError;

/// Vérifie que `path` est un fichier exécutable.
///
/// Si le fichier existe sans bit d'exécution, on tente de l'ajouter avant
/// d'abandonner.
pub fn ensure_executable(path: &Path) -> Result<(), ManagerError> {
    if !path.is_file() {
        error!(path = %path.display(), "go-librespot binary not found");
        return Err(ManagerError::BinaryNotFound(path.to_path_buf()));
    }

    #[cfg(unix)]
    {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|_| ManagerError::BinaryNotFound(path.to_path_buf()))?;
        let mode = metadata.permissions().mode();
        if mode & 0o111 == 0 {
            warn!(path = %path.display(), "go-librespot binary is not executable, fixing permissions");
            let fixed = fs::Permissions::from_mode(mode | 0o755);
            if let Err(e) = fs::set_permissions(path, fixed) {
                error!(path = %path.display(), "Cannot make go-librespot executable: {}", e);
                return Err(ManagerError::NotExecutable(path.to_path_buf()));
            }
        }
    }

    Ok(())
}

/// Termine les instances orphelines de `process_name` qui écoutent sur
/// `port`.
///
/// Un processus étranger sur le port n'est jamais signalé. Nettoyage au
/// mieux : un PID peut être réutilisé entre la lecture de la table des
/// sockets et l'envoi du signal.
///
/// Retourne le nombre de processus signalés. La pause `grace` qui suit est
/// écourtée si le run est annulé.
pub fn cleanup_orphans(port: u16, process_name: &str, grace: Duration, run: &RunToken) -> usize {
    let own_pid = std::process::id();
    let mut signalled = 0;

    for owner in find_processes_using_port(port, TransportProtocol::Tcp) {
        if owner.pid == own_pid {
            continue;
        }
        if run.is_cancelled() {
            break;
        }
        if !owner.name_matches(process_name) {
            warn!(
                port,
                pid = owner.pid,
                process = %owner.process_name,
                owner = %owner.owner,
                "Port is held by another program, leaving it alone"
            );
            continue;
        }
        info!(port, pid = owner.pid, "Terminating orphaned {}", process_name);
        if terminate_process(owner.pid) {
            signalled += 1;
        } else {
            warn!(pid = owner.pid, "Could not signal orphaned process");
        }
    }

    if signalled > 0 {
        run.sleep(grace);
    }
    signalled
}

/// Attend que `port` soit libre sur la boucle locale, en au plus
/// `attempts` essais espacés de `delay`.
///
/// S'interrompt avec [`ManagerError::Aborted`] dès que le run est annulé.
pub fn ensure_port_available(
    port: u16,
    attempts: u32,
    delay: Duration,
    run: &RunToken,
) -> Result<(), ManagerError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if run.is_cancelled() {
            return Err(ManagerError::Aborted);
        }
        if is_local_port_available(port) {
            return Ok(());
        }
        if attempt < attempts {
            debug!(port, attempt, "Port not available, retrying in {:?}", delay);
            if !run.sleep(delay) {
                return Err(ManagerError::Aborted);
            }
        }
    }
    error!(port, attempts, "Port still in use, giving up");
    Err(ManagerError::PortUnavailable(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::librespot::run::RunGate;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let result = ensure_executable(&dir.path().join("go-librespot"));
        assert!(matches!(result, Err(ManagerError::BinaryNotFound(_))));
    }

    #[test]
    fn test_directory_is_not_a_binary() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ensure_executable(dir.path()),
            Err(ManagerError::BinaryNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_fixed() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("go-librespot");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        ensure_executable(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[test]
    fn test_busy_port_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let gate = RunGate::new();
        let result = ensure_port_available(port, 2, Duration::from_millis(10), &gate.begin());
        assert!(matches!(result, Err(ManagerError::PortUnavailable(p)) if p == port));
    }

    #[test]
    fn test_free_port_passes() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let gate = RunGate::new();
        assert!(ensure_port_available(port, 3, Duration::from_secs(5), &gate.begin()).is_ok());
    }

    #[test]
    fn test_port_wait_stops_when_run_is_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let gate = Arc::new(RunGate::new());
        let run = gate.begin();

        let canceller = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });

        let started = Instant::now();
        let result = ensure_port_available(port, 100, Duration::from_secs(1), &run);
        assert!(matches!(result, Err(ManagerError::Aborted)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_foreign_listener_is_not_killed() {
        // Le port est tenu par le processus de test lui-même, qui ne
        // s'appelle pas go-librespot.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let gate = RunGate::new();
        assert_eq!(
            cleanup_orphans(port, "go-librespot", Duration::ZERO, &gate.begin()),
            0
        );
        assert!(listener.local_addr().is_ok());
    }
}
