use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, get_sockets_info};
use sysinfo::{Pid, Signal, System};
use tracing::debug;

const COMM_MAX_LEN: usize = 15;

/// Informations sur un processus utilisant un port réseau.
#[derive(Debug, Clone)]
pub struct ProcessPortInfo {
    pub pid: u32,
    pub process_name: String,
    pub owner: String,
    pub port: u16,
}

impl ProcessPortInfo {
    /// Vrai si le nom de l'exécutable contient `needle`.
    ///
    /// Linux tronque `comm` à 15 octets : un nom de 15 octets qui est un
    /// préfixe de `needle` est aussi accepté.
    pub fn name_matches(&self, needle: &str) -> bool {
        if needle.is_empty() || self.process_name.is_empty() {
            return false;
        }
        self.process_name.contains(needle)
            || (self.process_name.len() == COMM_MAX_LEN && needle.starts_with(&self.process_name))
    }
}

/// Protocole de transport utilisé pour la recherche.
#[derive(Debug, Clone, Copy)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// Liste les processus qui ont une socket locale sur `port`.
///
/// Chaque PID apparaît une fois, dans l'ordre de la table des sockets. Les
/// sockets dont le propriétaire est introuvable (droits, processus déjà
/// terminé) sont ignorées.
pub fn find_processes_using_port(port: u16, protocol: TransportProtocol) -> Vec<ProcessPortInfo> {
    let proto_flag = match protocol {
        TransportProtocol::Tcp => ProtocolFlags::TCP,
        TransportProtocol::Udp => ProtocolFlags::UDP,
    };

    let sockets = match get_sockets_info(
        AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6,
        proto_flag,
    ) {
        Ok(sockets) => sockets,
        Err(e) => {
            debug!(port, "Cannot read socket table: {}", e);
            return Vec::new();
        }
    };

    let mut pids: Vec<u32> = Vec::new();
    for socket in sockets {
        let local_port = match socket.protocol_socket_info {
            ProtocolSocketInfo::Tcp(ref tcp_info) => tcp_info.local_port,
            ProtocolSocketInfo::Udp(ref udp_info) => udp_info.local_port,
        };
        if local_port != port {
            continue;
        }
        for pid in socket.associated_pids {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }

    if pids.is_empty() {
        return Vec::new();
    }

    // Préparer l'inspection des processus.
    let mut system = System::new_all();
    system.refresh_all();

    pids.iter()
        .filter_map(|pid| build_process_info(&system, port, *pid))
        .collect()
}

/// Envoie SIGTERM (ou l'équivalent de la plateforme) à `pid`.
///
/// Retourne false si le processus n'existe pas ou si le signal n'a pas pu
/// être délivré.
pub fn terminate_process(pid: u32) -> bool {
    signal_process(pid, Signal::Term)
}

/// Envoie SIGKILL (ou l'équivalent de la plateforme) à `pid`.
pub fn kill_process(pid: u32) -> bool {
    signal_process(pid, Signal::Kill)
}

/// Vrai tant que `pid` figure dans la table des processus.
pub fn process_exists(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_process(Pid::from_u32(pid))
}

fn signal_process(pid: u32, signal: Signal) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    if !system.refresh_process(pid) {
        return false;
    }
    match system.process(pid) {
        Some(process) => process.kill_with(signal).unwrap_or(false),
        None => false,
    }
}

fn build_process_info(system: &System, port: u16, pid: u32) -> Option<ProcessPortInfo> {
    let process = system.process(Pid::from_u32(pid))?;
    let process_name = process.name().to_string();

    let owner = process
        .user_id()
        .and_then(|uid| {
            users::get_user_by_uid(**uid).map(|user| user.name().to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string());

    Some(ProcessPortInfo {
        pid,
        process_name,
        owner,
        port,
    })
}
