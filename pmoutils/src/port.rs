use std::net::{IpAddr, Ipv4Addr, TcpListener};

/// Vérifie qu'un port TCP local peut être lié.
///
/// Le test lie puis relâche aussitôt un listener. Sous Unix, la bibliothèque
/// standard positionne `SO_REUSEADDR` : les sockets en `TIME_WAIT` ne
/// comptent pas comme occupées.
pub fn is_port_available(host: IpAddr, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

/// [`is_port_available`] sur l'interface loopback.
pub fn is_local_port_available(port: u16) -> bool {
    is_port_available(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}
