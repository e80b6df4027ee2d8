//! Utilitaires système partagés par les crates pmo*.
//!
//! - [`process`] : identification des processus qui occupent un port, envoi
//!   de signaux de terminaison.
//! - [`port`] : vérification qu'un port local peut être lié.
//!
//! # Examples
//!
//! ```no_run
//! use pmoutils::{TransportProtocol, find_processes_using_port, is_local_port_available};
//!
//! if !is_local_port_available(3678) {
//!     for owner in find_processes_using_port(3678, TransportProtocol::Tcp) {
//!         println!("{} (PID {}) holds port 3678", owner.process_name, owner.pid);
//!     }
//! }
//! ```
pub mod port;
pub mod process;

pub use port::{is_local_port_available, is_port_available};
pub use process::{
    ProcessPortInfo, TransportProtocol, find_processes_using_port, kill_process, process_exists,
    terminate_process,
};
