//! # pmospotify - Point d'accès Spotify Connect
//!
//! Le protocole Spotify Connect est fourni par le binaire externe
//! [go-librespot](https://github.com/devgianlu/go-librespot), traité comme
//! une boîte noire. Cette crate :
//!
//! - supervise le processus ([`librespot::LibrespotManager`]) : vérifications
//!   préalables, génération de `config.yml`, attente de disponibilité,
//!   relances bornées après un crash, arrêt propre ;
//! - pilote son API HTTP locale ([`client::LibrespotClient`]) avec un cache
//!   de statut borné dans le temps et une écoute optionnelle du flux
//!   d'événements WebSocket ;
//! - expose une API de commandes JSON ([`service::SpotifyService`]).
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmospotify::{ServiceConfig, SpotifyService};
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServiceConfig::from_yaml_str("device_name: Kitchen")?;
//!
//! let mut service = SpotifyService::new();
//! service.configure(&config).await?;
//!
//! let track = service.do_command(&json!({"command": "get_current_track"})).await;
//! println!("{track}");
//!
//! service.close().await;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod client;
pub mod config;
pub mod errors;
pub mod librespot;
pub mod service;

pub use capabilities::{PlayerControl, ProcessSupervisor};
pub use client::{LibrespotClient, PlayerStatus, RepeatMode, TrackMetadata};
pub use config::ServiceConfig;
pub use errors::{ClientError, ConfigError, ManagerError};
pub use librespot::{LibrespotManager, RestartPolicy, SupervisorConfig};
pub use service::SpotifyService;
