//! Boucle de commandes : une commande JSON par ligne sur stdin, un résultat
//! JSON par ligne sur stdout. Les logs vont sur stderr.
//!
//! Le fichier de configuration est le premier argument, ou à défaut la
//! variable `PMOSPOTIFY_CONFIG`.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use pmospotify::{ServiceConfig, SpotifyService};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_CONFIG_FILE: &str = "PMOSPOTIFY_CONFIG";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn config_path() -> Option<PathBuf> {
    env::args_os()
        .nth(1)
        .or_else(|| env::var_os(ENV_CONFIG_FILE))
        .map(PathBuf::from)
}

fn load_config() -> Result<ServiceConfig> {
    let config = match config_path() {
        Some(path) => ServiceConfig::load(&path)
            .with_context(|| format!("Cannot load configuration from {}", path.display()))?,
        None => {
            info!("No configuration file given, using defaults and environment");
            ServiceConfig::from_yaml_str("")?
        }
    };
    SpotifyService::validate_config(&config)?;
    Ok(config)
}

async fn handle_line(service: &SpotifyService, line: &str) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(command) if command.is_object() => service.do_command(&command).await,
        Ok(_) => json!({ "error": "Command must be a JSON object" }),
        Err(e) => json!({ "error": format!("Invalid JSON command: {e}") }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    let mut service = SpotifyService::new();
    service.configure(&config).await?;
    if let Some(message) = service.startup_error() {
        warn!("{}", message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let result = handle_line(&service, line).await;
                stdout.write_all(format!("{result}\n").as_bytes()).await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    service.close().await;
    Ok(())
}
