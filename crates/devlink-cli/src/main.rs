//! Devlink CLI - expose a local HTTP server through a relay
//!
//! Wires up exactly one tunnel manager, prints the public URL once the
//! session is active, and keeps a status indicator line current until
//! Ctrl-C tears the tunnel down.

use anyhow::{Context, Result};
use clap::Parser;
use devlink_client::{TunnelManager, TunnelPhase};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Expose a local HTTP server through a devlink relay
#[derive(Parser, Debug)]
#[command(name = "devlink")]
#[command(about = "Expose a local HTTP server through a devlink relay")]
#[command(version)]
#[command(long_about = r#"
Devlink creates a tunnel session on a relay server and forwards the
requests arriving on its public URL to a local HTTP server.

EXAMPLES:
  # Expose localhost:3000 through the default relay
  devlink --port 3000

  # Use a locally running relay
  devlink --port 3000 --relay http://localhost:8787

  # Start from a config file
  devlink --config devlink.yaml

ENVIRONMENT VARIABLES:
  DEVLINK_PORT   Local port to expose
  DEVLINK_RELAY  Relay base URL
"#)]
struct Args {
    /// Local port to expose (1-65535)
    #[arg(long, short = 'p', env = "DEVLINK_PORT")]
    port: Option<u16>,

    /// Relay base URL (defaults to the hosted relay)
    #[arg(long, env = "DEVLINK_RELAY")]
    relay: Option<String>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    tunnel: TunnelSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TunnelSection {
    /// Local port to expose
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    /// Relay base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    relay: Option<String>,
}

/// Resolved settings after merging CLI args over the config file
#[derive(Debug, PartialEq)]
struct CliConfig {
    port: u16,
    relay: Option<String>,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from YAML file
fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Merge CLI args with the config file, giving precedence to CLI args
fn build_cli_config(args: &Args) -> Result<CliConfig> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let port = args
        .port
        .or(file.tunnel.port)
        .context("Local port is required (use --port, DEVLINK_PORT, or a config file)")?;
    if port == 0 {
        anyhow::bail!("Invalid port 0 (expected 1-65535)");
    }

    let relay = args.relay.clone().or(file.tunnel.relay);

    Ok(CliConfig { port, relay })
}

/// ANSI escape for an indicator color name
fn ansi_color(color: &str) -> &'static str {
    match color {
        "green" => "\x1b[32m",
        "yellow" => "\x1b[33m",
        "red" => "\x1b[31m",
        _ => "\x1b[90m",
    }
}

fn print_status(phase: TunnelPhase) {
    let badge = phase.indicator();
    eprintln!(
        "{}{}\x1b[0m tunnel {}",
        ansi_color(badge.color),
        badge.glyph,
        phase.as_str()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level)?;

    let config = build_cli_config(&args).context("Failed to build configuration")?;

    info!("Devlink starting for localhost:{}", config.port);
    if let Some(relay) = &config.relay {
        info!("Relay: {}", relay);
    }

    let manager = TunnelManager::new(Arc::new(print_status));

    let session = manager
        .create_tunnel(config.port, config.relay.as_deref())
        .await
        .context("Failed to create tunnel")?;

    println!("Forwarding {} -> localhost:{}", session.tunnel_url, session.target_port);
    info!("Session id: {}", session.session_id);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    manager.stop_tunnel();
    info!("Tunnel stopped");

    Ok(())
}
