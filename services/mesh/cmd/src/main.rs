//! Sacred mesh node binary.
//!
//! `run` starts a node on the configured transports, `relay` runs a relay
//! hub that fans frames out between its clients, and `keygen` prints the
//! identity held in the key store.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mesh_node::{MeshEvent, NodeConfig, SacredMesh};
use mesh_transport::{RelayConfig, RelayHub};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::ServiceConfig;
use logging::SacredLogFormatter;

/// Crates whose log level follows `--log-level`
const LOG_TARGETS: &[&str] = &[
    "sacred_mesh",
    "mesh_crypto",
    "mesh_wire",
    "mesh_session",
    "mesh_transport",
    "mesh_routing",
    "mesh_discovery",
    "mesh_storage",
    "mesh_node",
];

/// Sacred mesh node
#[derive(Parser, Debug)]
#[command(name = "sacred-mesh", version, about = "Encrypted intent messaging over a local mesh")]
struct Cli {
    /// Configuration file path
    #[arg(long, global = true, default_value = "sacred-mesh.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a node and log received messages
    Run(RunArgs),
    /// Run a relay hub
    Relay {
        /// Listen address, e.g. 0.0.0.0:7700
        #[arg(long)]
        listen: Option<String>,
    },
    /// Print the identity fingerprint and key bundle payload
    Keygen {
        /// Node id
        #[arg(long)]
        node_id: Option<String>,

        /// Key store file
        #[arg(long)]
        key_store: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Node id
    #[arg(long)]
    node_id: Option<String>,

    /// Relay hub address, e.g. 127.0.0.1:7700
    #[arg(long)]
    relay: Option<String>,

    /// Key store file; keys live in memory when unset
    #[arg(long)]
    key_store: Option<PathBuf>,

    /// Import a contact from a bundle payload file, `id=path` (repeatable)
    #[arg(long, value_parser = parse_contact)]
    contact: Vec<(String, PathBuf)>,

    /// Queue retry interval, e.g. 5s
    #[arg(long)]
    retry_interval: Option<humantime::Duration>,

    /// Beacon interval, e.g. 10s
    #[arg(long)]
    beacon_interval: Option<humantime::Duration>,

    /// Disable discovery beacons
    #[arg(long)]
    no_discovery: bool,

    /// Queue packets without transmitting them
    #[arg(long)]
    manual: bool,
}

fn parse_contact(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => {
            Ok((id.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected id=path, got {:?}", value)),
    }
}

impl RunArgs {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(ref node_id) = self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(ref addr) = self.relay {
            config.relay.get_or_insert_with(RelayConfig::default).addr = addr.clone();
        }
        if let Some(ref path) = self.key_store {
            config.key_store = Some(path.clone());
        }
        if let Some(interval) = self.retry_interval {
            config.mesh.retry_interval = Duration::from(interval);
        }
        if let Some(interval) = self.beacon_interval {
            config.discovery.beacon_interval = Duration::from(interval);
        }
        if self.no_discovery {
            config.discovery.enabled = false;
        }
        if self.manual {
            config.mesh.auto_mode = false;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut env_filter = EnvFilter::new("info");
    for target in LOG_TARGETS {
        env_filter = env_filter.add_directive(format!("{}={}", target, cli.log_level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(SacredLogFormatter::new("sacred-mesh"))
        .init();

    info!("Starting Sacred Mesh v{}", env!("CARGO_PKG_VERSION"));

    let service_config = ServiceConfig::load_from_file(&cli.config)?;

    match cli.command {
        Command::Run(args) => {
            let mut node_config = service_config.node;
            args.apply(&mut node_config);
            run_node(node_config, &args.contact).await
        }
        Command::Relay { listen } => {
            let listen = listen.unwrap_or(service_config.hub.listen);
            run_relay(&listen).await
        }
        Command::Keygen { node_id, key_store } => {
            let mut node_config = service_config.node;
            if let Some(node_id) = node_id {
                node_config.node_id = node_id;
            }
            if key_store.is_some() {
                node_config.key_store = key_store;
            }
            keygen(node_config).await
        }
    }
}

async fn run_node(config: NodeConfig, contacts: &[(String, PathBuf)]) -> anyhow::Result<()> {
    let node_id = config.node_id.clone();
    let mesh = SacredMesh::new(config);
    let mut inbox = mesh.on_message();
    let mut events = mesh.subscribe_events();

    mesh.initialize()
        .await
        .with_context(|| format!("failed to initialize node {}", node_id))?;

    print_identity(&mesh).await?;

    for (id, path) in contacts {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read bundle file {:?}", path))?;
        let contact = mesh
            .import_contact(id, json.trim())
            .await
            .with_context(|| format!("failed to import contact {}", id))?;
        component_info!("contacts", "Imported contact {} ({})", contact.id, contact.fingerprint);
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal, initiating graceful shutdown");
                break;
            }

            received = inbox.recv() => match received {
                Ok(received) => {
                    component_info!(
                        "inbox",
                        "{} via {}: {} (intent {:.2}){}",
                        received.from,
                        received.transport,
                        received.message.sigils.join(" "),
                        received.message.intent_strength,
                        received
                            .message
                            .note
                            .as_ref()
                            .map(|n| format!(" \"{}\"", n))
                            .unwrap_or_default()
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Inbox lagged, {} messages not shown", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },

            event = events.recv() => match event {
                Ok(MeshEvent::ContactAdded { id, fingerprint }) => {
                    component_info!("contacts", "Contact {} added ({})", id, fingerprint);
                }
                Ok(MeshEvent::PacketDropped { reason }) => {
                    component_warn!("inbox", "Dropped packet: {}", reason);
                }
                Ok(MeshEvent::Discovery(event)) => {
                    component_info!("discovery", "{:?}", event);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event stream lagged by {}", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let status = mesh.get_status().await;
    if let Some(queue) = status.queue {
        if queue.size > 0 {
            warn!("Shutting down with {} queued packets", queue.size);
        }
    }
    mesh.disconnect().await;
    info!("Mesh node shutdown complete");
    Ok(())
}

async fn run_relay(listen: &str) -> anyhow::Result<()> {
    let hub = RelayHub::bind(listen)
        .await
        .with_context(|| format!("failed to bind relay hub on {}", listen))?;
    component_info!("relay", "Relay hub listening on {}", hub.local_addr()?);

    tokio::select! {
        result = hub.run() => result.context("relay hub stopped")?,
        _ = shutdown_signal() => info!("Received shutdown signal, stopping relay hub"),
    }
    Ok(())
}

async fn keygen(mut config: NodeConfig) -> anyhow::Result<()> {
    if config.key_store.is_none() {
        warn!("No key store configured; the identity below will not be kept");
    }
    config.discovery.enabled = false;
    config.relay = None;

    let mesh = SacredMesh::with_transports(config, Vec::new());
    mesh.initialize().await?;
    print_identity(&mesh).await?;
    mesh.disconnect().await;
    Ok(())
}

async fn print_identity(mesh: &SacredMesh) -> anyhow::Result<()> {
    let fingerprint = mesh.fingerprint().await?;
    let payload = mesh.key_bundle_payload().await?.to_json()?;
    println!("node:        {}", mesh.node_id());
    println!("fingerprint: {}", fingerprint);
    println!("bundle:      {}", payload);
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "sacred-mesh",
            "run",
            "--node-id",
            "bob",
            "--relay",
            "10.0.0.1:7700",
            "--retry-interval",
            "2s",
            "--contact",
            "alice=alice.json",
            "--no-discovery",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.contact, vec![("alice".to_string(), PathBuf::from("alice.json"))]);

        let mut config = NodeConfig::default();
        args.apply(&mut config);
        assert_eq!(config.node_id, "bob");
        assert_eq!(config.relay.unwrap().addr, "10.0.0.1:7700");
        assert_eq!(config.mesh.retry_interval, Duration::from_secs(2));
        assert!(!config.discovery.enabled);
        assert!(config.mesh.auto_mode);
    }

    #[test]
    fn test_cli_rejects_bad_contact() {
        assert!(Cli::try_parse_from(["sacred-mesh", "run", "--contact", "alice"]).is_err());
        assert!(Cli::try_parse_from(["sacred-mesh", "run", "--contact", "=x.json"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "sacred-mesh",
            "relay",
            "--listen",
            "127.0.0.1:9000",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Command::Relay { listen: Some(ref l) } if l == "127.0.0.1:9000"));
    }
}
