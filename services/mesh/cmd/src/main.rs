//! Hypha mesh node binary.
//!
//! Runs one node over a UDP link, optionally exposing the KISS serial
//! protocol on stdin/stdout so a desktop client can push and receive files.

mod config;
mod crypto;
mod logging;
mod udp;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use mesh_node::{
    Clock, EventEnvelope, EventNotifier, Link, Node, NodeEvent, SerialBridge, SerialOutput,
    SharedNode, SystemClock,
};
use mesh_routing::InterfaceMode;
use mesh_storage::{identity_store, StorageMode};
use mesh_transfer::FileMetadata;
use mesh_wire::Address;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::HyphaConfig;
use crypto::DalekCrypto;
use logging::HyphaLogFormatter;
use udp::UdpLink;

/// LoRa-style mesh node over UDP
#[derive(Parser, Debug)]
#[command(name = "hypha", version, about = "Hypha mesh node")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "hypha.yaml")]
    config: PathBuf,

    /// Node name
    #[arg(long)]
    name: Option<String>,

    /// UDP listen address, e.g. 0.0.0.0:4242
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Neighbour address (repeatable), e.g. --peer 10.0.0.2:4242
    #[arg(long)]
    peer: Vec<SocketAddr>,

    /// Identity file; created on first start
    #[arg(long)]
    identity: Option<PathBuf>,

    /// Interface mode: full, gateway, boundary, access_point, roaming
    #[arg(long)]
    mode: Option<InterfaceMode>,

    /// Maintenance tick interval
    #[arg(long, default_value = "1s")]
    tick_interval: humantime::Duration,

    /// Interval between stats reports
    #[arg(long, default_value = "60s")]
    stats_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Speak the KISS file protocol on stdin/stdout
    #[arg(long)]
    serial: bool,

    /// Send this file once after startup (requires --to)
    #[arg(long, requires = "to")]
    send_file: Option<PathBuf>,

    /// Destination address for --send-file
    #[arg(long)]
    to: Option<Address>,

    /// Delay before --send-file, giving announces time to arrive
    #[arg(long, default_value = "10s")]
    send_delay: humantime::Duration,
}

#[derive(Serialize)]
struct StatsReport<'a> {
    name: &'a str,
    address: String,
    node: mesh_node::NodeStats,
    routing: mesh_routing::RouterStats,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("hypha={}", args.log_level).parse()?)
        .add_directive(format!("mesh_node={}", args.log_level).parse()?)
        .add_directive(format!("mesh_routing={}", args.log_level).parse()?)
        .add_directive(format!("mesh_transfer={}", args.log_level).parse()?)
        .add_directive(format!("mesh_storage={}", args.log_level).parse()?)
        .add_directive(format!("mesh_wire={}", args.log_level).parse()?);

    // stdout carries serial frames, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true)
        .event_format(HyphaLogFormatter::new("hypha"))
        .init();

    info!("Starting hypha v{}", env!("CARGO_PKG_VERSION"));

    let mut config = HyphaConfig::load_from_file(&args.config)?;
    apply_args(&mut config, &args);
    let interface = config.udp_interface();
    config.node.validate()?;

    let store = identity_store(match &config.identity_path {
        Some(path) => StorageMode::File { path: path.clone() },
        None => {
            warn!("No identity path configured, address will change on restart");
            StorageMode::InMemory
        }
    });
    let blob = store
        .load_or_create()
        .await
        .context("failed to load node identity")?;
    let crypto = Arc::new(DalekCrypto::from_blob(&blob));

    let udp = UdpLink::bind(interface.id, config.udp.listen, config.udp.peers.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.udp.listen))?;
    let links: Vec<Arc<dyn Link>> = vec![Arc::new(udp)];

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (notifier, mut events) = EventNotifier::channel();
    let node = Node::new(config.node.clone(), crypto, notifier, clock.now())?;
    let shared = SharedNode::new(node);
    component_info!(
        "node",
        address = %shared.address(),
        interface = %interface.name,
        mode = %interface.mode,
        "Node ready"
    );

    let mut tasks = Vec::new();
    for link in &links {
        tasks.push(shared.spawn_receiver(link.clone(), links.clone(), clock.clone()));
    }
    tasks.push(shared.spawn_maintenance(args.tick_interval.into(), links.clone(), clock.clone()));

    let out = shared.announce(clock.as_ref()).await?;
    mesh_node::transmit(&links, out).await;

    if let (Some(path), Some(to)) = (args.send_file.clone(), args.to) {
        let shared = shared.clone();
        let clock = clock.clone();
        let delay: std::time::Duration = args.send_delay.into();
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = send_file(&shared, clock.as_ref(), &path, to).await {
                warn!("Sending {:?} failed: {:#}", path, e);
            }
        }));
    }

    let mut stdin_rx = if args.serial {
        Some(spawn_stdin_reader())
    } else {
        None
    };
    let mut bridge = SerialBridge::new();
    let mut stdout = tokio::io::stdout();

    let mut stats_interval = tokio::time::interval(args.stats_interval.into());
    stats_interval.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            Some(envelope) = events.recv() => {
                log_event(&envelope);
                if args.serial {
                    for frame in SerialBridge::file_frames(&envelope.event) {
                        stdout.write_all(&frame).await?;
                    }
                    stdout.flush().await?;
                }
            }

            chunk = recv_stdin(&mut stdin_rx) => {
                let Some(chunk) = chunk else {
                    component_info!("serial", "Serial input closed");
                    if let Some(id) = shared.with(|node| bridge.abort(node)).await {
                        component_warn!("serial", transfer = %id, "Aborted unfinished upload");
                    }
                    stdin_rx = None;
                    continue;
                };
                let now = clock.now();
                let output = shared.with(|node| bridge.receive(node, &chunk, now)).await;
                write_serial_output(&mut stdout, output).await?;
            }

            _ = stats_interval.tick() => {
                let (node_stats, router_stats) = shared.stats().await;
                let report = StatsReport {
                    name: &config.node.name,
                    address: shared.address().to_string(),
                    node: node_stats,
                    routing: router_stats,
                };
                match serde_json::to_string(&report) {
                    Ok(json) => component_info!("stats", "{}", json),
                    Err(e) => warn!("Failed to serialize stats: {}", e),
                }
            }
        }
    }

    for task in tasks {
        task.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

fn apply_args(config: &mut HyphaConfig, args: &Args) {
    if let Some(name) = &args.name {
        config.node.name = name.clone();
    }
    if let Some(listen) = args.listen {
        config.udp.listen = listen;
    }
    if !args.peer.is_empty() {
        config.udp.peers = args.peer.clone();
    }
    if let Some(path) = &args.identity {
        config.identity_path = Some(path.clone());
    }
    if let Some(mode) = args.mode {
        config.udp.mode = mode;
    }
}

/// Write protocol replies to the client; text the client sent is only logged
async fn write_serial_output<W>(out: &mut W, output: SerialOutput) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for reply in &output.replies {
        out.write_all(reply).await?;
    }
    out.flush().await?;
    for line in &output.lines {
        component_debug!("serial", %line, "Client text");
    }
    for e in output.errors {
        component_warn!("serial", error = %e, "Serial protocol error");
    }
    Ok(())
}

async fn send_file(
    shared: &SharedNode,
    clock: &dyn Clock,
    path: &std::path::Path,
    to: Address,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {:?}", path))?;
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        bail!("{:?} has no usable file name", path);
    };
    let metadata = FileMetadata::new(filename, data.len() as u64);
    let id = shared
        .send_file(to, metadata, Bytes::from(data), clock)
        .await?;
    component_info!("transfer", transfer = %id, destination = %to, "File queued");
    Ok(())
}

fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn recv_stdin(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT, shutting down");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received interrupt, shutting down");
}

fn log_event(envelope: &EventEnvelope) {
    let seq = envelope.sequence;
    match &envelope.event {
        NodeEvent::DataReceived {
            source,
            payload,
            hop_count,
            encrypted,
        } => {
            let from = source.map(|a| a.short()).unwrap_or_else(|| "unknown".into());
            component_info!(
                "data",
                seq,
                from = %from,
                len = payload.len(),
                hops = hop_count,
                encrypted,
                "Data received"
            );
        }
        NodeEvent::PeerDiscovered {
            address,
            hop_count,
            interface,
            ..
        } => {
            component_info!("peers", seq, peer = %address, hops = hop_count, interface = %interface, "Peer discovered");
        }
        NodeEvent::RouteChanged {
            destination,
            next_hop,
            hop_count,
        } => {
            component_debug!("routing", seq, destination = %destination.short(), via = %next_hop, hops = hop_count, "Route changed");
        }
        NodeEvent::RouteExpired { destination } => {
            component_debug!("routing", seq, destination = %destination.short(), "Route expired");
        }
        NodeEvent::TransferProgress {
            transfer_id,
            direction,
            done,
            total,
        } => {
            debug!(seq, transfer = %transfer_id, ?direction, done, ?total, "Transfer progress");
        }
        NodeEvent::FileReceived {
            transfer_id,
            source,
            metadata,
            data,
        } => {
            let name = metadata
                .as_ref()
                .map(|m| m.filename.clone())
                .unwrap_or_else(|| "<unnamed>".into());
            let from = source.map(|a| a.short()).unwrap_or_else(|| "unknown".into());
            component_info!("transfer", seq, transfer = %transfer_id, from = %from, file = %name, len = data.len(), "File received");
        }
        NodeEvent::TransferSent {
            transfer_id,
            destination,
        } => {
            component_info!("transfer", seq, transfer = %transfer_id, destination = %destination.short(), "Transfer delivered");
        }
        NodeEvent::TransferFailed {
            transfer_id,
            direction,
            error,
        } => {
            component_warn!("transfer", seq, transfer = %transfer_id, ?direction, error = %error, "Transfer failed");
        }
        NodeEvent::TransferCancelled { transfer_id } => {
            component_info!("transfer", seq, transfer = %transfer_id, "Transfer cancelled");
        }
        NodeEvent::DeliveryFailed {
            destination,
            reason,
        } => {
            component_warn!("routing", seq, destination = %destination.short(), reason = %reason, "Delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_node::NodeError;

    #[tokio::test]
    async fn test_client_text_is_not_echoed() {
        let output = SerialOutput {
            replies: vec![Bytes::from_static(b"\xC0\x06\x00\x01\xC0")],
            lines: vec!["hello".to_string(), "world".to_string()],
            errors: vec![NodeError::Protocol("FILE_END without FILE_START")],
        };
        let mut written = Vec::new();
        write_serial_output(&mut written, output).await.unwrap();
        assert_eq!(written, b"\xC0\x06\x00\x01\xC0");
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "hypha",
            "--name",
            "summit",
            "--peer",
            "127.0.0.1:7001",
            "--mode",
            "gateway",
        ]);
        let mut config = HyphaConfig::default();
        apply_args(&mut config, &args);
        assert_eq!(config.node.name, "summit");
        assert_eq!(config.udp.peers.len(), 1);
        assert_eq!(config.udp.mode, InterfaceMode::Gateway);
        assert_eq!(config.udp.listen.port(), 4242);
    }
}
