//! The `outpost-server` binary: wires the Persistent Store, Replication
//! Peer, and Chat Core together and runs until a shutdown signal arrives.
//!
//! Mirrors the original prototype's `server.py` `__main__` block: same
//! CLI surface (`--host`, `--port`, `--replication-port`, `--data-dir`,
//! `--peers`, `--custom-mode`, `--primary`), same startup order
//! (replication first, then peer connections, then the client listener).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use outpost::{init_tracing, parse_peers, resolve_addr};
use outpost_config::{ConfigLoader, PeerConfig, ServerConfig};
use outpost_replication::{ReplicationConfig, ReplicationPeer};
use outpost_server::{role_changed_notice, ChatServer, SessionTable};
use outpost_store::FileStore;
use outpost_types::{ReplicaId, ReplicaRole};
use outpost_wire::Codec;

#[derive(Parser)]
#[command(name = "outpost-server")]
#[command(about = "Outpost chat server: one replica of a fault-tolerant cluster")]
struct Cli {
    /// Path to an `outpost.toml` config file, layered above defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long = "replication-port")]
    replication_port: Option<u16>,

    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// Comma/semicolon peer spec: `id,host,port;id2,host2,port2`.
    #[arg(long)]
    peers: Option<String>,

    #[arg(long = "custom-mode")]
    custom_mode: bool,

    /// Start already believing itself PRIMARY (a fresh cluster's first
    /// node needs this; every other node starts BACKUP and elects).
    #[arg(long)]
    primary: bool,

    #[arg(long = "replica-id")]
    replica_id: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config: ServerConfig = ConfigLoader::new()
        .with_explicit_file(cli.config.clone())
        .load()
        .context("failed to load server configuration")?;

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(replication_port) = cli.replication_port {
        config.replication_port = replication_port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(peers) = cli.peers {
        config.peers = parse_peers(&peers);
    }
    if cli.custom_mode {
        config.custom_mode = true;
    }
    if let Some(replica_id) = cli.replica_id {
        config.replica_id = replica_id;
    }

    run(config, cli.primary)
}

fn run(config: ServerConfig, start_as_primary: bool) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {:?}", config.data_dir))?;

    let store = Arc::new(FileStore::open(&config.data_dir)?);
    if start_as_primary {
        store.set_role(ReplicaRole::Primary)?;
    }

    let codec = if config.custom_mode { Codec::Binary } else { Codec::Json };

    let replication_bind = resolve_addr(&config.host, config.replication_port)?;
    let peer_addrs = resolve_peers(&config.peers)?;

    let replication_config = ReplicationConfig::new(ReplicaId::new(config.replica_id.clone()), replication_bind)
        .with_peers(peer_addrs);

    // `ReplicationPeer` and `ChatServer` each need a handle to the other:
    // the server broadcasts mutations through the peer, and the peer
    // notifies the server's sessions on a role change. Breaking the cycle
    // per `SPEC_FULL.md`'s dependency-injection guidance: build the
    // `SessionTable` first (the only piece of the server the callback
    // actually needs), spawn the peer with a callback closing over it,
    // then build the `ChatServer` around both.
    let sessions = Arc::new(SessionTable::new());
    let replication = ReplicationPeer::spawn(replication_config, store.clone(), role_changed_notice(sessions.clone()))?;

    let chat_server = Arc::new(ChatServer::with_sessions(store, replication.clone(), codec, sessions));

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())?;

    // `TcpListener::incoming()` blocks on `accept()` with no timeout, so a
    // bare `running` flag can't unblock `ChatServer::serve`'s loop.
    // Binding the listener up front and connecting to it ourselves once
    // the shutdown flag flips is what actually makes `accept()` return so
    // the loop can observe `shutdown()` and exit (specification §6: a
    // termination signal must close both listeners and return).
    let client_bind = resolve_addr(&config.host, config.port)?;
    let listener = std::net::TcpListener::bind(client_bind)
        .with_context(|| format!("failed to bind client listener on {client_bind}"))?;

    {
        let shutdown = shutdown.clone();
        let replication = replication.clone();
        let chat_server = chat_server.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(200));
            }
            replication.shutdown();
            chat_server.shutdown();
            let _ = std::net::TcpStream::connect(client_bind);
        });
    }

    chat_server.serve(listener)?;
    Ok(())
}

fn resolve_peers(peers: &[PeerConfig]) -> Result<Vec<(ReplicaId, std::net::SocketAddr)>> {
    peers
        .iter()
        .map(|p| Ok((ReplicaId::new(p.id.clone()), resolve_addr(&p.host, p.port)?)))
        .collect()
}
