//! Shared wiring between the `outpost-server` and `outpost-client` binaries:
//! logging setup and the peer-list parsing the original prototype did on
//! the command line.

use std::net::{SocketAddr, ToSocketAddrs};

use outpost_config::PeerConfig;

/// Initializes `tracing-subscriber` the same way across both binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Parses `id,host,port;id2,host2,port2` peer specs, matching the
/// original prototype's `--peers` CLI argument format.
pub fn parse_peers(spec: &str) -> Vec<PeerConfig> {
    spec.split(';')
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.split(',').collect();
            let [id, host, port] = parts[..] else {
                tracing::warn!(entry, "ignoring malformed peer spec");
                return None;
            };
            let port: u16 = port.parse().ok()?;
            Some(PeerConfig {
                id: id.to_string(),
                host: host.to_string(),
                port,
            })
        })
        .collect()
}

pub fn resolve_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve {host}:{port}"))
}
