use std::net::SocketAddr;
use std::time::Duration;

use outpost_types::ReplicaId;

/// Static configuration for a [`crate::ReplicationPeer`].
///
/// Timer values match this cluster's defaults (`T_hb` ~1s, `T_elect`
/// ~3s wait before self-promotion, `M_missed` 3 consecutive misses); the
/// original prototype used a 5s socket-level election timeout and a
/// separate 1s post-`ELECTION` wait, which this config keeps as two
/// distinct knobs (`heartbeat_timeout` and `election_wait`) rather than
/// collapsing them, since they govern different things.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub self_id: ReplicaId,
    pub bind_addr: SocketAddr,
    pub peers: Vec<(ReplicaId, SocketAddr)>,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_missed_heartbeats: u32,
    pub election_wait: Duration,
    pub sync_interval: Duration,
    pub transition_grace: Duration,
}

impl ReplicationConfig {
    pub fn new(self_id: ReplicaId, bind_addr: SocketAddr) -> Self {
        Self {
            self_id,
            bind_addr,
            peers: Vec::new(),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(3),
            max_missed_heartbeats: 3,
            election_wait: Duration::from_secs(1),
            sync_interval: Duration::from_secs(60),
            transition_grace: Duration::from_millis(500),
        }
    }

    pub fn with_peers(mut self, peers: Vec<(ReplicaId, SocketAddr)>) -> Self {
        self.peers = peers;
        self
    }
}
