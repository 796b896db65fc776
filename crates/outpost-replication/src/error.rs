use thiserror::Error;

use outpost_store::StoreError;
use outpost_wire::WireError;

/// Errors surfaced by the replication peer.
///
/// None of these are fatal to the replica process: a broken peer link is
/// logged and dropped, and the monitor/heartbeat loops carry on — a
/// partitioned replica keeps serving the clients it still has.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("handshake with {addr} did not start with HELLO")]
    HandshakeExpected { addr: String },
}
