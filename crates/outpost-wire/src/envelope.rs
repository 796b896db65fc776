//! The server-to-server replication protocol (specification §4.3).
//!
//! Every payload on a replication link is a JSON object of the shape
//! `{cmd, data, timestamp}`. `cmd` selects the payload shape carried in
//! `data`; `timestamp` is the sender's wall-clock time in seconds (kept
//! for parity with the original prototype, which time-stamps every
//! replication message — nothing in this cluster currently relies on
//! cross-replica clock agreement, and adding that is explicitly out of
//! scope here).

use outpost_types::{MessageId, ReplicaId, ReplicaRole};
use serde::{Deserialize, Serialize};

/// A framed replication payload: `{cmd, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEnvelope {
    #[serde(flatten)]
    pub kind: ReplicationKind,
    pub timestamp: f64,
}

impl ReplicationEnvelope {
    pub fn new(kind: ReplicationKind, timestamp: f64) -> Self {
        Self { kind, timestamp }
    }
}

/// The kinds of message multiplexed over a replication link, after the
/// initial `Hello` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum ReplicationKind {
    #[serde(rename = "HELLO")]
    Hello { peer_id: ReplicaId, role: ReplicaRole },

    #[serde(rename = "HEARTBEAT")]
    Heartbeat,

    #[serde(rename = "ELECTION")]
    Election { peer_id: ReplicaId },

    #[serde(rename = "ELECTION_ACK")]
    ElectionAck,

    #[serde(rename = "ELECTED")]
    Elected { peer_id: ReplicaId },

    #[serde(rename = "STATE_CHANGE")]
    StateChange { role: ReplicaRole },

    #[serde(rename = "DATA_UPDATE")]
    DataUpdate(DataUpdate),

    #[serde(rename = "SYNC_REQUEST")]
    SyncRequest,

    #[serde(rename = "SYNC_DATA")]
    SyncData(SyncData),

    #[serde(rename = "SYNC_COMPLETE")]
    SyncComplete,
}

/// A mutation authored by the PRIMARY, applied verbatim by every BACKUP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DataUpdate {
    AddUser {
        username: String,
        password: Vec<u8>,
    },
    DeleteUser {
        username: String,
    },
    AddMessage {
        to: String,
        from: String,
        body: Vec<u8>,
        msg_id: MessageId,
    },
    DeleteMessages {
        username: String,
        msg_ids: Vec<MessageId>,
    },
}

/// Bulk state handed to a freshly connected (or periodically re-synced)
/// peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncData {
    Users(Vec<(String, Vec<u8>)>),
    Messages(Vec<(String, Vec<(MessageId, String, Vec<u8>)>)>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips() {
        let env = ReplicationEnvelope::new(ReplicationKind::Heartbeat, 12.5);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"cmd\":\"HEARTBEAT\""));
        let back: ReplicationEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn election_round_trips() {
        let env = ReplicationEnvelope::new(
            ReplicationKind::Election {
                peer_id: ReplicaId::new("r1"),
            },
            1.0,
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: ReplicationEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn data_update_round_trips() {
        let env = ReplicationEnvelope::new(
            ReplicationKind::DataUpdate(DataUpdate::AddMessage {
                to: "bob".into(),
                from: "alice".into(),
                body: b"hi".to_vec(),
                msg_id: MessageId::from_u128(42),
            }),
            2.0,
        );
        let json = serde_json::to_string(&env).unwrap();
        let back: ReplicationEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }
}
