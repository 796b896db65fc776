//! # outpost-replication: the Replication Peer (specification §4.3)
//!
//! Heartbeat-based failure detection, highest-identity leader election,
//! and write-through replication between replicas. See [`crate::core`]
//! for the pure decision logic and [`crate::peer`] for the threads and
//! sockets that drive it.

mod config;
mod core;
mod error;
mod peer;

pub use config::ReplicationConfig;
pub use core::{Event, Output, Target};
pub use error::ReplicationError;
pub use peer::ReplicationPeer;

pub use outpost_wire::{DataUpdate, SyncData};
