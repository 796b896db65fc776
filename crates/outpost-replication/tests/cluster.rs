//! Two real [`ReplicationPeer`]s talking over loopback sockets: the full
//! `HELLO` → `ELECTION` → `ELECTED` sequence, plus a write replicating
//! from the winning primary to the other node.
//!
//! Mirrors `kimberlite-vsr`'s integration style of driving the real
//! wiring instead of only the pure core, with tight timer values so the
//! election actually runs to completion inside a test's time budget.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use outpost_replication::{ReplicationConfig, ReplicationPeer};
use outpost_store::{FileStore, PersistentStore};
use outpost_types::{ReplicaId, ReplicaRole, Username};
use outpost_wire::DataUpdate;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn fast_config(self_id: &str, bind_port: u16, peer: Option<(&str, u16)>) -> ReplicationConfig {
    let bind_addr = format!("127.0.0.1:{bind_port}").parse().unwrap();
    let mut config = ReplicationConfig::new(ReplicaId::new(self_id), bind_addr);
    config.heartbeat_interval = Duration::from_millis(50);
    config.heartbeat_timeout = Duration::from_millis(80);
    config.max_missed_heartbeats = 2;
    config.election_wait = Duration::from_millis(80);
    config.transition_grace = Duration::from_millis(20);
    if let Some((peer_id, peer_port)) = peer {
        config = config.with_peers(vec![(
            ReplicaId::new(peer_id),
            format!("127.0.0.1:{peer_port}").parse().unwrap(),
        )]);
    }
    config
}

/// `node-z` starts PRIMARY and heartbeats keep `node-a` from ever
/// starting its own election — the steady-state HELLO+HEARTBEAT path.
#[test]
fn a_live_primarys_heartbeat_holds_off_the_backups_election() {
    let port_a = free_port();
    let port_z = free_port();

    let dir_a = tempfile::tempdir().unwrap();
    let dir_z = tempfile::tempdir().unwrap();
    let store_a: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir_a.path()).unwrap());
    let store_z: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir_z.path()).unwrap());
    store_z.set_role(ReplicaRole::Primary).unwrap();

    let peer_a = ReplicationPeer::spawn(
        fast_config("node-a", port_a, Some(("node-z", port_z))),
        store_a.clone(),
        |_role| {},
    )
    .unwrap();
    let peer_z = ReplicationPeer::spawn(
        fast_config("node-z", port_z, Some(("node-a", port_a))),
        store_z.clone(),
        |_role| {},
    )
    .unwrap();

    // Outlast several heartbeat_timeout windows; a correctly-fed backup
    // must never start an election while heartbeats keep arriving.
    thread::sleep(Duration::from_millis(400));

    assert_eq!(peer_z.role(), ReplicaRole::Primary);
    assert_eq!(peer_a.role(), ReplicaRole::Backup, "backup must not elect while hearing heartbeats");

    peer_a.shutdown();
    peer_z.shutdown();
}

/// Once the primary goes silent (simulating a crash: its threads stop,
/// so no more `HEARTBEAT` ever arrives), the surviving backup runs the
/// `ELECTION` → `ELECTED` sequence against itself and self-promotes.
#[test]
fn a_backup_self_promotes_once_the_primary_goes_silent() {
    let port_a = free_port();
    let port_z = free_port();

    let dir_a = tempfile::tempdir().unwrap();
    let dir_z = tempfile::tempdir().unwrap();
    let store_a: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir_a.path()).unwrap());
    let store_z: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir_z.path()).unwrap());
    store_z.set_role(ReplicaRole::Primary).unwrap();

    let peer_a = ReplicationPeer::spawn(
        fast_config("node-a", port_a, Some(("node-z", port_z))),
        store_a.clone(),
        |_role| {},
    )
    .unwrap();
    let peer_z = ReplicationPeer::spawn(
        fast_config("node-z", port_z, Some(("node-a", port_a))),
        store_z.clone(),
        |_role| {},
    )
    .unwrap();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(peer_a.role(), ReplicaRole::Backup);

    peer_z.shutdown(); // the primary's heartbeat loop stops emitting

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while std::time::Instant::now() < deadline && peer_a.role() != ReplicaRole::Primary {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(peer_a.role(), ReplicaRole::Primary, "surviving backup should self-promote");

    peer_a.shutdown();
}

/// Once a primary is established, a `DataUpdate` it broadcasts shows up
/// in the backup's store without that backup ever being asked directly.
#[test]
fn a_primarys_write_replicates_to_the_backup() {
    let port_a = free_port();
    let port_z = free_port();

    let dir_a = tempfile::tempdir().unwrap();
    let dir_z = tempfile::tempdir().unwrap();
    let store_a: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir_a.path()).unwrap());
    let store_z: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir_z.path()).unwrap());
    store_z.set_role(ReplicaRole::Primary).unwrap();

    let peer_a = ReplicationPeer::spawn(
        fast_config("node-a", port_a, Some(("node-z", port_z))),
        store_a.clone(),
        |_role| {},
    )
    .unwrap();
    let peer_z = ReplicationPeer::spawn(
        fast_config("node-z", port_z, Some(("node-a", port_a))),
        store_z.clone(),
        |_role| {},
    )
    .unwrap();

    assert_eq!(peer_a.role(), ReplicaRole::Backup);
    thread::sleep(Duration::from_millis(150)); // let the HELLO-triggered link settle

    peer_z.broadcast_data_update(DataUpdate::AddUser {
        username: "alice".to_string(),
        password: b"pw".to_vec(),
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    let alice = Username::new("alice").unwrap();
    loop {
        if store_a.user_exists(&alice).unwrap() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "replicated AddUser never reached the backup");
        thread::sleep(Duration::from_millis(20));
    }

    peer_a.shutdown();
    peer_z.shutdown();
}
