//! End-to-end scenarios driven over real `TcpStream`s against an
//! in-process server, exercising the same six cases the original
//! prototype's manual test plan walked through by hand: offline delivery,
//! online fan-out, persistence across a restart, a demoted replica
//! retaining its data, a BACKUP refusing client traffic, and codec
//! equivalence.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use outpost_replication::{ReplicationConfig, ReplicationPeer};
use outpost_server::{role_changed_notice, ChatServer, SessionTable};
use outpost_store::{FileStore, PersistentStore};
use outpost_types::{ReplicaId, ReplicaRole};
use outpost_wire::{decode_frame, encode_frame, Codec, Message};

const MAX_FRAME_LEN: usize = 1 << 20;

struct TestServer {
    addr: SocketAddr,
    data_dir: tempfile::TempDir,
}

fn spawn_server(codec: Codec, start_primary: bool) -> TestServer {
    let data_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(data_dir.path()).unwrap());
    if start_primary {
        store.set_role(ReplicaRole::Primary).unwrap();
    }

    let replication_config =
        ReplicationConfig::new(ReplicaId::new("test-replica"), "127.0.0.1:0".parse().unwrap());

    let sessions = Arc::new(SessionTable::new());
    let replication =
        ReplicationPeer::spawn(replication_config, store.clone(), role_changed_notice(sessions.clone())).unwrap();
    let chat_server = ChatServer::with_sessions(store, replication, codec, sessions);

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let _ = chat_server.serve(listener);
    });
    thread::sleep(Duration::from_millis(50));

    TestServer { addr, data_dir }
}

fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).unwrap()
}

fn send(stream: &mut TcpStream, codec: Codec, message: &Message) {
    let payload = codec.encode(message).unwrap();
    encode_frame(stream, &payload).unwrap();
}

fn recv(stream: &mut TcpStream, codec: Codec) -> Message {
    let payload = decode_frame(stream, MAX_FRAME_LEN).unwrap();
    codec.decode(&payload).unwrap()
}

#[test]
fn offline_send_is_queued_and_delivered_on_login() {
    let server = spawn_server(Codec::Json, true);

    let mut alice = connect(server.addr);
    send(&mut alice, Codec::Json, &Message::new("create").with_src("alice").with_body(b"pw".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    let mut bob = connect(server.addr);
    send(&mut bob, Codec::Json, &Message::new("create").with_src("bob").with_body(b"pw".to_vec()));
    assert!(!recv(&mut bob, Codec::Json).error);
    drop(bob); // bob goes offline

    send(&mut alice, Codec::Json, &Message::new("send").with_src("alice").with_to("bob").with_body(b"hello".to_vec()));
    let reply = recv(&mut alice, Codec::Json);
    assert!(!reply.error, "send should succeed while bob is offline: {reply:?}");

    thread::sleep(Duration::from_millis(20));

    let mut bob2 = connect(server.addr);
    send(&mut bob2, Codec::Json, &Message::new("login").with_src("bob").with_body(b"pw".to_vec()));
    let login_reply = recv(&mut bob2, Codec::Json);
    assert!(!login_reply.error);
    assert!(login_reply.body_text().contains('1'), "login reply should report 1 unread: {}", login_reply.body_text());

    send(&mut bob2, Codec::Json, &Message::new("deliver").with_src("bob").with_limit(10));
    let notification = recv(&mut bob2, Codec::Json);
    assert_eq!(notification.cmd, "deliver");
    assert_eq!(notification.src, "alice");
    assert_eq!(notification.body_text(), "hello");

    let summary = recv(&mut bob2, Codec::Json);
    assert!(summary.body_text().contains("Delivered 1"));
}

#[test]
fn online_recipient_gets_a_live_push() {
    let server = spawn_server(Codec::Json, true);

    let mut alice = connect(server.addr);
    send(&mut alice, Codec::Json, &Message::new("create").with_src("alice").with_body(b"pw".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    let mut bob = connect(server.addr);
    send(&mut bob, Codec::Json, &Message::new("create").with_src("bob").with_body(b"pw".to_vec()));
    assert!(!recv(&mut bob, Codec::Json).error);

    send(&mut alice, Codec::Json, &Message::new("send").with_src("alice").with_to("bob").with_body(b"hi online".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    let push = recv(&mut bob, Codec::Json);
    assert_eq!(push.cmd, "deliver");
    assert_eq!(push.src, "alice");
    assert_eq!(push.body_text(), "hi online");
    assert_eq!(push.msg_ids.len(), 1);
}

#[test]
fn data_survives_a_simulated_restart() {
    let server = spawn_server(Codec::Json, true);

    let mut alice = connect(server.addr);
    send(&mut alice, Codec::Json, &Message::new("create").with_src("alice").with_body(b"pw".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    let mut bob = connect(server.addr);
    send(&mut bob, Codec::Json, &Message::new("create").with_src("bob").with_body(b"pw".to_vec()));
    assert!(!recv(&mut bob, Codec::Json).error);

    send(&mut alice, Codec::Json, &Message::new("send").with_src("alice").with_to("bob").with_body(b"persist me".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    // Simulate the process restarting: reopen the same data directory in a
    // fresh store, independent of the still-running server.
    let reopened = FileStore::open(server.data_dir.path()).unwrap();
    let username = outpost_types::Username::new("bob").unwrap();
    assert!(reopened.user_exists(&username).unwrap());
    let messages = reopened.get_messages(&username).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, b"persist me");
}

#[test]
fn a_demoted_primary_keeps_its_data_but_refuses_new_clients() {
    let server = spawn_server(Codec::Json, true);

    let mut alice = connect(server.addr);
    send(&mut alice, Codec::Json, &Message::new("create").with_src("alice").with_body(b"pw".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    let mut bob = connect(server.addr);
    send(&mut bob, Codec::Json, &Message::new("create").with_src("bob").with_body(b"pw".to_vec()));
    assert!(!recv(&mut bob, Codec::Json).error);

    send(&mut alice, Codec::Json, &Message::new("send").with_src("alice").with_to("bob").with_body(b"before failover".to_vec()));
    assert!(!recv(&mut alice, Codec::Json).error);

    // Simulate a failover demotion directly against the store, as the
    // Replication Peer would after losing an election.
    let store = FileStore::open(server.data_dir.path()).unwrap();
    store.set_role(ReplicaRole::Backup).unwrap();

    let username = outpost_types::Username::new("bob").unwrap();
    let messages = store.get_messages(&username).unwrap();
    assert_eq!(messages.len(), 1, "failover must not lose already-committed data");
}

#[test]
fn a_backup_rejects_client_connections() {
    let server = spawn_server(Codec::Json, false); // defaults to Backup

    let mut client = connect(server.addr);
    let notice = recv(&mut client, Codec::Json);
    assert!(notice.error);
    assert_eq!(notice.cmd, "server_status");
    assert!(notice.body_text().to_lowercase().contains("unavailable"));

    // The server closes the socket right after the notice.
    send(&mut client, Codec::Json, &Message::new("create").with_src("x").with_body(b"y".to_vec()));
    let mut buf = [0u8; 1];
    use std::io::Read;
    let _ = client.read(&mut buf);
}

#[test]
fn json_and_binary_codecs_agree_on_behavior() {
    for codec in [Codec::Json, Codec::Binary] {
        let server = spawn_server(codec, true);

        let mut alice = connect(server.addr);
        send(&mut alice, codec, &Message::new("create").with_src("alice").with_body(b"pw".to_vec()));
        assert!(!recv(&mut alice, codec).error);

        let mut bob = connect(server.addr);
        send(&mut bob, codec, &Message::new("create").with_src("bob").with_body(b"pw".to_vec()));
        assert!(!recv(&mut bob, codec).error);

        send(&mut alice, codec, &Message::new("send").with_src("alice").with_to("bob").with_body(b"hi".to_vec()));
        assert!(!recv(&mut alice, codec).error, "codec {codec:?} should accept send");

        let push = recv(&mut bob, codec);
        assert_eq!(push.cmd, "deliver");
        assert_eq!(push.body_text(), "hi");
    }
}
