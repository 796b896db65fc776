//! Wiring the pure [`crate::core::Core`] to real sockets and timers.
//!
//! One thread per concern, same shape as the original prototype's
//! `ReplicationServer` (listener / sender / heartbeat / monitor threads):
//! a listener thread accepts peer connections, one reader thread per link
//! decodes incoming envelopes and folds them into the core, a single
//! sender thread drains an outbound queue so every socket write is
//! serialized, and heartbeat/monitor threads drive the timer-based
//! events.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use outpost_store::PersistentStore;
use outpost_types::{MessageId, ReplicaId, ReplicaRole, Username};
use outpost_wire::{decode_frame, encode_frame, DataUpdate, ReplicationEnvelope, ReplicationKind, SyncData};

use crate::config::ReplicationConfig;
use crate::core::{Core, Event, Output, Target};
use crate::error::ReplicationError;

const OUTBOUND_QUEUE_CAPACITY: usize = 4096;
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A live connection to one peer replica.
struct Link {
    peer_id: ReplicaId,
    writer: Mutex<TcpStream>,
}

impl Link {
    fn send(&self, envelope: &ReplicationEnvelope) -> Result<(), ReplicationError> {
        let payload = serde_json::to_vec(envelope)?;
        let mut stream = self.writer.lock();
        encode_frame(&mut *stream, &payload)?;
        Ok(())
    }
}

/// A running replication peer.
///
/// Cloning is cheap; every clone shares the same background threads and
/// underlying state (`Arc` internally, same convention the rest of this
/// workspace uses for shared service handles).
#[derive(Clone)]
pub struct ReplicationPeer {
    inner: Arc<Inner>,
}

struct Inner {
    config: ReplicationConfig,
    store: Arc<dyn PersistentStore>,
    core: Mutex<Core>,
    links: Mutex<HashMap<ReplicaId, Arc<Link>>>,
    last_heartbeat: Mutex<Instant>,
    last_sync: Mutex<Instant>,
    transitioning: AtomicBool,
    outbound_tx: Sender<(Target, ReplicationKind)>,
    running: AtomicBool,
    on_role_changed: Box<dyn Fn(ReplicaRole) + Send + Sync>,
}

impl ReplicationPeer {
    /// Starts a replication peer: binds its listener, connects to every
    /// configured peer, and starts the heartbeat/monitor/sender threads.
    pub fn spawn(
        config: ReplicationConfig,
        store: Arc<dyn PersistentStore>,
        on_role_changed: impl Fn(ReplicaRole) + Send + Sync + 'static,
    ) -> Result<Self, ReplicationError> {
        let initial_role = store.get_role()?;
        let (outbound_tx, outbound_rx) = bounded(OUTBOUND_QUEUE_CAPACITY);

        let inner = Arc::new(Inner {
            core: Mutex::new(Core::with_missed_heartbeat_budget(
                config.self_id.clone(),
                initial_role,
                config.max_missed_heartbeats,
            )),
            last_heartbeat: Mutex::new(Instant::now()),
            last_sync: Mutex::new(Instant::now()),
            transitioning: AtomicBool::new(false),
            outbound_tx,
            running: AtomicBool::new(true),
            links: Mutex::new(HashMap::new()),
            on_role_changed: Box::new(on_role_changed),
            config,
            store,
        });

        let listener = TcpListener::bind(inner.config.bind_addr)?;
        info!(addr = %inner.config.bind_addr, "replication listener bound");

        {
            let inner = inner.clone();
            thread::spawn(move || listener_loop(inner, listener));
        }
        {
            let inner = inner.clone();
            thread::spawn(move || sender_loop(inner, outbound_rx));
        }
        {
            let inner = inner.clone();
            thread::spawn(move || heartbeat_loop(inner));
        }
        {
            let inner = inner.clone();
            thread::spawn(move || monitor_loop(inner));
        }

        let peer = Self { inner };
        for (peer_id, addr) in peer.inner.config.peers.clone() {
            let peer = peer.clone();
            thread::spawn(move || {
                if let Err(e) = peer.connect_to_peer(peer_id.clone(), addr) {
                    warn!(%peer_id, %addr, error = %e, "initial peer connect failed");
                }
            });
        }

        Ok(peer)
    }

    pub fn role(&self) -> ReplicaRole {
        self.inner.core.lock().role()
    }

    pub fn is_transitioning(&self) -> bool {
        self.inner.transitioning.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Broadcasts a committed mutation to every backup. A no-op (besides
    /// a log line) when this replica is not PRIMARY, mirroring the
    /// original `broadcast_data_update` guard.
    pub fn broadcast_data_update(&self, update: DataUpdate) {
        if !self.role().is_primary() {
            debug!("suppressing data update broadcast: not PRIMARY");
            return;
        }
        self.enqueue(Target::All, ReplicationKind::DataUpdate(update));
    }

    /// Best-effort wait for backup acknowledgment. Preserved from the
    /// original prototype's `wait_for_acks`: there is no per-message ack
    /// tracking, so this only ever blocks for `timeout` and reports
    /// whether a majority is reachable in principle (see `SPEC_FULL.md`'s
    /// Open Question resolution on this).
    pub fn wait_for_acks(&self, timeout: Duration) -> bool {
        thread::sleep(timeout);
        let total_nodes = self.inner.links.lock().len() + 1;
        let majority = total_nodes / 2 + 1;
        total_nodes <= 1 || 1 >= majority
    }

    fn enqueue(&self, target: Target, kind: ReplicationKind) {
        if self.inner.outbound_tx.try_send((target, kind)).is_err() {
            warn!("outbound replication queue full, dropping message");
        }
    }

    fn connect_to_peer(&self, peer_id: ReplicaId, addr: SocketAddr) -> Result<(), ReplicationError> {
        if self.inner.links.lock().contains_key(&peer_id) {
            return Ok(());
        }
        let stream = TcpStream::connect(addr)?;
        self.handle_link(stream, Some(peer_id))
    }

    fn handle_incoming(&self, stream: TcpStream) -> Result<(), ReplicationError> {
        self.handle_link(stream, None)
    }

    /// Performs the `HELLO` handshake (sending ours first when we are the
    /// initiator) and then runs the link's read loop until it closes.
    fn handle_link(
        &self,
        mut stream: TcpStream,
        expected_peer: Option<ReplicaId>,
    ) -> Result<(), ReplicationError> {
        let our_role = self.role();
        send_raw(
            &mut stream,
            &ReplicationEnvelope::new(
                ReplicationKind::Hello {
                    peer_id: self.inner.config.self_id.clone(),
                    role: our_role,
                },
                now_secs(),
            ),
        )?;

        let greeting = recv_raw(&mut stream)?;
        let ReplicationKind::Hello { peer_id, role } = greeting.kind else {
            return Err(ReplicationError::HandshakeExpected {
                addr: stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
            });
        };
        if let Some(expected) = &expected_peer {
            if expected != &peer_id {
                warn!(%expected, got = %peer_id, "peer identified with an unexpected id");
            }
        }

        let writer = stream.try_clone()?;
        let link = Arc::new(Link {
            peer_id: peer_id.clone(),
            writer: Mutex::new(writer),
        });
        self.inner.links.lock().insert(peer_id.clone(), link);

        let output = self.inner.core.lock().apply(Event::PeerJoined {
            peer_id: peer_id.clone(),
            role,
        });
        self.apply_output(output);

        if our_role.is_primary() {
            self.send_sync_to(&peer_id);
        }

        let result = self.read_loop(&mut stream, &peer_id);

        self.inner.links.lock().remove(&peer_id);
        let output = self
            .inner
            .core
            .lock()
            .apply(Event::PeerLeft { peer_id: peer_id.clone() });
        self.apply_output(output);
        info!(%peer_id, "peer link closed");
        result
    }

    fn read_loop(&self, stream: &mut TcpStream, peer_id: &ReplicaId) -> Result<(), ReplicationError> {
        while self.inner.running.load(Ordering::SeqCst) {
            let envelope = match recv_raw(stream) {
                Ok(env) => env,
                Err(ReplicationError::Io(e)) if is_closed(&e) => return Ok(()),
                Err(e) => return Err(e),
            };

            if self.is_transitioning() {
                continue;
            }
            self.dispatch(peer_id, envelope.kind);
        }
        Ok(())
    }

    fn dispatch(&self, peer_id: &ReplicaId, kind: ReplicationKind) {
        match kind {
            ReplicationKind::Heartbeat => {
                *self.inner.last_heartbeat.lock() = Instant::now();
                let output = self.inner.core.lock().apply(Event::HeartbeatReceived);
                self.apply_output(output);
            }
            ReplicationKind::Election { peer_id } => {
                let output = self.inner.core.lock().apply(Event::ElectionReceived { peer_id });
                self.apply_output(output);
            }
            ReplicationKind::ElectionAck => {
                let output = self.inner.core.lock().apply(Event::ElectionAckReceived);
                self.apply_output(output);
            }
            ReplicationKind::Elected { peer_id } => {
                let output = self
                    .inner
                    .core
                    .lock()
                    .apply(Event::ElectedReceived { peer_id });
                self.apply_output(output);
            }
            ReplicationKind::StateChange { role } => {
                let output = self.inner.core.lock().apply(Event::StateChangeReceived {
                    peer_id: peer_id.clone(),
                    role,
                });
                self.apply_output(output);
            }
            ReplicationKind::DataUpdate(update) => {
                if let Err(e) = apply_data_update(self.inner.store.as_ref(), update) {
                    error!(error = %e, "failed to apply replicated data update");
                }
            }
            ReplicationKind::SyncRequest => {
                self.send_sync_to(peer_id);
            }
            ReplicationKind::SyncData(data) => {
                if let Err(e) = apply_sync_data(self.inner.store.as_ref(), data) {
                    error!(error = %e, "failed to apply sync data");
                }
            }
            ReplicationKind::SyncComplete => {
                *self.inner.last_sync.lock() = Instant::now();
                info!(%peer_id, "sync complete");
            }
            ReplicationKind::Hello { .. } => {
                warn!(%peer_id, "unexpected HELLO after handshake");
            }
        }
    }

    fn apply_output(&self, output: Output) {
        let became_primary = output.role_changed == Some(ReplicaRole::Primary);
        if let Some(role) = output.role_changed {
            self.inner.transitioning.store(true, Ordering::SeqCst);
            if let Err(e) = self.inner.store.set_role(role) {
                error!(error = %e, "failed to persist new replica role");
            }
            (self.inner.on_role_changed)(role);
            info!(%role, "replica role changed, entering transition");
        }
        for msg in output.outbound {
            self.enqueue(msg.target, msg.kind);
        }
        let pulled_sync_from = output.request_sync_from.is_some();
        if let Some(peer_id) = output.request_sync_from {
            self.enqueue(Target::Peer(peer_id), ReplicationKind::SyncRequest);
        }

        if output.role_changed.is_some() {
            // The transitioning latch clears after a short grace period
            // (specification §4.3); a freshly elected PRIMARY additionally
            // waits until it has pulled an initial SYNC_REQUEST from a live
            // peer before opening up to client writes.
            let inner = self.inner.clone();
            let grace = inner.config.transition_grace;
            let awaits_sync = became_primary && pulled_sync_from;
            thread::spawn(move || {
                thread::sleep(grace);
                if awaits_sync {
                    thread::sleep(grace);
                }
                inner.transitioning.store(false, Ordering::SeqCst);
                info!("transition grace period elapsed, resuming client traffic");
            });
        }
    }

    fn send_sync_to(&self, peer_id: &ReplicaId) {
        let users = match self.inner.store.get_users() {
            Ok(users) => users,
            Err(e) => {
                error!(error = %e, "failed to read users for sync");
                return;
            }
        };
        let users_payload: Vec<(String, Vec<u8>)> = users
            .iter()
            .map(|(name, pw)| (name.as_str().to_string(), pw.clone()))
            .collect();
        self.enqueue(
            Target::Peer(peer_id.clone()),
            ReplicationKind::SyncData(SyncData::Users(users_payload)),
        );

        let mut messages_payload = Vec::new();
        for (name, _) in &users {
            match self.inner.store.get_messages(name) {
                Ok(queue) => {
                    let entries = queue
                        .into_iter()
                        .map(|m| (m.id, m.sender.into_string(), m.body))
                        .collect();
                    messages_payload.push((name.as_str().to_string(), entries));
                }
                Err(e) => error!(error = %e, username = %name, "failed to read messages for sync"),
            }
        }
        self.enqueue(
            Target::Peer(peer_id.clone()),
            ReplicationKind::SyncData(SyncData::Messages(messages_payload)),
        );
        self.enqueue(Target::Peer(peer_id.clone()), ReplicationKind::SyncComplete);
    }
}

fn apply_data_update(store: &dyn PersistentStore, update: DataUpdate) -> Result<(), ReplicationError> {
    match update {
        DataUpdate::AddUser { username, password } => {
            let username = Username::new(username).map_err(|_| ReplicationError::UnknownPeer(String::new()))?;
            store.add_user(&username, &password)?;
        }
        DataUpdate::DeleteUser { username } => {
            if let Ok(username) = Username::new(username) {
                store.delete_user(&username)?;
            }
        }
        DataUpdate::AddMessage {
            to,
            from,
            body,
            msg_id: _,
        } => {
            if let (Ok(to), Ok(from)) = (Username::new(to), Username::new(from)) {
                store.add_message(&to, &from, &body)?;
            }
        }
        DataUpdate::DeleteMessages { username, msg_ids } => {
            if let Ok(username) = Username::new(username) {
                store.delete_messages(&username, &msg_ids)?;
            }
        }
    }
    Ok(())
}

fn apply_sync_data(store: &dyn PersistentStore, data: SyncData) -> Result<(), ReplicationError> {
    match data {
        SyncData::Users(users) => {
            for (name, password) in users {
                let Ok(username) = Username::new(name) else {
                    continue;
                };
                if !store.user_exists(&username)? {
                    store.add_user(&username, &password)?;
                }
            }
        }
        SyncData::Messages(all) => {
            for (name, messages) in all {
                let Ok(username) = Username::new(name) else {
                    continue;
                };
                let existing: Vec<MessageId> = store
                    .get_messages(&username)?
                    .into_iter()
                    .map(|m| m.id)
                    .collect();
                for (id, from, body) in messages {
                    if existing.contains(&id) {
                        continue;
                    }
                    let Ok(from) = Username::new(from) else {
                        continue;
                    };
                    store.add_message(&username, &from, &body)?;
                }
            }
        }
    }
    Ok(())
}

fn listener_loop(inner: Arc<Inner>, listener: TcpListener) {
    for stream in listener.incoming() {
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        match stream {
            Ok(stream) => {
                let peer = ReplicationPeer { inner: inner.clone() };
                thread::spawn(move || {
                    if let Err(e) = peer.handle_incoming(stream) {
                        warn!(error = %e, "replication peer connection ended with an error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "error accepting replication connection");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn sender_loop(inner: Arc<Inner>, rx: crossbeam_channel::Receiver<(Target, ReplicationKind)>) {
    while inner.running.load(Ordering::SeqCst) {
        let Ok((target, kind)) = rx.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        let envelope = ReplicationEnvelope::new(kind, now_secs());
        let links = inner.links.lock();
        match target {
            Target::All => {
                for link in links.values() {
                    if let Err(e) = link.send(&envelope) {
                        warn!(peer_id = %link.peer_id, error = %e, "failed to send to peer");
                    }
                }
            }
            Target::Peer(peer_id) => {
                if let Some(link) = links.get(&peer_id) {
                    if let Err(e) = link.send(&envelope) {
                        warn!(%peer_id, error = %e, "failed to send to peer");
                    }
                }
            }
        }
    }
}

fn heartbeat_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        thread::sleep(inner.config.heartbeat_interval);
        let output = inner.core.lock().apply(Event::HeartbeatTick);
        ReplicationPeer { inner: inner.clone() }.apply_output(output);
    }
}

fn monitor_loop(inner: Arc<Inner>) {
    while inner.running.load(Ordering::SeqCst) {
        thread::sleep(inner.config.heartbeat_interval / 2);
        let peer = ReplicationPeer { inner: inner.clone() };

        if peer.role() == ReplicaRole::Backup {
            let missed = peer.inner.last_heartbeat.lock().elapsed() > inner.config.heartbeat_timeout;
            let output = inner.core.lock().apply(Event::MonitorTick {
                missed_heartbeat_budget_exceeded: missed,
            });
            let became_candidate = output.role_changed == Some(ReplicaRole::Candidate);
            peer.apply_output(output);

            if became_candidate {
                thread::sleep(inner.config.election_wait);
                let output = inner.core.lock().apply(Event::ElectionWaitElapsed);
                peer.apply_output(output);
            }
        } else if peer.role().is_primary() {
            let due = peer.inner.last_sync.lock().elapsed() > inner.config.sync_interval;
            let has_peers = !peer.inner.links.lock().is_empty();
            if due && has_peers {
                let peer_ids: Vec<ReplicaId> = peer.inner.links.lock().keys().cloned().collect();
                for peer_id in peer_ids {
                    peer.send_sync_to(&peer_id);
                }
                *peer.inner.last_sync.lock() = Instant::now();
            }
        }
    }
}

fn send_raw(stream: &mut TcpStream, envelope: &ReplicationEnvelope) -> Result<(), ReplicationError> {
    let payload = serde_json::to_vec(envelope)?;
    encode_frame(stream, &payload)?;
    Ok(())
}

fn recv_raw(stream: &mut TcpStream) -> Result<ReplicationEnvelope, ReplicationError> {
    let payload = decode_frame(stream, MAX_FRAME_LEN)?;
    Ok(serde_json::from_slice(&payload)?)
}

fn is_closed(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
    )
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
