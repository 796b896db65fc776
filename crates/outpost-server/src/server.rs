//! The client-facing listener: accepts connections while PRIMARY, rejects
//! them (with a `server_status` notice) otherwise.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use outpost_replication::ReplicationPeer;
use outpost_store::PersistentStore;
use outpost_wire::{encode_frame, Codec, Message};

use crate::connection::serve_connection;
use crate::error::ServerError;
use crate::handler::ChatCore;
use crate::session::SessionTable;

/// The Chat Core service: owns the client listener and dispatches every
/// accepted connection onto its own thread.
pub struct ChatServer {
    core: Arc<ChatCore>,
    replication: ReplicationPeer,
    codec: Codec,
    running: Arc<AtomicBool>,
}

impl ChatServer {
    pub fn new(store: Arc<dyn PersistentStore>, replication: ReplicationPeer, codec: Codec) -> Self {
        Self::with_sessions(store, replication, codec, Arc::new(SessionTable::new()))
    }

    /// Builds a [`ChatServer`] around a [`SessionTable`] constructed ahead
    /// of time, so a caller wiring up [`ReplicationPeer::spawn`]'s
    /// `on_role_changed` callback can close over the same table before
    /// the [`ReplicationPeer`] (and therefore the server itself) exists —
    /// see [`role_changed_notice`].
    pub fn with_sessions(
        store: Arc<dyn PersistentStore>,
        replication: ReplicationPeer,
        codec: Codec,
        sessions: Arc<SessionTable>,
    ) -> Self {
        let core = Arc::new(ChatCore::new(store, replication.clone(), sessions));
        Self {
            core,
            replication,
            codec,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A callback suitable for [`ReplicationPeer::spawn`]'s `on_role_changed`:
    /// when this replica steps down, every connected client is told to
    /// reconnect elsewhere and disconnected (specification §4.3).
    pub fn role_changed_callback(&self) -> impl Fn(outpost_types::ReplicaRole) + Send + Sync {
        role_changed_notice(self.core.sessions().clone())
    }

    pub fn run(&self, bind_addr: SocketAddr) -> Result<(), ServerError> {
        let listener = TcpListener::bind(bind_addr).map_err(|source| ServerError::BindFailed {
            addr: bind_addr,
            source,
        })?;
        info!(addr = %bind_addr, "chat core listening");
        self.serve(listener)
    }

    /// Runs the accept loop over an already-bound listener. Split out from
    /// [`ChatServer::run`] so tests can bind to `127.0.0.1:0`, read back
    /// the actual ephemeral port, and only then hand the listener off.
    pub fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        for incoming in listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "error accepting client connection");
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };

            if !self.replication.role().is_primary() || self.replication.is_transitioning() {
                reject_not_primary(stream, self.codec);
                continue;
            }

            let core = self.core.clone();
            let codec = self.codec;
            thread::spawn(move || serve_connection(stream, codec, core));
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// The role-change notification behavior, independent of a constructed
/// [`ChatServer`]: closes every session with a reconnect notice when the
/// replica stops being PRIMARY. Exposed standalone so the binary can wire
/// it into [`ReplicationPeer::spawn`] before the [`ChatServer`] exists —
/// the peer and the server each need a handle to the other at
/// construction time, and the [`SessionTable`] is the part of the server
/// this callback actually needs.
pub fn role_changed_notice(sessions: Arc<SessionTable>) -> impl Fn(outpost_types::ReplicaRole) + Send + Sync {
    move |role| {
        info!(%role, "chat core observed a role change");
        if !role.is_primary() {
            let notice = Message::new("server_status")
                .with_body(b"Server is now in backup mode, please reconnect".to_vec())
                .with_error(true);
            sessions.close_all(&notice);
        }
    }
}

fn reject_not_primary(mut stream: std::net::TcpStream, codec: Codec) {
    warn!("rejecting client connection: not PRIMARY or in transition");
    let notice = Message::new("server_status")
        .with_body(b"Server unavailable, please try another server".to_vec())
        .with_error(true);
    if let Ok(payload) = codec.encode(&notice) {
        let _ = encode_frame(&mut stream, &payload);
    }
    let _ = stream.shutdown(std::net::Shutdown::Both);
}
