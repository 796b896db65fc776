//! Tracking which usernames are currently logged in, and to which socket.
//!
//! Grounded on the original prototype's `current_users: Dict[str, socket]`,
//! generalized to a write-locked handle per connection (mirroring
//! `kimberlite-server::connection.rs`'s rule that every socket write goes
//! through a single lock) and a per-user "already delivered to this
//! session" set for `deliver`'s dedup semantics.

use std::collections::{HashMap, HashSet};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

use outpost_types::{MessageId, Username};
use outpost_wire::{encode_frame, Codec, Message, WireError};

/// A handle to one connected client's socket, safe to share across
/// threads. All writes go through the inner mutex so interleaved
/// `deliver` pushes and command replies never corrupt the frame stream.
#[derive(Clone)]
pub struct ClientHandle {
    stream: Arc<Mutex<TcpStream>>,
    codec: Codec,
}

impl ClientHandle {
    pub fn new(stream: TcpStream, codec: Codec) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            codec,
        }
    }

    pub fn send(&self, message: &Message) -> Result<(), WireError> {
        let payload = self.codec.encode(message)?;
        let mut stream = self.stream.lock();
        encode_frame(&mut *stream, &payload)?;
        Ok(())
    }

    pub fn try_clone_stream(&self) -> std::io::Result<TcpStream> {
        self.stream.lock().try_clone()
    }
}

/// The table of currently logged-in users, plus per-user "already
/// delivered" message sets used by the `deliver` command's peek/pop
/// semantics (specification §4.4).
#[derive(Default)]
pub struct SessionTable {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    online: HashMap<Username, ClientHandle>,
    seen: HashMap<Username, HashSet<MessageId>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self, username: &Username) -> bool {
        self.inner.lock().online.contains_key(username)
    }

    pub fn login(&self, username: Username, handle: ClientHandle) {
        self.inner.lock().online.insert(username, handle);
    }

    /// Unbinds the session and drops its peek "seen" set — the set is
    /// session-local and dies with the session (specification §9), so a
    /// later login starts peeking from a clean slate.
    pub fn logoff(&self, username: &Username) {
        let mut inner = self.inner.lock();
        inner.online.remove(username);
        inner.seen.remove(username);
    }

    pub fn handle_for(&self, username: &Username) -> Option<ClientHandle> {
        self.inner.lock().online.get(username).cloned()
    }

    /// Marks `ids` as already delivered to `username`'s current session.
    pub fn mark_seen(&self, username: &Username, ids: impl IntoIterator<Item = MessageId>) {
        self.inner
            .lock()
            .seen
            .entry(username.clone())
            .or_default()
            .extend(ids);
    }

    pub fn has_seen(&self, username: &Username, id: MessageId) -> bool {
        self.inner
            .lock()
            .seen
            .get(username)
            .is_some_and(|set| set.contains(&id))
    }

    /// Closes every connection and clears the table — used when this
    /// replica steps down from PRIMARY (specification §4.3: a BACKUP
    /// accepts no client traffic).
    pub fn close_all(&self, notice: &Message) {
        let mut inner = self.inner.lock();
        for handle in inner.online.values() {
            let _ = handle.send(notice);
            if let Ok(stream) = handle.try_clone_stream() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        inner.online.clear();
        inner.seen.clear();
    }
}
