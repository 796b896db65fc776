//! A connection to a replicated chat cluster that survives primary
//! failover by trying every configured server in round-robin order.
//!
//! Grounded on the original prototype's `ReplicationClient`: the same
//! round-robin server list, the same 1s→30s exponential reconnect
//! backoff, the same "queue it and try to reconnect" behavior on a send
//! failure, and the same non-blocking poll-style `receive`.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use outpost_types::Username;
use outpost_wire::{decode_frame, encode_frame, Codec, Message};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

struct State {
    socket: Option<TcpStream>,
    current_server_idx: usize,
    last_reconnect_attempt: Instant,
    backoff: Duration,
    outgoing: VecDeque<Message>,
    last_login: Option<(Username, Vec<u8>)>,
}

/// A client's view of the cluster: one logical connection backed by
/// whichever configured server currently answers.
pub struct ClientSession {
    servers: Vec<SocketAddr>,
    codec: Codec,
    state: Mutex<State>,
}

impl ClientSession {
    pub fn new(servers: Vec<SocketAddr>, codec: Codec) -> Self {
        Self {
            servers,
            codec,
            state: Mutex::new(State {
                socket: None,
                current_server_idx: 0,
                last_reconnect_attempt: Instant::now() - MAX_BACKOFF,
                backoff: INITIAL_BACKOFF,
                outgoing: VecDeque::new(),
                last_login: None,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().socket.is_some()
    }

    /// The username/password of the most recent `login` this session
    /// sent, if any.
    ///
    /// Re-login after a failover reconnect is deliberately not performed
    /// by this layer (specification §4.5); this hook only remembers the
    /// credentials so a higher layer can resend `login` itself once
    /// [`ClientSession::is_connected`] reports a fresh connection.
    pub fn last_login(&self) -> Option<(Username, Vec<u8>)> {
        self.state.lock().last_login.clone()
    }

    /// Tries to (re)connect, honoring the current backoff window. Returns
    /// `true` if a connection is now live (either already was, or a fresh
    /// attempt succeeded).
    pub fn connect(&self) -> bool {
        let mut state = self.state.lock();
        if state.socket.is_some() {
            return true;
        }
        if state.last_reconnect_attempt.elapsed() < state.backoff {
            return false;
        }
        state.last_reconnect_attempt = Instant::now();

        if self.servers.is_empty() {
            return false;
        }

        for _ in 0..self.servers.len() {
            let addr = self.servers[state.current_server_idx];
            debug!(%addr, "attempting to connect");
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    info!(%addr, "connected to server");
                    state.socket = Some(stream);
                    state.backoff = INITIAL_BACKOFF;
                    drop(state);
                    self.flush_queue();
                    return true;
                }
                Err(e) => {
                    warn!(%addr, error = %e, "failed to connect");
                    state.current_server_idx = (state.current_server_idx + 1) % self.servers.len();
                }
            }
        }

        state.backoff = (state.backoff * 2).min(MAX_BACKOFF);
        false
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if let Some(socket) = state.socket.take() {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
    }

    /// Sends one message, queuing it for replay if not currently
    /// connected (or if the write fails mid-flight).
    pub fn send(&self, message: Message) -> bool {
        if message.cmd == "login" {
            if let Ok(username) = Username::new(message.src.clone()) {
                self.state.lock().last_login = Some((username, message.body.clone()));
            }
        }

        {
            let mut state = self.state.lock();
            if state.socket.is_none() {
                state.outgoing.push_back(message);
                drop(state);
                self.connect();
                return false;
            }
        }

        let encoded = match self.codec.encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outgoing message");
                return false;
            }
        };

        let mut state = self.state.lock();
        let result = state
            .socket
            .as_mut()
            .map(|s| encode_frame(s, &encoded))
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotConnected, "no socket")));

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "send failed, queuing for retry");
                state.socket = None;
                state.outgoing.push_back(message);
                drop(state);
                self.connect();
                false
            }
        }
    }

    /// Replays everything queued while disconnected. Stops (leaving the
    /// rest queued) at the first failed send, matching the original
    /// prototype's "re-raise to break the loop" behavior.
    fn flush_queue(&self) {
        loop {
            let message = {
                let mut state = self.state.lock();
                match state.outgoing.pop_front() {
                    Some(m) => m,
                    None => return,
                }
            };

            let encoded = match self.codec.encode(&message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "dropping unencodable queued message");
                    continue;
                }
            };

            let mut state = self.state.lock();
            let result = state
                .socket
                .as_mut()
                .map(|s| encode_frame(s, &encoded))
                .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotConnected, "no socket")));

            match result {
                Ok(()) => info!(cmd = %message.cmd, "sent queued message"),
                Err(e) => {
                    warn!(error = %e, "failed to send queued message, re-queuing");
                    state.outgoing.push_front(message);
                    return;
                }
            }
        }
    }

    /// Polls for one incoming message without blocking for long. Returns
    /// `None` on timeout, on a closed connection (after marking this
    /// session disconnected), or while not connected at all.
    pub fn receive(&self) -> Option<Message> {
        let mut state = self.state.lock();
        let socket = state.socket.as_mut()?;

        if let Err(e) = socket.set_read_timeout(Some(POLL_TIMEOUT)) {
            warn!(error = %e, "failed to set read timeout");
        }

        match decode_frame(socket, MAX_FRAME_LEN) {
            Ok(payload) => {
                let _ = socket.set_read_timeout(None);
                match self.codec.decode(&payload) {
                    Ok(message) => {
                        if is_forced_rotation(&message) {
                            info!("server signaled unavailability, rotating to the next server");
                            if let Some(socket) = state.socket.take() {
                                let _ = socket.shutdown(std::net::Shutdown::Both);
                            }
                        }
                        Some(message)
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to decode incoming message");
                        None
                    }
                }
            }
            Err(e) if is_timeout(&e) => None,
            Err(e) => {
                warn!(error = %e, "connection closed by server");
                state.socket = None;
                None
            }
        }
    }
}

/// True if `message` is a `server_status` error whose body references a
/// transition or unavailability — the signal that the client session
/// layer should drop this link and rotate to the next configured server
/// (specification §4.5).
fn is_forced_rotation(message: &Message) -> bool {
    if message.cmd != "server_status" || !message.error {
        return false;
    }
    let body = message.body_text().to_lowercase();
    body.contains("transition") || body.contains("unavailable") || body.contains("backup mode")
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
