//! # outpost-client: the Client Session Layer (specification §4.5)
//!
//! Round-robin failover across a configured server list, exponential
//! reconnect backoff, and replay of messages queued while disconnected.
//! Deliberately does not re-authenticate automatically after failover —
//! callers observe [`ClientSession::is_connected`] and re-issue `login`
//! themselves.

mod error;
mod session;

pub use error::ClientError;
pub use session::ClientSession;
