//! # outpost-wire: framed transport and wire protocol
//!
//! Every link in the cluster — client↔server and server↔server — is framed
//! the same way: a 4-byte big-endian length prefix followed by that many
//! bytes of payload (see [`FRAME_HEADER_SIZE`], [`encode_frame`],
//! [`decode_frame`]).
//!
//! On top of that framing, two payload shapes are defined:
//! - [`Message`] — the client/session protocol, encodable with either
//!   [`Codec::Json`] or [`Codec::Binary`].
//! - [`ReplicationEnvelope`] — the server-to-server replication protocol,
//!   always JSON (see §4.3).

mod codec;
mod envelope;
mod error;
mod frame;
mod message;

pub use codec::Codec;
pub use envelope::{DataUpdate, ReplicationEnvelope, ReplicationKind, SyncData};
pub use error::WireError;
pub use frame::{FRAME_HEADER_SIZE, decode_frame, encode_frame};
pub use message::Message;
