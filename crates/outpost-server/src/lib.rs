//! # outpost-server: the Chat Core (specification §4.4)
//!
//! Client-facing command handling: account management, presence, and
//! message delivery, served one OS thread per connection. Accepts
//! traffic only while this replica is PRIMARY and not mid-transition.

mod connection;
mod error;
mod handler;
mod server;
mod session;

pub use error::ServerError;
pub use handler::ChatCore;
pub use server::{role_changed_notice, ChatServer};
pub use session::{ClientHandle, SessionTable};
