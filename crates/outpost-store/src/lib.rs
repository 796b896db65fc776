//! # outpost-store: the Persistent Store (specification §4.2)
//!
//! A single-node durable key/value surface holding the user table
//! (username → password), per-user message queues, and the replica's last
//! known role. Every operation is atomic with respect to every other
//! operation on the same [`FileStore`].

mod error;
mod file_store;

pub use error::StoreError;
pub use file_store::FileStore;

use outpost_types::{MessageId, ReplicaRole, Username};

/// A single queued message, as returned by [`PersistentStore::get_messages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub sender: Username,
    pub body: Vec<u8>,
}

/// The durable surface every Chat Core and Replication Peer operation
/// bottoms out on.
///
/// Implementations must serialize every operation (atomic per
/// operation, thread-safe) — callers never need to coordinate
/// externally.
pub trait PersistentStore: Send + Sync {
    /// Adds a new user. Does not check for existence; callers check
    /// [`PersistentStore::user_exists`] first if "create only if absent"
    /// semantics are required.
    fn add_user(&self, username: &Username, password: &[u8]) -> Result<(), StoreError>;

    /// Removes a user, their own message queue, and every message authored
    /// by them sitting in *other* users' queues (specification §3's
    /// cascading-deletion invariant).
    fn delete_user(&self, username: &Username) -> Result<(), StoreError>;

    fn user_exists(&self, username: &Username) -> Result<bool, StoreError>;

    /// Returns every known user, mapped to their password.
    fn get_users(&self) -> Result<Vec<(Username, Vec<u8>)>, StoreError>;

    /// Returns a user's message queue in arrival order.
    fn get_messages(&self, username: &Username) -> Result<Vec<QueuedMessage>, StoreError>;

    /// Appends a message to `to`'s queue, returning the freshly assigned id.
    fn add_message(
        &self,
        to: &Username,
        from: &Username,
        body: &[u8],
    ) -> Result<MessageId, StoreError>;

    /// Removes any of `ids` present in `username`'s queue. Silent on misses.
    fn delete_messages(&self, username: &Username, ids: &[MessageId]) -> Result<(), StoreError>;

    fn get_role(&self) -> Result<ReplicaRole, StoreError>;

    fn set_role(&self, role: ReplicaRole) -> Result<(), StoreError>;
}
