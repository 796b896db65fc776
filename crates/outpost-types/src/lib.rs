//! # outpost-types: core type definitions for the Outpost chat cluster
//!
//! Shared types used across every Outpost crate:
//! - Identity types ([`Username`], [`MessageId`], [`ReplicaId`])
//! - Role tracking ([`ReplicaRole`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

mod message_id;

pub use message_id::MessageId;

/// A cluster-unique account name.
///
/// Non-empty byte string per spec; stored and compared as UTF-8 here
/// since every wire encoding already requires valid UTF-8 for this field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    /// Creates a new `Username`, rejecting the empty string.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidUsername> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidUsername);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A username failed to satisfy the non-empty invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("username must not be empty")]
pub struct InvalidUsername;

/// Stable, cluster-unique identity of a replica.
///
/// Used both to address peer links and as the election tie-break key:
/// comparison is plain lexicographic `Ord`, matching the original
/// prototype's string comparison on its data-directory path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role a replica currently holds.
///
/// Persisted so it survives restart (see `outpost-store`). At most one
/// `Primary` cluster-wide in the absence of partitions; a `Candidate`
/// neither serves clients nor broadcasts `DataUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaRole {
    Primary,
    Backup,
    Candidate,
}

impl ReplicaRole {
    pub fn is_primary(self) -> bool {
        matches!(self, Self::Primary)
    }

    pub fn is_candidate(self) -> bool {
        matches!(self, Self::Candidate)
    }
}

impl Display for ReplicaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Primary => "PRIMARY",
            Self::Backup => "BACKUP",
            Self::Candidate => "CANDIDATE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_rejects_empty() {
        assert!(Username::new("").is_err());
        assert!(Username::new("alice").is_ok());
    }

    #[test]
    fn replica_id_orders_lexicographically() {
        let a = ReplicaId::new("replica-a");
        let b = ReplicaId::new("replica-b");
        assert!(a < b);
    }

    #[test]
    fn role_display_matches_wire_tags() {
        assert_eq!(ReplicaRole::Primary.to_string(), "PRIMARY");
        assert_eq!(ReplicaRole::Backup.to_string(), "BACKUP");
        assert_eq!(ReplicaRole::Candidate.to_string(), "CANDIDATE");
    }
}
