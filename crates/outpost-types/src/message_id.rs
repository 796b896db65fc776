//! Cluster-wide unique message identifiers.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An opaque identifier assigned to a [`QueuedMessage`] by the PRIMARY at
/// acceptance time.
///
/// Represented as a 128-bit value, printed and serialized as a 32-character
/// lowercase hex string (the wire-level analogue of the original
/// prototype's `uuid.uuid4()` strings, minus the dashes).
///
/// [`QueuedMessage`]: https://docs.rs/outpost-store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u128);

impl MessageId {
    /// Generates a fresh, unpredictable id.
    ///
    /// # Panics
    ///
    /// Panics if the operating system's random source is unavailable,
    /// matching the behavior of every other id generator in this stack.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).expect("system random source unavailable");
        Self(u128::from_be_bytes(bytes))
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct MessageIdVisitor;

impl Visitor<'_> for MessageIdVisitor {
    type Value = MessageId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32-character hex string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u128::from_str_radix(v, 16)
            .map(MessageId)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(MessageIdVisitor)
    }
}
