//! The client/session protocol message schema (specification §4.1).

use outpost_types::MessageId;
use serde::{Deserialize, Serialize};

/// A single protocol message, carried inside one [`crate::frame`] on any
/// client↔server link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Short ASCII command tag (`"create"`, `"login"`, `"deliver"`, ...).
    pub cmd: String,
    /// Sending username, or empty.
    pub src: String,
    /// Recipient username, or empty.
    pub to: String,
    /// Arbitrary payload bytes (up to 2^16−1 bytes in the binary encoding).
    pub body: Vec<u8>,
    /// Set when this message reports an error condition.
    pub error: bool,
    /// Message ids this frame refers to (e.g. a `deliver` notification, or
    /// a `delete_msgs` request).
    pub msg_ids: Vec<MessageId>,
    /// 16-bit limit parameter used by `deliver`.
    pub limit: u16,
}

impl Message {
    /// Creates a bare message with only a command tag set.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    /// Builder-style setter for `src`.
    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = src.into();
        self
    }

    /// Builder-style setter for `to`.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    /// Builder-style setter for `body`.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder-style setter marking this message as an error reply.
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }

    /// Builder-style setter for `msg_ids`.
    pub fn with_msg_ids(mut self, ids: impl Into<Vec<MessageId>>) -> Self {
        self.msg_ids = ids.into();
        self
    }

    /// Builder-style setter for `limit`.
    pub fn with_limit(mut self, limit: u16) -> Self {
        self.limit = limit;
        self
    }

    /// Convenience constructor for an error reply to the same command.
    pub fn error_reply(cmd: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(cmd).with_body(body).with_error(true)
    }

    /// Returns `body` decoded as UTF-8, replacing invalid sequences.
    ///
    /// Chat bodies are conventionally text; this is a display convenience,
    /// not the wire contract (the wire carries arbitrary bytes).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// JSON wire shape for [`Message`] (specification §4.1, "Textual").
///
/// `body` is base64-encoded so the JSON encoding can carry arbitrary bytes
/// (not just valid UTF-8) and still round-trip exactly, matching the
/// round-trip property required of every encoding.
#[derive(Serialize, Deserialize)]
pub(crate) struct JsonMessage {
    pub cmd: String,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub msg_ids: Vec<MessageId>,
    #[serde(default)]
    pub limit: u16,
}

impl From<&Message> for JsonMessage {
    fn from(m: &Message) -> Self {
        use base64::Engine as _;
        Self {
            cmd: m.cmd.clone(),
            src: m.src.clone(),
            to: m.to.clone(),
            body: base64::engine::general_purpose::STANDARD.encode(&m.body),
            error: m.error,
            msg_ids: m.msg_ids.clone(),
            limit: m.limit,
        }
    }
}

impl TryFrom<JsonMessage> for Message {
    type Error = crate::WireError;

    fn try_from(j: JsonMessage) -> Result<Self, Self::Error> {
        use base64::Engine as _;
        let body = base64::engine::general_purpose::STANDARD
            .decode(j.body.as_bytes())
            .map_err(|_| crate::WireError::Malformed("body is not valid base64"))?;
        Ok(Self {
            cmd: j.cmd,
            src: j.src,
            to: j.to,
            body,
            error: j.error,
            msg_ids: j.msg_ids,
            limit: j.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_all_fields() {
        let id = MessageId::generate();
        let m = Message::new("send")
            .with_src("alice")
            .with_to("bob")
            .with_body(b"hi".to_vec())
            .with_error(false)
            .with_msg_ids(vec![id])
            .with_limit(7);
        assert_eq!(m.cmd, "send");
        assert_eq!(m.src, "alice");
        assert_eq!(m.to, "bob");
        assert_eq!(m.body, b"hi");
        assert_eq!(m.msg_ids, vec![id]);
        assert_eq!(m.limit, 7);
    }
}
