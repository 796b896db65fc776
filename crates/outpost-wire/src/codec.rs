//! Textual (JSON) and binary encodings of [`Message`].

use outpost_types::MessageId;

use crate::error::WireError;
use crate::message::{JsonMessage, Message};

/// Which wire encoding a link uses.
///
/// A cluster-wide configuration option (`custom_mode` in the
/// specification): identical on both ends of every link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// A single JSON object per message.
    Json,
    /// The compact binary layout (specification §4.1).
    Binary,
}

impl Codec {
    pub fn encode(self, message: &Message) -> Result<Vec<u8>, WireError> {
        match self {
            Self::Json => encode_json(message),
            Self::Binary => encode_binary(message),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Message, WireError> {
        match self {
            Self::Json => decode_json(data),
            Self::Binary => decode_binary(data),
        }
    }
}

fn encode_json(message: &Message) -> Result<Vec<u8>, WireError> {
    let wire: JsonMessage = message.into();
    Ok(serde_json::to_vec(&wire)?)
}

fn decode_json(data: &[u8]) -> Result<Message, WireError> {
    let wire: JsonMessage = serde_json::from_slice(data)?;
    Message::try_from(wire)
}

const MAX_SHORT_FIELD: usize = u8::MAX as usize;
const MAX_LONG_FIELD: usize = u16::MAX as usize;

fn push_short_field(out: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), WireError> {
    if bytes.len() > MAX_SHORT_FIELD {
        return Err(WireError::FieldTooLong {
            field,
            len: bytes.len(),
        });
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    Ok(())
}

fn encode_binary(message: &Message) -> Result<Vec<u8>, WireError> {
    if message.body.len() > MAX_LONG_FIELD {
        return Err(WireError::FieldTooLong {
            field: "body",
            len: message.body.len(),
        });
    }

    let ids_payload = encode_ids(&message.msg_ids);
    if ids_payload.len() > MAX_LONG_FIELD {
        return Err(WireError::FieldTooLong {
            field: "msg_ids",
            len: ids_payload.len(),
        });
    }

    let mut out = Vec::with_capacity(
        1 + message.cmd.len() + 1 + message.src.len() + 1 + message.to.len()
            + 2
            + message.body.len()
            + 1
            + 2
            + ids_payload.len()
            + 2,
    );
    push_short_field(&mut out, "cmd", message.cmd.as_bytes())?;
    push_short_field(&mut out, "src", message.src.as_bytes())?;
    push_short_field(&mut out, "to", message.to.as_bytes())?;
    out.extend_from_slice(&(message.body.len() as u16).to_be_bytes());
    out.extend_from_slice(&message.body);
    out.push(u8::from(message.error));
    out.extend_from_slice(&(ids_payload.len() as u16).to_be_bytes());
    out.extend_from_slice(&ids_payload);
    out.extend_from_slice(&message.limit.to_be_bytes());
    Ok(out)
}

fn encode_ids(ids: &[MessageId]) -> Vec<u8> {
    if ids.is_empty() {
        return Vec::new();
    }
    let strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
    serde_json::to_vec(&strings).expect("string vec always serializes")
}

fn decode_ids(payload: &[u8]) -> Result<Vec<MessageId>, WireError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let strings: Vec<String> = serde_json::from_slice(payload)?;
    strings
        .into_iter()
        .map(|s| {
            u128::from_str_radix(&s, 16)
                .map(MessageId::from_u128)
                .map_err(|_| WireError::InvalidMessageId(s))
        })
        .collect()
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Malformed("length overflow"))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(WireError::Malformed("frame ended early"))?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take_len_prefixed_short(&mut self, field: &'static str) -> Result<&'a [u8], WireError> {
        let _ = field;
        let len = self.take_u8()? as usize;
        self.take(len)
    }

    fn take_len_prefixed_long(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.take_u16()? as usize;
        self.take(len)
    }
}

fn decode_binary(data: &[u8]) -> Result<Message, WireError> {
    let mut cursor = Cursor::new(data);

    let cmd = std::str::from_utf8(cursor.take_len_prefixed_short("cmd")?)
        .map_err(|_| WireError::Malformed("cmd is not valid UTF-8"))?
        .to_string();
    let src = std::str::from_utf8(cursor.take_len_prefixed_short("src")?)
        .map_err(|_| WireError::Malformed("src is not valid UTF-8"))?
        .to_string();
    let to = std::str::from_utf8(cursor.take_len_prefixed_short("to")?)
        .map_err(|_| WireError::Malformed("to is not valid UTF-8"))?
        .to_string();
    let body = cursor.take_len_prefixed_long()?.to_vec();
    let error = cursor.take_u8()? != 0;
    let ids_payload = cursor.take_len_prefixed_long()?;
    let msg_ids = decode_ids(ids_payload)?;
    let limit = cursor.take_u16()?;

    Ok(Message {
        cmd,
        src,
        to,
        body,
        error,
        msg_ids,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_message() -> impl Strategy<Value = Message> {
        (
            "[a-z_]{1,10}",
            "[a-z]{0,16}",
            "[a-z]{0,16}",
            proptest::collection::vec(any::<u8>(), 0..2000),
            any::<bool>(),
            proptest::collection::vec(any::<u128>(), 0..5),
            any::<u16>(),
        )
            .prop_map(|(cmd, src, to, body, error, ids, limit)| Message {
                cmd,
                src,
                to,
                body,
                error,
                msg_ids: ids.into_iter().map(MessageId::from_u128).collect(),
                limit,
            })
    }

    proptest! {
        #[test]
        fn json_round_trips(m in arb_message()) {
            let encoded = Codec::Json.encode(&m).unwrap();
            let decoded = Codec::Json.decode(&encoded).unwrap();
            prop_assert_eq!(decoded, m);
        }

        #[test]
        fn binary_round_trips(m in arb_message()) {
            let encoded = Codec::Binary.encode(&m).unwrap();
            let decoded = Codec::Binary.decode(&encoded).unwrap();
            prop_assert_eq!(decoded, m);
        }
    }

    #[test]
    fn binary_rejects_overlong_cmd() {
        let m = Message::new("x".repeat(300));
        let err = Codec::Binary.encode(&m).unwrap_err();
        assert!(matches!(err, WireError::FieldTooLong { field: "cmd", .. }));
    }

    #[test]
    fn json_empty_msg_ids_is_absent_semantics() {
        let m = Message::new("list");
        let encoded = Codec::Json.encode(&m).unwrap();
        let decoded = Codec::Json.decode(&encoded).unwrap();
        assert!(decoded.msg_ids.is_empty());
        assert_eq!(decoded.limit, 0);
    }
}
