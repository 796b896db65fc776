use thiserror::Error;

/// Errors that can occur while framing or decoding wire payloads.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("field '{field}' exceeds the 255-byte wire limit ({len} bytes)")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("malformed JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed binary message: {0}")]
    Malformed(&'static str),

    #[error("invalid message id: {0}")]
    InvalidMessageId(String),
}
