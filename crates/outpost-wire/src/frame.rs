//! Length-prefixed framing shared by every link in the cluster.

use std::io::{self, Read, Write};

/// Size in bytes of the length prefix that precedes every payload.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Writes a single frame: a 4-byte big-endian length prefix followed by
/// `payload`.
///
/// # Errors
///
/// Returns an I/O error if the underlying writer fails. Short writes are
/// retried internally by `write_all`.
pub fn encode_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "frame payload exceeds u32::MAX")
    })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

/// Reads a single frame from `reader`, blocking until the full payload has
/// arrived.
///
/// A short read on either the length prefix or the payload — including a
/// clean EOF mid-frame — is reported as
/// [`io::ErrorKind::UnexpectedEof`], treating short reads as transport
/// errors rather than as valid end-of-stream. A clean EOF *before*
/// any bytes of the length prefix have arrived is reported the same way;
/// callers that need to distinguish "no more frames, ever" from
/// "connection died mid-frame" should track that at a higher level (the
/// connection is gone either way).
pub fn decode_frame<R: Read>(reader: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds maximum of {max_len}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &5u32.to_be_bytes());

        let mut cursor = io::Cursor::new(buf);
        let payload = decode_frame(&mut cursor, 1 << 20).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut buf = Vec::new();
        encode_frame(&mut buf, &vec![0u8; 100]).unwrap();
        let mut cursor = io::Cursor::new(buf);
        let err = decode_frame(&mut cursor, 10).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut cursor = io::Cursor::new(vec![0u8, 0, 0, 5, b'h', b'i']);
        let err = decode_frame(&mut cursor, 1 << 20).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
