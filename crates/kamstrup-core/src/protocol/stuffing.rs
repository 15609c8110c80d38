//! Byte-stuffing
//!
//! Reserved bytes inside a frame are sent as the escape marker followed by
//! the byte XOR 0xff, so they can never be mistaken for frame delimiters.

use super::{ProtocolError, ESCAPE_MARKER};

/// Bytes that must never appear unescaped between prefix and terminator
pub const ESCAPED_BYTES: [u8; 5] = [0x06, 0x0d, 0x1b, 0x40, 0x80];

/// Whether `byte` belongs to the reserved set
pub fn needs_escape(byte: u8) -> bool {
    ESCAPED_BYTES.contains(&byte)
}

/// Escape every reserved byte in `msg`
pub fn stuff(msg: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + 4);
    for &b in msg {
        if needs_escape(b) {
            out.push(ESCAPE_MARKER);
            out.push(b ^ 0xff);
        } else {
            out.push(b);
        }
    }
    out
}

/// Reverse [`stuff`]
///
/// An escape marker with nothing after it is reported as a malformed response.
pub fn unstuff(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter();

    while let Some(&b) = bytes.next() {
        if b == ESCAPE_MARKER {
            match bytes.next() {
                Some(&escaped) => out.push(escaped ^ 0xff),
                None => return Err(ProtocolError::MalformedResponse { message: out }),
            }
        } else {
            out.push(b);
        }
    }

    Ok(out)
}
