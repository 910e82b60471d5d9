//! Byte-stuffing message framer.
//!
//! Delimits variable-length messages on a reliable byte stream (the BLE
//! GATT characteristic) with a `0x00 0x00` terminator, escaping any `0x00`
//! byte that would otherwise collide with it.

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0x00;
const ESCAPED_ONE: u8 = 0x01;
const TERMINATOR: [u8; 2] = [0x00, 0x00];

/// Encode `message` for the wire: escape `0x00` bytes, then append the
/// `0x00 0x00` terminator.
pub fn encode(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 2);
    let mut prev_was_escape = false;

    for &byte in message {
        if prev_was_escape && (byte == ESCAPED_ZERO || byte == ESCAPED_ONE) {
            out.push(ESCAPED_ONE);
        }
        out.push(byte);
        prev_was_escape = byte == ESCAPE;
    }

    if out.last() == Some(&0x00) {
        out.push(ESCAPED_ONE);
    }
    out.extend_from_slice(&TERMINATOR);
    out
}

/// Decode a framed buffer (including its terminator) back to the original
/// message bytes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame is missing its 0x00 0x00 terminator")]
    MissingTerminator,
}

pub fn decode(framed: &[u8]) -> Result<Vec<u8>, FramingError> {
    if framed.len() < 2 || framed[framed.len() - 2..] != TERMINATOR {
        return Err(FramingError::MissingTerminator);
    }

    let body = &framed[..framed.len() - 2];
    let mut out = Vec::with_capacity(body.len());
    let mut prev_was_escape = false;

    for &byte in body {
        if prev_was_escape && byte == ESCAPED_ONE {
            prev_was_escape = false;
            continue;
        }
        out.push(byte);
        prev_was_escape = byte == ESCAPE;
    }

    Ok(out)
}

/// True once `buf` ends with the frame terminator, i.e. a full message has
/// been accumulated and is ready to decode.
pub fn message_complete(buf: &[u8]) -> bool {
    buf.len() >= 2 && buf[buf.len() - 2..] == TERMINATOR
}
