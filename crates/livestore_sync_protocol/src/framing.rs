//! Newline-delimited JSON framing.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum accepted line length in bytes, excluding the newline.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Encodes a message as one JSON line, terminated by `\n`.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized or is too long.
pub fn encode_line<T: Serialize>(message: &T) -> ProtocolResult<String> {
    let mut line = serde_json::to_string(message)?;
    if line.len() > MAX_LINE_LEN {
        return Err(ProtocolError::LineTooLong {
            len: line.len(),
            max: MAX_LINE_LEN,
        });
    }
    line.push('\n');
    Ok(line)
}

/// Decodes one line (with or without its trailing newline).
///
/// # Errors
///
/// Returns an error if the line is empty, too long, or not valid JSON for `T`.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> ProtocolResult<T> {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.len() > MAX_LINE_LEN {
        return Err(ProtocolError::LineTooLong {
            len: trimmed.len(),
            max: MAX_LINE_LEN,
        });
    }
    if trimmed.trim().is_empty() {
        return Err(ProtocolError::EmptyLine);
    }
    Ok(serde_json::from_str(trimmed)?)
}
