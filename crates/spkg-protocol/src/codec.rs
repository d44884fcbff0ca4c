//! Newline-delimited JSON framing.
//!
//! Each message is one JSON object on one line. Reads are bounded so a
//! peer that never sends a newline cannot grow the buffer without limit.

use std::io::{BufRead, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ProtocolError;

/// Upper bound for a single encoded message, newline included.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Encode `message` as one line and flush it.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<(), ProtocolError> {
    let json = serde_json::to_string(message)?;
    writeln!(writer, "{}", json)?;
    writer.flush()?;
    Ok(())
}

/// Read the next message. Blank lines between messages are skipped.
///
/// Returns [`ProtocolError::Closed`] on a clean end of stream.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<T, ProtocolError> {
    loop {
        let mut line = String::new();
        let read = reader
            .by_ref()
            .take(MAX_MESSAGE_BYTES as u64)
            .read_line(&mut line)?;

        if read == 0 {
            return Err(ProtocolError::Closed);
        }
        if read >= MAX_MESSAGE_BYTES && !line.ends_with('\n') {
            return Err(ProtocolError::TooLarge { max: MAX_MESSAGE_BYTES });
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(serde_json::from_str(trimmed)?);
    }
}
