//! Line-delimited JSON framing.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ProtoError;

/// Encodes `record` as one frame terminated by `\n`.
pub fn encode_frame<T: Serialize>(record: &T) -> Result<Vec<u8>, ProtoError> {
    let mut frame = serde_json::to_vec(record).map_err(ProtoError::Encode)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Decodes one frame. Trailing whitespace, including the terminator, is ignored.
pub fn decode_frame<T: DeserializeOwned>(line: &[u8]) -> Result<T, ProtoError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Err(ProtoError::EmptyFrame);
    }
    serde_json::from_slice(trimmed).map_err(ProtoError::Decode)
}
