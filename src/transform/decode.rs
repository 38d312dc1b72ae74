use crate::errors::ArchiverError;
use bytes::Bytes;

/// Strict decode used by push mode: the body must be UTF-8. Trailing
/// whitespace (including the producer's newline) is dropped.
pub fn decode_body(payload: &Bytes) -> Result<String, ArchiverError> {
    std::str::from_utf8(payload)
        .map(|s| s.trim_end().to_owned())
        .map_err(|e| ArchiverError::Decode(e.to_string()))
}

/// Pull mode never rejects a payload; invalid sequences become U+FFFD.
pub fn decode_body_lossy(payload: &Bytes) -> String {
    String::from_utf8_lossy(payload).trim_end().to_owned()
}
