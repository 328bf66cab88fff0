//! Gzip helpers for journal payloads.
//!
//! Message bodies, reasoning text and stored tool results are compressed at
//! rest; everything else in the journal stays as plain columns.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use super::error::{SessionError, SessionResult};

/// Compress a UTF-8 string into a gzip blob.
pub fn compress_str(text: &str) -> SessionResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| SessionError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| SessionError::Compression(e.to_string()))
}

/// Decompress a gzip blob back into a UTF-8 string.
pub fn decompress_str(blob: &[u8]) -> SessionResult<String> {
    let mut decoder = GzDecoder::new(blob);
    let mut out = String::new();
    decoder
        .read_to_string(&mut out)
        .map_err(|e| SessionError::Compression(e.to_string()))?;
    Ok(out)
}

/// Compress a serializable value as gzip-wrapped JSON.
pub fn compress_json<T: serde::Serialize>(value: &T) -> SessionResult<Vec<u8>> {
    let json = serde_json::to_string(value)?;
    compress_str(&json)
}

/// Decompress a gzip blob and deserialize it from JSON.
pub fn decompress_json<T: serde::de::DeserializeOwned>(blob: &[u8]) -> SessionResult<T> {
    let json = decompress_str(blob)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_utf8_text() {
        let text = "hello → мир → 世界\nsecond line";
        let blob = compress_str(text).unwrap();
        assert_eq!(decompress_str(&blob).unwrap(), text);
    }

    #[test]
    fn round_trips_json_values() {
        let value = serde_json::json!({"a": [1, 2, 3], "b": {"nested": true}});
        let blob = compress_json(&value).unwrap();
        let back: serde_json::Value = decompress_json(&blob).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn rejects_garbage_blobs() {
        assert!(decompress_str(b"not gzip at all").is_err());
    }
}
