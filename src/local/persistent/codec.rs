//! On-disk encoding for the local key-value file.
//!
//! Layout:
//! ```text
//! [magic: 4 bytes "CRKV"][version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

use crate::local::LocalStoreError;

/// Current file format version.
const FORMAT_VERSION: u8 = 1;

/// Magic bytes identifying a care-relay key-value file.
pub const MAGIC: [u8; 4] = *b"CRKV";

const HEADER_LEN: usize = MAGIC.len() + 1 + 4;

/// Local files only ever hold a handful of short strings.
const MAX_PAYLOAD: usize = 1024 * 1024;

fn corrupted(message: impl Into<String>) -> LocalStoreError {
    LocalStoreError::Corrupted {
        message: message.into(),
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serializes `value` into a complete file image.
///
/// # Errors
/// `Corrupted` if the value cannot be serialized or is too large.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LocalStoreError> {
    let data = serde_json::to_vec(value).map_err(|e| corrupted(format!("serialization failed: {e}")))?;
    if data.len() > MAX_PAYLOAD {
        return Err(corrupted(format!("payload of {} bytes exceeds maximum {MAX_PAYLOAD}", data.len())));
    }
    let len = u32::try_from(data.len()).map_err(|_| corrupted("payload length overflow"))?;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Parses a complete file image, verifying magic, version, length and CRC.
///
/// # Errors
/// `Corrupted` for any framing, checksum or deserialization failure.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LocalStoreError> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(corrupted(format!("file too short ({} bytes)", bytes.len())));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(corrupted(format!("invalid magic bytes: {magic:?}")));
    }
    let (version, rest) = rest.split_at(1);
    if version[0] != FORMAT_VERSION {
        return Err(corrupted(format!(
            "unsupported format version {} (expected {FORMAT_VERSION})",
            version[0]
        )));
    }
    let (len_bytes, rest) = rest.split_at(4);
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(len_bytes);
    let len = usize::try_from(u32::from_le_bytes(len_buf)).map_err(|_| corrupted("length overflow"))?;
    if len > MAX_PAYLOAD {
        return Err(corrupted(format!("payload size {len} exceeds maximum {MAX_PAYLOAD}")));
    }
    if rest.len() != len + 4 {
        return Err(corrupted(format!(
            "length mismatch: header says {len}, file holds {}",
            rest.len().saturating_sub(4)
        )));
    }

    let (data, crc_bytes) = rest.split_at(len);
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(crc_bytes);
    let stored = u32::from_le_bytes(crc_buf);
    let computed = checksum(data);
    if stored != computed {
        return Err(corrupted(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }

    serde_json::from_slice(data).map_err(|e| corrupted(format!("deserialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("patientId".to_string(), "patient-1762505870313".to_string());
        map.insert("patientName".to_string(), "Amina".to_string());
        map
    }

    #[test]
    fn test_decode_reads_encoded_map() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[..4], b"CRKV");
        let back: BTreeMap<String, String> = decode(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_detects_flipped_byte() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[HEADER_LEN + 3] ^= 0xFF;
        let err = decode::<BTreeMap<String, String>>(&bytes).unwrap_err();
        assert!(err.to_string().contains("CRC"), "{err}");
    }

    #[test]
    fn test_rejects_truncation_and_bad_magic() {
        let bytes = encode(&sample()).unwrap();
        assert!(decode::<BTreeMap<String, String>>(&bytes[..bytes.len() - 1]).is_err());

        let mut wrong = bytes;
        wrong[0] = b'X';
        let err = decode::<BTreeMap<String, String>>(&wrong).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_rejects_oversized_length() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&200_000_000u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        let err = decode::<BTreeMap<String, String>>(&bytes).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
