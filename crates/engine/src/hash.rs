//! Content hashing
//!
//! Entry states identify contents by SHA-256. The serialized form is a
//! lowercase hex string, so comparisons against persisted state never
//! depend on a binary encoding.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data`
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Bytes that serialize as a lowercase hex string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    /// Wrap raw bytes
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        HexBytes(bytes)
    }

    /// The raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for HexBytes {
    fn from(digest: [u8; 32]) -> Self {
        HexBytes(digest.to_vec())
    }
}

impl std::fmt::Display for HexBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Serialize for HexBytes {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(HexBytes)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        // sha256("") is a well-known constant.
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_distinguishes_contents() {
        assert_ne!(sha256(b"a"), sha256(b"b"));
    }

    #[test]
    fn test_hexbytes_serde_roundtrip() {
        let hb = HexBytes::from(sha256(b"content"));
        let json = serde_json::to_string(&hb).unwrap();
        assert!(json.starts_with('"') && json.len() == 66);
        let back: HexBytes = serde_json::from_str(&json).unwrap();
        assert_eq!(hb, back);
    }

    #[test]
    fn test_hexbytes_rejects_invalid_hex() {
        let result: std::result::Result<HexBytes, _> = serde_json::from_str("\"zz\"");
        assert!(result.is_err());
    }
}
