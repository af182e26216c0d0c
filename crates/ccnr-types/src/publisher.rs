use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of a content publisher: the BLAKE3 digest of its public key.
///
/// The digest is fixed-length, so two publishers compare equal exactly when
/// they signed with the same key. The repository stores it as a hex string
/// in the `PUBLISHER` property.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublisherKeyId([u8; 32]);

impl PublisherKeyId {
    /// Byte length of a publisher key digest.
    pub const LEN: usize = 32;

    /// Derive the identity from encoded public key bytes.
    pub fn from_key(public_key: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"ccnr-publisher-v1:");
        hasher.update(public_key);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from a pre-computed digest.
    pub fn from_bytes(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        format!("pk:{}", hex::encode(&self.0[..4]))
    }

    /// Parse from a hex string (64 hex characters, optional `pk:` prefix).
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("pk:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for PublisherKeyId {
    type Error = TypeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: Self::LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for PublisherKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublisherKeyId({})", self.short_id())
    }
}

impl fmt::Display for PublisherKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_key_is_deterministic() {
        let a = PublisherKeyId::from_key(b"public key one");
        let b = PublisherKeyId::from_key(b"public key one");
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_produce_different_ids() {
        let a = PublisherKeyId::from_key(b"key-a");
        let b = PublisherKeyId::from_key(b"key-b");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_roundtrip() {
        let id = PublisherKeyId::from_key(b"roundtrip");
        let parsed = PublisherKeyId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn hex_roundtrip_with_prefix() {
        let id = PublisherKeyId::from_key(b"prefixed");
        let parsed = PublisherKeyId::from_hex(&format!("pk:{}", id.to_hex())).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = PublisherKeyId::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 32,
                actual: 2
            }
        );
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(matches!(
            PublisherKeyId::from_hex("zz"),
            Err(TypeError::InvalidHex(_))
        ));
    }

    #[test]
    fn short_id_format() {
        let id = PublisherKeyId::from_bytes([0; 32]);
        assert_eq!(id.short_id(), "pk:00000000");
    }
}
