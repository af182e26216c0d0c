use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::name::Name;
use crate::publisher::PublisherKeyId;

/// Kind of payload a content object carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Fragment,
    Link,
    Collection,
    Leaf,
    Session,
    Header,
    Key,
}

impl ContentType {
    /// Every content type, in canonical order.
    pub const ALL: [ContentType; 7] = [
        Self::Fragment,
        Self::Link,
        Self::Collection,
        Self::Leaf,
        Self::Session,
        Self::Header,
        Self::Key,
    ];

    /// Canonical name, as persisted in the `CONTENT_TYPE` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fragment => "FRAGMENT",
            Self::Link => "LINK",
            Self::Collection => "COLLECTION",
            Self::Leaf => "LEAF",
            Self::Session => "SESSION",
            Self::Header => "HEADER",
            Self::Key => "KEY",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnknownContentType(s.to_string()))
    }
}

/// Where a verifier can find the key that signed an object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyLocator {
    /// The encoded public key itself.
    Key(Vec<u8>),
    /// An encoded certificate carrying the key.
    Certificate(Vec<u8>),
    /// The name under which the key is published, optionally pinned to a
    /// publisher.
    KeyName {
        name: Name,
        publisher: Option<PublisherKeyId>,
    },
}

impl KeyLocator {
    /// Encode to the opaque byte form stored in `KEY_LOCATOR`.
    pub fn encode(&self) -> Result<Vec<u8>, TypeError> {
        bincode::serialize(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode from the opaque byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, TypeError> {
        bincode::deserialize(bytes).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

/// Signed metadata that travels with every content object.
///
/// The content digest must equal [`Authenticator::digest`] of the stored
/// payload. The repository does not check this; signers and verifiers
/// upstream do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticator {
    pub publisher: PublisherKeyId,
    /// Number of name components covered by the signature, if restricted.
    pub name_component_count: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub content_type: ContentType,
    pub key_locator: KeyLocator,
    pub content_digest: Vec<u8>,
}

impl Authenticator {
    pub fn new(
        publisher: PublisherKeyId,
        name_component_count: Option<u32>,
        timestamp: DateTime<Utc>,
        content_type: ContentType,
        key_locator: KeyLocator,
        content_digest: Vec<u8>,
    ) -> Self {
        Self {
            publisher,
            name_component_count,
            timestamp,
            content_type,
            key_locator,
            content_digest,
        }
    }

    /// Authenticator for `content` stamped with the current time.
    pub fn for_content(
        publisher: PublisherKeyId,
        content_type: ContentType,
        key_locator: KeyLocator,
        content: &[u8],
    ) -> Self {
        Self::new(
            publisher,
            None,
            Utc::now(),
            content_type,
            key_locator,
            Self::digest(content),
        )
    }

    /// Content digest of a payload.
    pub fn digest(content: &[u8]) -> Vec<u8> {
        blake3::hash(content).as_bytes().to_vec()
    }

    /// Returns `true` if `content` hashes to this authenticator's digest.
    pub fn matches_content(&self, content: &[u8]) -> bool {
        self.content_digest == Self::digest(content)
    }

    /// Canonical string form of the timestamp (RFC 3339, nanoseconds, UTC).
    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }
}

/// Render a timestamp in the canonical persisted form.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp from the canonical persisted form.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TypeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TypeError::InvalidTimestamp(format!("{s:?}: {e}")))
}
