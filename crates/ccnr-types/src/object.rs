use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::authenticator::Authenticator;
use crate::name::Name;

/// Opaque signature over name, authenticator and content.
///
/// Produced and verified outside the repository. Inside it, a signature is
/// only compared for equality: two writes with the same publisher and the
/// same signature are the same object.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Signature {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(8)];
        write!(f, "Signature({}..; {} bytes)", hex::encode(shown), self.0.len())
    }
}

/// Identity of a stored object without its payload.
///
/// Records for pure path nodes carry only a name; both the authenticator and
/// the signature are `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteName {
    pub name: Name,
    pub authenticator: Option<Authenticator>,
    pub signature: Option<Signature>,
}

impl CompleteName {
    pub fn new(name: Name, authenticator: Authenticator, signature: Signature) -> Self {
        Self {
            name,
            authenticator: Some(authenticator),
            signature: Some(signature),
        }
    }

    /// A bare name record for a node that carries no content.
    pub fn name_only(name: Name) -> Self {
        Self {
            name,
            authenticator: None,
            signature: None,
        }
    }

    /// Returns `true` if this record describes signed content.
    pub fn is_content(&self) -> bool {
        self.signature.is_some()
    }
}

/// A signed, named payload: the unit of storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentObject {
    pub name: Name,
    pub authenticator: Authenticator,
    pub signature: Signature,
    pub content: Bytes,
}

impl ContentObject {
    pub fn new(
        name: Name,
        authenticator: Authenticator,
        signature: Signature,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name,
            authenticator,
            signature,
            content: content.into(),
        }
    }

    /// The identity of this object without the payload.
    pub fn complete_name(&self) -> CompleteName {
        CompleteName::new(
            self.name.clone(),
            self.authenticator.clone(),
            self.signature.clone(),
        )
    }

    /// Returns `true` if the payload hashes to the authenticator's digest.
    pub fn verify_digest(&self) -> bool {
        self.authenticator.matches_content(&self.content)
    }
}
