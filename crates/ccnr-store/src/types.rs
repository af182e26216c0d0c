use std::fmt;
use std::io::Read;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque handle to a node inside one store.
///
/// Handles stay valid until the node is removed; after that every operation
/// on the handle fails with [`StoreError::StaleNode`](crate::StoreError::StaleNode).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Identity of an authenticated session against the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Structural type of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Accepts any children and any properties.
    Unstructured,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstructured => "nt:unstructured",
        }
    }
}

/// Capability flags a node may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mixin {
    /// The node takes part in checkout/checkin versioning.
    Versionable,
    /// The node has a stable identity that references can point at.
    Referenceable,
}

impl Mixin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Versionable => "mix:versionable",
            Self::Referenceable => "mix:referenceable",
        }
    }
}

/// A typed property value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Binary(Bytes),
}

impl PropertyValue {
    /// Value type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Long(_) => "Long",
            Self::Binary(_) => "Binary",
        }
    }

    /// The value rendered as a string, the way a store coerces on read.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Long(n) => Some(n.to_string()),
            Self::Binary(_) => None,
        }
    }
}

/// A binary property delivered as a stream of declared length.
///
/// Backends may deliver fewer bytes than declared (for instance over a
/// flaky transport). Readers must treat that as a failed read, never as the
/// value.
pub struct BinaryStream {
    pub length: u64,
    pub reader: Box<dyn Read + Send>,
}

impl BinaryStream {
    pub fn new(length: u64, reader: Box<dyn Read + Send>) -> Self {
        Self { length, reader }
    }
}

impl fmt::Debug for BinaryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
