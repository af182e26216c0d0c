//! Hierarchical binary names.
//!
//! A [`Name`] is an ordered list of opaque byte strings. Components may hold
//! any bytes, including `/` and NUL, and may be empty. The textual form used
//! for display and for [`Name::parse`] is URI-like: components joined by `/`,
//! with every byte outside `[A-Za-z0-9-._~]` written as `%XX`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Ordered sequence of opaque byte-string components.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    components: Vec<Vec<u8>>,
}

impl Name {
    /// Component separator in the textual form.
    pub const SEPARATOR: char = '/';

    /// Legacy trailing component that once marked a recursive query.
    pub const RECURSIVE_MARKER: &'static [u8] = b"*";

    /// The root name (no components).
    pub const fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Build a name from owned components.
    pub fn new(components: Vec<Vec<u8>>) -> Self {
        Self { components }
    }

    /// Build a name from anything that yields byte slices.
    pub fn from_components<I, C>(components: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            components: components
                .into_iter()
                .map(|c| c.as_ref().to_vec())
                .collect(),
        }
    }

    /// Parse the textual form, e.g. `/parc/videos/%00%01`.
    ///
    /// A leading `/` is optional. A single trailing `/` is ignored, but
    /// interior `//` produces an empty component.
    pub fn parse(uri: &str) -> Result<Self, TypeError> {
        let body = uri.strip_prefix(Self::SEPARATOR).unwrap_or(uri);
        let body = body.strip_suffix(Self::SEPARATOR).unwrap_or(body);
        if body.is_empty() {
            return Ok(Self::root());
        }
        let components = body
            .split(Self::SEPARATOR)
            .map(|part| unescape_component(uri, part))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { components })
    }

    /// Number of components.
    pub fn count(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` if this is the root name.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// The component at `index`.
    pub fn component(&self, index: usize) -> Option<&[u8]> {
        self.components.get(index).map(Vec::as_slice)
    }

    /// Iterate over the components in order.
    pub fn components(&self) -> impl Iterator<Item = &[u8]> {
        self.components.iter().map(Vec::as_slice)
    }

    /// The last component.
    pub fn last(&self) -> Option<&[u8]> {
        self.components.last().map(Vec::as_slice)
    }

    /// A new name with `component` appended.
    pub fn append(&self, component: impl AsRef<[u8]>) -> Self {
        let mut components = self.components.clone();
        components.push(component.as_ref().to_vec());
        Self { components }
    }

    /// The name without its last component. The root is its own parent.
    pub fn parent(&self) -> Self {
        let mut components = self.components.clone();
        components.pop();
        Self { components }
    }

    /// Returns `true` if the last component is the legacy recursive marker.
    pub fn has_recursive_marker(&self) -> bool {
        self.last() == Some(Self::RECURSIVE_MARKER)
    }

    /// The name with a trailing legacy recursive marker removed, if any.
    pub fn without_recursive_marker(&self) -> Self {
        if self.has_recursive_marker() {
            self.parent()
        } else {
            self.clone()
        }
    }

    /// The name with empty components dropped.
    ///
    /// Empty components never reach the store, so this is the form a name
    /// has after a round trip through a store path.
    pub fn without_empty_components(&self) -> Self {
        Self {
            components: self
                .components
                .iter()
                .filter(|c| !c.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// Returns `true` if every component of `self` leads `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.count() <= other.count()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "{}", Self::SEPARATOR);
        }
        for component in &self.components {
            write!(f, "{}", Self::SEPARATOR)?;
            for &byte in component {
                if is_unreserved(byte) {
                    write!(f, "{}", byte as char)?;
                } else {
                    write!(f, "%{byte:02X}")?;
                }
            }
        }
        Ok(())
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn unescape_component(uri: &str, part: &str) -> Result<Vec<u8>, TypeError> {
    let bytes = part.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex_pair = bytes.get(i + 1..i + 3).ok_or_else(|| TypeError::InvalidName {
                uri: uri.to_string(),
                reason: "truncated percent escape".into(),
            })?;
            let decoded = hex::decode(hex_pair).map_err(|e| TypeError::InvalidName {
                uri: uri.to_string(),
                reason: format!("bad percent escape: {e}"),
            })?;
            out.extend_from_slice(&decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}
