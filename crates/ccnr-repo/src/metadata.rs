//! Node metadata mapper.
//!
//! Maps a content object onto the fixed property layout of a store node and
//! back. The property names are part of the persisted format and must not
//! change.

use std::io::{self, Read};

use bytes::Bytes;
use ccnr_store::{NodeId, PropertyValue, StoreError, StoreSession};
use ccnr_types::authenticator::{format_timestamp, parse_timestamp};
use ccnr_types::{
    Authenticator, CompleteName, ContentObject, ContentType, KeyLocator, Name, PublisherKeyId,
    Signature,
};
use tracing::{debug, warn};

use crate::codec::parse_path;
use crate::error::{RepoError, RepoResult};

pub const CONTENT: &str = "CONTENT";
pub const PUBLISHER: &str = "PUBLISHER";
pub const NAME_COMPONENT_COUNT: &str = "NAME_COMPONENT_COUNT";
pub const TIMESTAMP: &str = "TIMESTAMP";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const CONTENT_HASH_ELEMENT: &str = "CONTENT_HASH_ELEMENT";
pub const KEY_LOCATOR: &str = "KEY_LOCATOR";
pub const SIGNATURE: &str = "SIGNATURE";

fn metadata_error(session: &dyn StoreSession, node: NodeId, reason: impl Into<String>) -> RepoError {
    RepoError::Metadata {
        path: session
            .node_path(node)
            .unwrap_or_else(|_| format!("{node:?}")),
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write payload, authenticator fields and signature onto `node`.
///
/// SIGNATURE is written last: its presence is what marks a finished content
/// node.
pub fn write_metadata(
    session: &dyn StoreSession,
    node: NodeId,
    authenticator: &Authenticator,
    signature: &Signature,
    content: &[u8],
) -> RepoResult<()> {
    session.set_property(node, CONTENT, PropertyValue::Binary(Bytes::copy_from_slice(content)))?;
    write_authenticator(session, node, authenticator)?;
    session.set_property(
        node,
        SIGNATURE,
        PropertyValue::Binary(Bytes::copy_from_slice(signature.as_bytes())),
    )?;
    Ok(())
}

fn write_authenticator(
    session: &dyn StoreSession,
    node: NodeId,
    authenticator: &Authenticator,
) -> RepoResult<()> {
    session.set_property(
        node,
        PUBLISHER,
        PropertyValue::String(authenticator.publisher.to_hex()),
    )?;
    if let Some(count) = authenticator.name_component_count {
        session.set_property(node, NAME_COMPONENT_COUNT, PropertyValue::Long(i64::from(count)))?;
    }
    session.set_property(
        node,
        TIMESTAMP,
        PropertyValue::String(format_timestamp(&authenticator.timestamp)),
    )?;
    session.set_property(
        node,
        CONTENT_TYPE,
        PropertyValue::String(authenticator.content_type.as_str().to_string()),
    )?;

    let locator = authenticator
        .key_locator
        .encode()
        .map_err(|e| metadata_error(session, node, format!("cannot encode key locator: {e}")))?;
    session.set_property(node, KEY_LOCATOR, PropertyValue::Binary(Bytes::from(locator)))?;
    session.set_property(
        node,
        CONTENT_HASH_ELEMENT,
        PropertyValue::Binary(Bytes::copy_from_slice(&authenticator.content_digest)),
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Returns `true` if the node carries a SIGNATURE.
pub fn is_content_node(session: &dyn StoreSession, node: NodeId) -> RepoResult<bool> {
    Ok(session.has_property(node, SIGNATURE)?)
}

/// Read a binary property in full.
///
/// A stream that yields fewer bytes than it declares is re-opened, up to
/// `attempts` reads in total. Data is never returned truncated.
pub fn read_binary(
    session: &dyn StoreSession,
    node: NodeId,
    property: &str,
    attempts: u32,
) -> RepoResult<Bytes> {
    let attempts = attempts.max(1);
    let mut last_len = 0;
    let mut declared = 0u64;
    for attempt in 1..=attempts {
        let stream = session.binary_property(node, property)?;
        declared = stream.length;
        let mut buf = Vec::with_capacity(initial_capacity(declared));
        stream
            .reader
            .take(declared)
            .read_to_end(&mut buf)
            .map_err(StoreError::from)?;
        if buf.len() as u64 == declared {
            return Ok(Bytes::from(buf));
        }
        last_len = buf.len();
        warn!(
            property,
            attempt,
            declared,
            received = last_len,
            "short read on binary property"
        );
    }

    Err(StoreError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "{property}: received {last_len} of {declared} bytes after {attempts} attempts"
        ),
    ))
    .into())
}

/// Buffer size to start a binary read with. The declared length is not
/// trusted beyond this; the buffer grows as data arrives.
fn initial_capacity(declared: u64) -> usize {
    const MAX_PREALLOC: u64 = 64 * 1024;
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}

fn read_string(session: &dyn StoreSession, node: NodeId, property: &str) -> RepoResult<Option<String>> {
    match session.property(node, property)? {
        None => Ok(None),
        Some(value) => value.as_string().map(Some).ok_or_else(|| {
            metadata_error(
                session,
                node,
                format!("{property} holds a {} value", value.type_name()),
            )
        }),
    }
}

/// Publisher of a node, or `None` if it has no PUBLISHER property.
pub fn read_publisher(session: &dyn StoreSession, node: NodeId) -> RepoResult<Option<PublisherKeyId>> {
    match read_string(session, node, PUBLISHER)? {
        None => Ok(None),
        Some(hex) => PublisherKeyId::from_hex(&hex)
            .map(Some)
            .map_err(|e| metadata_error(session, node, format!("bad {PUBLISHER}: {e}"))),
    }
}

/// Signature of a node, or `None` for path nodes.
pub fn read_signature(
    session: &dyn StoreSession,
    node: NodeId,
    attempts: u32,
) -> RepoResult<Option<Signature>> {
    if !is_content_node(session, node)? {
        return Ok(None);
    }
    let bytes = read_binary(session, node, SIGNATURE, attempts)?;
    Ok(Some(Signature::new(bytes.to_vec())))
}

/// Reconstruct the authenticator stored on a content node.
pub fn read_authenticator(
    session: &dyn StoreSession,
    node: NodeId,
    attempts: u32,
) -> RepoResult<Authenticator> {
    let publisher = read_publisher(session, node)?
        .ok_or_else(|| metadata_error(session, node, format!("missing {PUBLISHER}")))?;

    let name_component_count = match read_string(session, node, NAME_COMPONENT_COUNT)? {
        None => None,
        Some(s) => Some(s.parse::<u32>().map_err(|e| {
            metadata_error(session, node, format!("bad {NAME_COMPONENT_COUNT} {s:?}: {e}"))
        })?),
    };

    let timestamp = read_string(session, node, TIMESTAMP)?
        .ok_or_else(|| metadata_error(session, node, format!("missing {TIMESTAMP}")))
        .and_then(|s| {
            parse_timestamp(&s).map_err(|e| metadata_error(session, node, e.to_string()))
        })?;

    let content_type = read_string(session, node, CONTENT_TYPE)?
        .ok_or_else(|| metadata_error(session, node, format!("missing {CONTENT_TYPE}")))
        .and_then(|s| {
            s.parse::<ContentType>()
                .map_err(|e| metadata_error(session, node, e.to_string()))
        })?;

    let key_locator = KeyLocator::decode(&read_binary(session, node, KEY_LOCATOR, attempts)?)
        .map_err(|e| metadata_error(session, node, format!("bad {KEY_LOCATOR}: {e}")))?;

    let content_digest = read_binary(session, node, CONTENT_HASH_ELEMENT, attempts)?.to_vec();

    Ok(Authenticator::new(
        publisher,
        name_component_count,
        timestamp,
        content_type,
        key_locator,
        content_digest,
    ))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The name a node stands for, derived from its store path.
pub fn read_name(session: &dyn StoreSession, node: NodeId) -> RepoResult<Name> {
    Ok(parse_path(&session.node_path(node)?)?)
}

/// Identity record of a node: full for content nodes, name-only otherwise.
pub fn read_complete_name(
    session: &dyn StoreSession,
    node: NodeId,
    attempts: u32,
) -> RepoResult<CompleteName> {
    let name = read_name(session, node)?;
    match read_signature(session, node, attempts)? {
        Some(signature) => {
            let authenticator = read_authenticator(session, node, attempts)?;
            Ok(CompleteName::new(name, authenticator, signature))
        }
        None => Ok(CompleteName::name_only(name)),
    }
}

/// The stored object of a content node, or `None` for a path node.
pub fn read_content_object(
    session: &dyn StoreSession,
    node: NodeId,
    attempts: u32,
) -> RepoResult<Option<ContentObject>> {
    let Some(signature) = read_signature(session, node, attempts)? else {
        return Ok(None);
    };
    let name = read_name(session, node)?;
    let authenticator = read_authenticator(session, node, attempts)?;
    let content = read_binary(session, node, CONTENT, attempts)?;
    debug!(name = %name, bytes = content.len(), "read content object");
    Ok(Some(ContentObject::new(name, authenticator, signature, content)))
}
