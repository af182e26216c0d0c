//! Name codec: binary name components to store path segments and back.
//!
//! A component is rendered as readable text when every byte is printable
//! ASCII and the text cannot be mistaken for one of the codec's own markers.
//! Readable segments get these fixups, in order:
//!
//! 1. a leading digit is prefixed with [`NUMBER_MARKER`] (query name tests
//!    may not start with a digit)
//! 2. otherwise a leading `.` is prefixed with [`DOT_MARKER`] (dot names are
//!    store-internal)
//! 3. store-reserved characters, space, `=` and `+` become `_XHHHH_` escape
//!    tokens, so `/`, `=` and `+` always map to [`SLASH_TOKEN`],
//!    [`EQUALS_TOKEN`] and [`PLUS_TOKEN`]
//!
//! Every other component (non-printable bytes, the empty component, text
//! containing `_X` or starting with `_j`) is written as [`BINARY_MARKER`]
//! followed by standard padded base64 with `/`, `=` and `+` replaced by the
//! same three tokens.
//!
//! Decoding first drops a trailing `[n]` sibling index. `[` and `]` are
//! always escaped on the way in, so a bracket suffix can only come from the
//! store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ccnr_store::path::{split_index, ILLEGAL_NAME_CHARS, ILLEGAL_QUERY_CHARS};
use ccnr_types::Name;

use crate::error::CodecError;

pub const BINARY_MARKER: &str = "_jb_";
pub const NUMBER_MARKER: &str = "_jn_";
pub const DOT_MARKER: &str = "_jd_";

pub const SLASH_TOKEN: &str = "_X002F_";
pub const EQUALS_TOKEN: &str = "_X003D_";
pub const PLUS_TOKEN: &str = "_X002B_";

const ESCAPE_PREFIX: &str = "_X";
const MARKER_PREFIX: &str = "_j";
const ESCAPE_LEN: usize = 7;

fn needs_escape(ch: char) -> bool {
    ch == ' ' || ILLEGAL_NAME_CHARS.contains(&ch) || ILLEGAL_QUERY_CHARS.contains(&ch)
}

fn is_readable(component: &[u8]) -> bool {
    !component.is_empty()
        && component.iter().all(|b| (0x20..=0x7e).contains(b))
        && !component.starts_with(MARKER_PREFIX.as_bytes())
        && !component
            .windows(ESCAPE_PREFIX.len())
            .any(|w| w == ESCAPE_PREFIX.as_bytes())
}

/// Encode one name component as a store path segment.
///
/// The result is always a valid, non-empty node name and a valid query name
/// test.
pub fn encode_component(component: &[u8]) -> String {
    if !is_readable(component) {
        return encode_binary(component);
    }

    // Readable components are ASCII by construction.
    let text: String = component.iter().map(|&b| b as char).collect();
    let mut out = String::with_capacity(text.len() + NUMBER_MARKER.len());
    if text.starts_with(|c: char| c.is_ascii_digit()) {
        out.push_str(NUMBER_MARKER);
    } else if text.starts_with('.') {
        out.push_str(DOT_MARKER);
    }
    for ch in text.chars() {
        if needs_escape(ch) {
            out.push_str(&format!("{ESCAPE_PREFIX}{:04X}_", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}

fn encode_binary(component: &[u8]) -> String {
    let encoded = STANDARD
        .encode(component)
        .replace('/', SLASH_TOKEN)
        .replace('=', EQUALS_TOKEN)
        .replace('+', PLUS_TOKEN);
    format!("{BINARY_MARKER}{encoded}")
}

/// Decode a store path segment back into the name component it encodes.
pub fn decode_component(segment: &str) -> Result<Vec<u8>, CodecError> {
    let (segment, _) = split_index(segment);

    if let Some(encoded) = segment.strip_prefix(BINARY_MARKER) {
        let base64 = encoded
            .replace(SLASH_TOKEN, "/")
            .replace(EQUALS_TOKEN, "=")
            .replace(PLUS_TOKEN, "+");
        return STANDARD
            .decode(base64)
            .map_err(|e| CodecError::InvalidBase64 {
                segment: segment.to_string(),
                reason: e.to_string(),
            });
    }

    let text = unescape(segment)?;
    let text = text
        .strip_prefix(NUMBER_MARKER.as_bytes())
        .or_else(|| text.strip_prefix(DOT_MARKER.as_bytes()))
        .unwrap_or(&text[..]);
    Ok(text.to_vec())
}

fn unescape(segment: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(ESCAPE_PREFIX.as_bytes()) {
            let invalid = || CodecError::InvalidEscape {
                segment: segment.to_string(),
                offset: i,
            };
            let token = bytes.get(i..i + ESCAPE_LEN).ok_or_else(invalid)?;
            if token[ESCAPE_LEN - 1] != b'_' {
                return Err(invalid());
            }
            let code = std::str::from_utf8(&token[2..6])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .filter(u8::is_ascii)
                .ok_or_else(invalid)?;
            out.push(code);
            i += ESCAPE_LEN;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Store path for a name: `/`-joined encoded components.
///
/// Empty components are skipped and a trailing legacy recursive marker is
/// dropped. The root name maps to `/`.
pub fn name_to_path(name: &Name) -> String {
    let name = name.without_recursive_marker();
    let segments: Vec<String> = name
        .components()
        .filter(|c| !c.is_empty())
        .map(encode_component)
        .collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Reconstruct a name from a store path, dropping sibling indices.
pub fn parse_path(path: &str) -> Result<Name, CodecError> {
    let body = path
        .strip_prefix('/')
        .ok_or_else(|| CodecError::RelativePath(path.to_string()))?;
    let components = body
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode_component)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Name::new(components))
}
