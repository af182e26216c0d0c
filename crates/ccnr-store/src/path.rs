//! Node-name and path grammar.
//!
//! Valid node names:
//! - Must be non-empty
//! - Must consist of printable, non-space ASCII
//! - Must not contain `/`, `:`, `[`, `]`, `*`, `|`, `'`, `"`
//! - Must not start with `.` (reserved for store-internal names)
//!
//! Query name tests are stricter: on top of the node-name rules they must not
//! start with a digit and must not contain `=` or `+`.
//!
//! Paths are `/` followed by `/`-separated segments. A segment is a node
//! name optionally followed by a 1-based sibling index, e.g. `/a/b[2]/c`.

use crate::error::{StoreError, StoreResult};

/// Characters that are forbidden anywhere in a node name.
pub const ILLEGAL_NAME_CHARS: &[char] = &['/', ':', '[', ']', '*', '|', '\'', '"'];

/// Characters the query grammar forbids in a name test on top of
/// [`ILLEGAL_NAME_CHARS`].
pub const ILLEGAL_QUERY_CHARS: &[char] = &['=', '+'];

/// Validate a node name for [`add_child`](crate::StoreSession::add_child).
pub fn validate_node_name(name: &str) -> StoreResult<()> {
    let reject = |reason: String| {
        Err(StoreError::ConstraintViolation(format!(
            "invalid node name {name:?}: {reason}"
        )))
    };

    if name.is_empty() {
        return reject("must not be empty".into());
    }
    if name.starts_with('.') {
        return reject("must not start with '.'".into());
    }
    for ch in name.chars() {
        if !ch.is_ascii_graphic() {
            return reject(format!("contains non-printable character {ch:?}"));
        }
        if ILLEGAL_NAME_CHARS.contains(&ch) {
            return reject(format!("contains forbidden character {ch:?}"));
        }
    }
    Ok(())
}

/// Validate a name test inside a query statement.
pub fn validate_query_name(name: &str) -> Result<(), String> {
    validate_node_name(name).map_err(|e| e.to_string())?;
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(format!("name test {name:?} must not start with a digit"));
    }
    if let Some(ch) = name.chars().find(|c| ILLEGAL_QUERY_CHARS.contains(c)) {
        return Err(format!("name test {name:?} contains {ch:?}"));
    }
    Ok(())
}

/// Split a path segment into its name and optional sibling index.
///
/// `"c[2]"` yields `("c", Some(2))`; `"c"` yields `("c", None)`. A bracket
/// suffix that is not a positive integer is left in the name.
pub fn split_index(segment: &str) -> (&str, Option<usize>) {
    if let Some(body) = segment.strip_suffix(']') {
        if let Some(open) = body.rfind('[') {
            let digits = &body[open + 1..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(index) = digits.parse::<usize>() {
                    if index > 0 {
                        return (&body[..open], Some(index));
                    }
                }
            }
        }
    }
    (segment, None)
}

/// Split an absolute path into its segments. The root path yields none.
pub fn segments(path: &str) -> StoreResult<Vec<&str>> {
    let body = path
        .strip_prefix('/')
        .ok_or_else(|| StoreError::ConstraintViolation(format!("path {path:?} is not absolute")))?;
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = body.split('/').collect();
    for part in &parts {
        let (name, _) = split_index(part);
        validate_node_name(name)?;
    }
    Ok(parts)
}

/// Validate an absolute path.
pub fn validate_path(path: &str) -> StoreResult<()> {
    segments(path).map(|_| ())
}

/// The path with every sibling index removed.
pub fn normalize(path: &str) -> String {
    if path == "/" {
        return path.to_string();
    }
    path.split('/')
        .map(|seg| split_index(seg).0)
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a child segment onto a parent path.
pub fn join(parent: &str, segment: &str) -> String {
    if parent == "/" {
        format!("/{segment}")
    } else {
        format!("{parent}/{segment}")
    }
}

/// The parent of an absolute path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Returns `true` if `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || path
            .strip_prefix(ancestor)
            .map_or(false, |rest| rest.starts_with('/'))
}
