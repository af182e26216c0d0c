//! Query translation from names to store statements.

use ccnr_store::query::{DEEP_SUFFIX, ROOT_STEP};
use ccnr_types::{Interest, Name};

use crate::codec::name_to_path;

/// Build the XPath statement selecting `name`, and everything below it when
/// `recursive` is set.
///
/// Only the name is encoded. Publisher, type and signature filtering happen
/// after execution.
pub fn build_query(name: &Name, recursive: bool) -> String {
    let path = name_to_path(name);
    let mut statement = String::from(ROOT_STEP);
    if path != "/" {
        statement.push_str(&path);
    }
    if recursive {
        statement.push_str(DEEP_SUFFIX);
    }
    statement
}

/// Statement for an interest, honouring its recursion flag.
pub fn interest_query(interest: &Interest) -> String {
    build_query(&interest.name, interest.recursive)
}
