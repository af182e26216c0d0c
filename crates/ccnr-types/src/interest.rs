use serde::{Deserialize, Serialize};

use crate::name::Name;
use crate::object::CompleteName;
use crate::publisher::PublisherKeyId;

/// A standing request for content under a name prefix.
///
/// `recursive` widens the scope from the named node itself to everything
/// below it. A trailing legacy `*` component in the name is tolerated and
/// ignored. The publisher filter is applied by the repository after the
/// store has matched by path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub recursive: bool,
    pub publisher: Option<PublisherKeyId>,
}

impl Interest {
    /// Interest in exactly `name`.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            recursive: false,
            publisher: None,
        }
    }

    /// Interest in `name` and everything below it.
    pub fn recursive(name: Name) -> Self {
        Self {
            name,
            recursive: true,
            publisher: None,
        }
    }

    /// Restrict matches to one publisher.
    pub fn with_publisher(mut self, publisher: PublisherKeyId) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Returns `true` if the candidate's publisher passes the filter.
    pub fn matches_publisher(&self, candidate: &CompleteName) -> bool {
        match (&self.publisher, &candidate.authenticator) {
            (None, _) => true,
            (Some(wanted), Some(auth)) => auth.publisher == *wanted,
            (Some(_), None) => false,
        }
    }
}
