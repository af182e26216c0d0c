use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path;
use crate::types::SessionId;

/// Classification of store change events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreEventKind {
    NodeAdded,
    NodeRemoved,
    PropertyAdded,
    PropertyChanged,
    PropertyRemoved,
}

impl StoreEventKind {
    /// Returns `true` for events whose path names a property.
    pub fn is_property_event(&self) -> bool {
        matches!(
            self,
            Self::PropertyAdded | Self::PropertyChanged | Self::PropertyRemoved
        )
    }

    fn mask_bit(&self) -> u32 {
        match self {
            Self::NodeAdded => EventMask::NODE_ADDED.0,
            Self::NodeRemoved => EventMask::NODE_REMOVED.0,
            Self::PropertyAdded => EventMask::PROPERTY_ADDED.0,
            Self::PropertyChanged => EventMask::PROPERTY_CHANGED.0,
            Self::PropertyRemoved => EventMask::PROPERTY_REMOVED.0,
        }
    }
}

impl fmt::Display for StoreEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeAdded => "NodeAdded",
            Self::NodeRemoved => "NodeRemoved",
            Self::PropertyAdded => "PropertyAdded",
            Self::PropertyChanged => "PropertyChanged",
            Self::PropertyRemoved => "PropertyRemoved",
        };
        write!(f, "{s}")
    }
}

/// Set of event kinds an observer wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    pub const NODE_ADDED: Self = Self(1);
    pub const NODE_REMOVED: Self = Self(1 << 1);
    pub const PROPERTY_ADDED: Self = Self(1 << 2);
    pub const PROPERTY_CHANGED: Self = Self(1 << 3);
    pub const PROPERTY_REMOVED: Self = Self(1 << 4);
    pub const ALL: Self = Self(0b1_1111);
    pub const NONE: Self = Self(0);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(&self, kind: StoreEventKind) -> bool {
        self.0 & kind.mask_bit() != 0
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// A single change published by a session's save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    /// Path of the affected node, or of the property for property events.
    pub path: String,
    /// Session whose save produced the event.
    pub session: SessionId,
}

impl StoreEvent {
    /// Path of the node the event is reported against.
    ///
    /// For node events that is the parent of the added or removed node; for
    /// property events it is the node owning the property.
    pub fn associated_node_path(&self) -> &str {
        path::parent(&self.path)
    }
}

/// Identifier of a registered observer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

impl ObserverId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Registration parameters for an observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObserverSpec {
    pub mask: EventMask,
    /// Absolute path the observer is rooted at.
    pub path: String,
    /// When `false`, only events associated with `path` itself are delivered;
    /// when `true`, events associated with any node below it as well.
    pub deep: bool,
    /// Suppress events produced by the registering session.
    pub no_local: bool,
}

impl ObserverSpec {
    /// Returns `true` if `event` falls inside this registration.
    ///
    /// Sibling indices are ignored on both sides, so same-name siblings share
    /// an observation scope.
    pub fn accepts(&self, event: &StoreEvent, registering: SessionId) -> bool {
        if !self.mask.contains(event.kind) {
            return false;
        }
        if self.no_local && event.session == registering {
            return false;
        }
        let associated = path::normalize(event.associated_node_path());
        let root = path::normalize(&self.path);
        if self.deep {
            path::is_within(&associated, &root)
        } else {
            associated == root
        }
    }
}

/// Receiver of change events.
///
/// Called on the store's delivery thread. Implementations must return
/// quickly and must not write to the store from inside the callback.
pub trait StoreObserver: Send + Sync {
    fn on_events(&self, events: &[StoreEvent]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: StoreEventKind, path: &str, session: u64) -> StoreEvent {
        StoreEvent {
            kind,
            path: path.into(),
            session: SessionId(session),
        }
    }

    fn spec(path: &str, deep: bool) -> ObserverSpec {
        ObserverSpec {
            mask: EventMask::ALL,
            path: path.into(),
            deep,
            no_local: true,
        }
    }

    #[test]
    fn mask_membership() {
        let mask = EventMask::NODE_ADDED.union(EventMask::PROPERTY_ADDED);
        assert!(mask.contains(StoreEventKind::NodeAdded));
        assert!(mask.contains(StoreEventKind::PropertyAdded));
        assert!(!mask.contains(StoreEventKind::NodeRemoved));
        assert!(!EventMask::NONE.contains(StoreEventKind::NodeAdded));
    }

    #[test]
    fn associated_path_is_parent() {
        let e = event(StoreEventKind::PropertyAdded, "/a/b/SIGNATURE", 1);
        assert_eq!(e.associated_node_path(), "/a/b");
        let e = event(StoreEventKind::NodeAdded, "/a", 1);
        assert_eq!(e.associated_node_path(), "/");
    }

    #[test]
    fn shallow_spec_matches_direct_association_only() {
        let s = spec("/a", false);
        assert!(s.accepts(&event(StoreEventKind::NodeAdded, "/a/b", 2), SessionId(1)));
        assert!(s.accepts(&event(StoreEventKind::PropertyAdded, "/a/P", 2), SessionId(1)));
        assert!(!s.accepts(&event(StoreEventKind::NodeAdded, "/a/b/c", 2), SessionId(1)));
    }

    #[test]
    fn deep_spec_matches_subtree() {
        let s = spec("/a", true);
        assert!(s.accepts(&event(StoreEventKind::NodeAdded, "/a/b/c", 2), SessionId(1)));
        assert!(!s.accepts(&event(StoreEventKind::NodeAdded, "/ab/c", 2), SessionId(1)));
    }

    #[test]
    fn no_local_suppresses_own_session() {
        let s = spec("/", true);
        assert!(!s.accepts(&event(StoreEventKind::NodeAdded, "/a", 1), SessionId(1)));
        assert!(s.accepts(&event(StoreEventKind::NodeAdded, "/a", 2), SessionId(1)));
    }

    #[test]
    fn sibling_indices_are_ignored() {
        let s = spec("/a/c", false);
        assert!(s.accepts(
            &event(StoreEventKind::PropertyAdded, "/a/c[2]/SIGNATURE", 2),
            SessionId(1)
        ));
    }
}
