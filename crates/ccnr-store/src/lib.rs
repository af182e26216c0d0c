//! Hierarchical versioned store for the content-centric repository.
//!
//! The repository layer does not own a storage engine. It drives a generic
//! "ordered hierarchical store with versioning, querying, and change
//! notification" through the [`StoreSession`] trait defined here. This crate
//! also ships [`InMemoryRepository`], a complete in-memory implementation of
//! that contract used for tests and embedding.
//!
//! # Store Model
//!
//! - Nodes live in a tree addressed by `/`-separated paths. Siblings may share
//!   a name; the store disambiguates them with a 1-based `[n]` suffix (shown
//!   only for `n > 1`).
//! - Nodes carry typed properties ([`PropertyValue`]) and capability mixins
//!   ([`Mixin`]). A versionable node must be checked out before it is mutated
//!   and is read-only again after checkin.
//! - Mutations are visible immediately but change events are only published
//!   when the session calls [`StoreSession::save`].
//! - Observers ([`StoreObserver`]) are registered for a path and depth and
//!   receive events on the store's own delivery thread, never on the writer's.
//!
//! # Modules
//!
//! - [`error`]: Error types for store operations
//! - [`types`]: Node handles, property values, binary streams
//! - [`path`]: Node-name and path grammar
//! - [`query`]: XPath-subset query compiler
//! - [`event`]: Change events and observer registration
//! - [`traits`]: The [`StoreSession`] contract
//! - [`memory`]: In-memory [`InMemoryRepository`]

pub mod error;
pub mod event;
pub mod memory;
pub mod path;
pub mod query;
pub mod traits;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use event::{EventMask, ObserverId, ObserverSpec, StoreEvent, StoreEventKind, StoreObserver};
pub use memory::{InMemoryRepository, InMemorySession, MemoryStoreOptions};
pub use query::{CompiledQuery, QueryDialect};
pub use traits::StoreSession;
pub use types::{BinaryStream, Mixin, NodeId, NodeType, PropertyValue, SessionId};
