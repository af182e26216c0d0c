//! The [`StoreSession`] trait defining the backing-store contract.
//!
//! The repository layer only ever talks to the store through this trait, so
//! any hierarchical store with versioning, querying and change observation
//! can back it.

use std::sync::Arc;

use crate::error::StoreResult;
use crate::event::{ObserverId, ObserverSpec, StoreObserver};
use crate::query::QueryDialect;
use crate::types::{BinaryStream, Mixin, NodeId, NodeType, PropertyValue, SessionId};

/// An authenticated session against a hierarchical versioned store.
///
/// Implementations must be thread-safe (`Send + Sync`). All operations issued
/// through one session are serialized by the store's own concurrency
/// control; the session adds no locking of its own.
pub trait StoreSession: Send + Sync {
    /// Identity of this session, as stamped on the events it produces.
    fn session_id(&self) -> SessionId;

    /// The workspace root node.
    fn root(&self) -> StoreResult<NodeId>;

    // ---- Navigation ----

    /// Name of the node, without any sibling index. The root's name is empty.
    fn node_name(&self, node: NodeId) -> StoreResult<String>;

    /// Absolute path of the node, with sibling indices where needed.
    fn node_path(&self, node: NodeId) -> StoreResult<String>;

    /// Parent of the node; `None` for the root.
    fn parent(&self, node: NodeId) -> StoreResult<Option<NodeId>>;

    /// Children of the node in insertion order, optionally only those with
    /// the given name.
    fn child_nodes(&self, node: NodeId, name: Option<&str>) -> StoreResult<Vec<NodeId>>;

    /// Resolve an absolute path to a node. A path naming a property resolves
    /// to the node that owns it.
    fn item_node(&self, path: &str) -> StoreResult<NodeId>;

    // ---- Structure ----

    /// Add a child node. The parent must be writable by this session.
    fn add_child(&self, parent: NodeId, name: &str, node_type: NodeType) -> StoreResult<NodeId>;

    /// Remove the node and its subtree.
    fn remove(&self, node: NodeId) -> StoreResult<()>;

    // ---- Capabilities ----

    fn has_mixin(&self, node: NodeId, mixin: Mixin) -> StoreResult<bool>;

    fn can_add_mixin(&self, node: NodeId, mixin: Mixin) -> StoreResult<bool>;

    /// Add a capability. Adding one the node already has is a no-op.
    fn add_mixin(&self, node: NodeId, mixin: Mixin) -> StoreResult<()>;

    // ---- Versioning ----

    /// Mark a versionable node as being mutated by this session.
    fn checkout(&self, node: NodeId) -> StoreResult<()>;

    /// Mark a versionable node read-only again.
    fn checkin(&self, node: NodeId) -> StoreResult<()>;

    /// Whether the node accepts mutation. Non-versionable nodes always do.
    fn is_checked_out(&self, node: NodeId) -> StoreResult<bool>;

    // ---- Properties ----

    fn set_property(&self, node: NodeId, name: &str, value: PropertyValue) -> StoreResult<()>;

    fn has_property(&self, node: NodeId, name: &str) -> StoreResult<bool>;

    /// Read a property. Returns `Ok(None)` if the node has no such property.
    fn property(&self, node: NodeId, name: &str) -> StoreResult<Option<PropertyValue>>;

    /// Open a binary property as a stream of declared length.
    fn binary_property(&self, node: NodeId, name: &str) -> StoreResult<BinaryStream>;

    // ---- Persistence ----

    /// Persist pending changes and publish their events.
    fn save(&self) -> StoreResult<()>;

    /// End the session. Observers it registered are removed.
    fn logout(&self) -> StoreResult<()>;

    // ---- Query ----

    /// Compile and execute a query, returning matching nodes in document
    /// order.
    fn execute_query(&self, statement: &str, dialect: QueryDialect) -> StoreResult<Vec<NodeId>>;

    // ---- Observation ----

    fn add_observer(
        &self,
        observer: Arc<dyn StoreObserver>,
        spec: ObserverSpec,
    ) -> StoreResult<ObserverId>;

    fn remove_observer(&self, id: ObserverId) -> StoreResult<()>;
}
