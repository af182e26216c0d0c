use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::event::{ObserverId, ObserverSpec, StoreEvent, StoreEventKind, StoreObserver};
use crate::path;
use crate::query::{CompiledQuery, QueryDialect};
use crate::traits::StoreSession;
use crate::types::{BinaryStream, Mixin, NodeId, NodeType, PropertyValue, SessionId};

/// Options for an [`InMemoryRepository`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreOptions {
    /// Whether nodes may become versionable.
    pub versioning: bool,
    /// Whether observers may be registered.
    pub observation: bool,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            versioning: true,
            observation: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CheckoutState {
    CheckedIn,
    /// `owner` is `None` for a node that became versionable and has not
    /// been explicitly checked out since.
    CheckedOut { owner: Option<SessionId> },
}

#[derive(Debug)]
struct NodeRecord {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    node_type: NodeType,
    mixins: Vec<Mixin>,
    properties: BTreeMap<String, PropertyValue>,
    checkout: CheckoutState,
}

impl NodeRecord {
    fn new(name: String, parent: Option<NodeId>, node_type: NodeType) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            node_type,
            mixins: Vec::new(),
            properties: BTreeMap::new(),
            checkout: CheckoutState::CheckedOut { owner: None },
        }
    }

    fn is_versionable(&self) -> bool {
        self.mixins.contains(&Mixin::Versionable)
    }
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<NodeId, NodeRecord>,
    next_id: u64,
    root: NodeId,
}

impl Tree {
    fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(root, NodeRecord::new(String::new(), None, NodeType::Unstructured));
        Self {
            nodes,
            next_id: 1,
            root,
        }
    }

    fn node(&self, id: NodeId) -> StoreResult<&NodeRecord> {
        self.nodes.get(&id).ok_or(StoreError::StaleNode(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> StoreResult<&mut NodeRecord> {
        self.nodes.get_mut(&id).ok_or(StoreError::StaleNode(id.0))
    }

    fn path_of(&self, id: NodeId) -> StoreResult<String> {
        let mut segments = Vec::new();
        let mut current = id;
        loop {
            let record = self.node(current)?;
            let Some(parent) = record.parent else { break };

            let mut index = 0;
            for sibling in &self.node(parent)?.children {
                if self.nodes.get(sibling).map_or(false, |n| n.name == record.name) {
                    index += 1;
                }
                if *sibling == current {
                    break;
                }
            }
            segments.push(if index > 1 {
                format!("{}[{}]", record.name, index)
            } else {
                record.name.clone()
            });
            current = parent;
        }

        if segments.is_empty() {
            return Ok("/".into());
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    fn named_children<'a>(
        &'a self,
        parent: &'a NodeRecord,
        name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        parent
            .children
            .iter()
            .copied()
            .filter(move |c| self.nodes.get(c).map_or(false, |n| n.name == name))
    }

    fn resolve(&self, node_path: &str) -> StoreResult<Option<NodeId>> {
        let mut current = self.root;
        for segment in path::segments(node_path)? {
            let (name, index) = path::split_index(segment);
            let parent = self.node(current)?;
            match self.named_children(parent, name).nth(index.unwrap_or(1) - 1) {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Preorder listing of the subtree rooted at `id`, including `id`.
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(record) = self.nodes.get(&next) {
                stack.extend(record.children.iter().rev().copied());
            }
        }
        out
    }

    /// Versionable nodes must be checked out, and not by another session.
    fn ensure_writable(&self, id: NodeId, session: SessionId) -> StoreResult<()> {
        let record = self.node(id)?;
        if !record.is_versionable() {
            return Ok(());
        }
        match record.checkout {
            CheckoutState::CheckedIn => Err(StoreError::Version(self.path_of(id)?)),
            CheckoutState::CheckedOut { owner: Some(owner) } if owner != session => {
                Err(StoreError::LockConflict {
                    path: self.path_of(id)?,
                    owner: owner.0,
                })
            }
            CheckoutState::CheckedOut { .. } => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state and delivery thread
// ---------------------------------------------------------------------------

enum Dispatch {
    Deliver {
        observer: Arc<dyn StoreObserver>,
        events: Vec<StoreEvent>,
    },
    Flush(oneshot::Sender<()>),
}

struct ObserverEntry {
    id: ObserverId,
    session: SessionId,
    spec: ObserverSpec,
    observer: Arc<dyn StoreObserver>,
}

struct Shared {
    options: MemoryStoreOptions,
    tree: RwLock<Tree>,
    observers: RwLock<Vec<ObserverEntry>>,
    next_session: AtomicU64,
    next_observer: AtomicU64,
    short_reads: AtomicU32,
    dispatch: mpsc::UnboundedSender<Dispatch>,
}

impl Shared {
    fn tree(&self) -> StoreResult<RwLockReadGuard<'_, Tree>> {
        self.tree
            .read()
            .map_err(|_| StoreError::Internal("tree lock poisoned".into()))
    }

    fn tree_mut(&self) -> StoreResult<RwLockWriteGuard<'_, Tree>> {
        self.tree
            .write()
            .map_err(|_| StoreError::Internal("tree lock poisoned".into()))
    }

    fn observers(&self) -> StoreResult<RwLockReadGuard<'_, Vec<ObserverEntry>>> {
        self.observers
            .read()
            .map_err(|_| StoreError::Internal("observer lock poisoned".into()))
    }

    fn observers_mut(&self) -> StoreResult<RwLockWriteGuard<'_, Vec<ObserverEntry>>> {
        self.observers
            .write()
            .map_err(|_| StoreError::Internal("observer lock poisoned".into()))
    }
}

fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            Dispatch::Deliver { observer, events } => {
                let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_events(&events)));
                if delivered.is_err() {
                    warn!(events = events.len(), "observer panicked during delivery");
                }
            }
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("event dispatcher stopped");
}

// ---------------------------------------------------------------------------
// InMemoryRepository
// ---------------------------------------------------------------------------

/// In-memory hierarchical versioned store.
///
/// Intended for tests and embedding. The tree lives behind a `RwLock` shared
/// by every session opened with [`login`](Self::login). Change events are
/// delivered on a dedicated thread fed by an unbounded channel, so observers
/// never run on the writer's stack.
#[derive(Clone)]
pub struct InMemoryRepository {
    shared: Arc<Shared>,
}

impl InMemoryRepository {
    /// Create a store with default options.
    pub fn new() -> Self {
        Self::with_options(MemoryStoreOptions::default())
    }

    pub fn with_options(options: MemoryStoreOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || run_dispatcher(rx));

        info!(
            versioning = options.versioning,
            observation = options.observation,
            "opened in-memory store"
        );
        Self {
            shared: Arc::new(Shared {
                options,
                tree: RwLock::new(Tree::new()),
                observers: RwLock::new(Vec::new()),
                next_session: AtomicU64::new(1),
                next_observer: AtomicU64::new(1),
                short_reads: AtomicU32::new(0),
                dispatch: tx,
            }),
        }
    }

    pub fn options(&self) -> &MemoryStoreOptions {
        &self.shared.options
    }

    /// Open a new session.
    pub fn login(&self) -> Arc<InMemorySession> {
        let id = SessionId(self.shared.next_session.fetch_add(1, Ordering::SeqCst));
        info!(session = %id, "session opened");
        Arc::new(InMemorySession {
            id,
            shared: Arc::clone(&self.shared),
            pending: Mutex::new(Pending::default()),
            live: AtomicBool::new(true),
        })
    }

    /// Block until every event published so far has been delivered.
    ///
    /// Must not be called from inside an async runtime or an observer.
    pub fn flush_events(&self) -> StoreResult<()> {
        let (done, wait) = oneshot::channel();
        self.shared
            .dispatch
            .send(Dispatch::Flush(done))
            .map_err(|_| StoreError::Internal("event dispatcher stopped".into()))?;
        wait.blocking_recv()
            .map_err(|_| StoreError::Internal("event dispatcher stopped".into()))
    }

    /// Make the next `count` binary reads deliver fewer bytes than declared.
    pub fn inject_short_reads(&self, count: u32) {
        self.shared.short_reads.store(count, Ordering::SeqCst);
    }

    /// Number of nodes, including the root.
    pub fn node_count(&self) -> StoreResult<usize> {
        Ok(self.shared.tree()?.nodes.len())
    }

    /// Number of registered observers across all sessions.
    pub fn observer_count(&self) -> StoreResult<usize> {
        Ok(self.shared.observers()?.len())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("options", &self.shared.options)
            .field("node_count", &self.node_count().ok())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// InMemorySession
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct PendingEvent {
    node: NodeId,
    event: StoreEvent,
}

#[derive(Debug, Default)]
struct Pending {
    events: Vec<PendingEvent>,
    created: HashSet<NodeId>,
}

/// A session against an [`InMemoryRepository`].
///
/// Mutations are applied to the shared tree immediately; their events are
/// queued and published to observers on [`save`](StoreSession::save).
pub struct InMemorySession {
    id: SessionId,
    shared: Arc<Shared>,
    pending: Mutex<Pending>,
    live: AtomicBool,
}

impl InMemorySession {
    fn ensure_live(&self) -> StoreResult<()> {
        if self.live.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::SessionClosed(self.id.0))
        }
    }

    fn pending(&self) -> StoreResult<MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| StoreError::Internal("pending event lock poisoned".into()))
    }

    fn queue(&self, node: NodeId, kind: StoreEventKind, event_path: String) -> StoreResult<()> {
        self.pending()?.events.push(PendingEvent {
            node,
            event: StoreEvent {
                kind,
                path: event_path,
                session: self.id,
            },
        });
        Ok(())
    }

    fn drop_observers(&self) -> StoreResult<usize> {
        let mut observers = self.shared.observers_mut()?;
        let before = observers.len();
        observers.retain(|entry| entry.session != self.id);
        Ok(before - observers.len())
    }
}

impl StoreSession for InMemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn root(&self) -> StoreResult<NodeId> {
        self.ensure_live()?;
        Ok(self.shared.tree()?.root)
    }

    fn node_name(&self, node: NodeId) -> StoreResult<String> {
        self.ensure_live()?;
        Ok(self.shared.tree()?.node(node)?.name.clone())
    }

    fn node_path(&self, node: NodeId) -> StoreResult<String> {
        self.ensure_live()?;
        self.shared.tree()?.path_of(node)
    }

    fn parent(&self, node: NodeId) -> StoreResult<Option<NodeId>> {
        self.ensure_live()?;
        Ok(self.shared.tree()?.node(node)?.parent)
    }

    fn child_nodes(&self, node: NodeId, name: Option<&str>) -> StoreResult<Vec<NodeId>> {
        self.ensure_live()?;
        let tree = self.shared.tree()?;
        let record = tree.node(node)?;
        Ok(match name {
            Some(name) => tree.named_children(record, name).collect(),
            None => record.children.clone(),
        })
    }

    fn item_node(&self, item_path: &str) -> StoreResult<NodeId> {
        self.ensure_live()?;
        let tree = self.shared.tree()?;
        if let Some(node) = tree.resolve(item_path)? {
            return Ok(node);
        }

        let owner_path = path::parent(item_path);
        let property = item_path[owner_path.len()..].trim_start_matches('/');
        if let Some(owner) = tree.resolve(owner_path)? {
            if tree.node(owner)?.properties.contains_key(property) {
                return Ok(owner);
            }
        }
        Err(StoreError::PathNotFound(item_path.to_string()))
    }

    fn add_child(&self, parent: NodeId, name: &str, node_type: NodeType) -> StoreResult<NodeId> {
        self.ensure_live()?;
        path::validate_node_name(name)?;

        let (id, child_path) = {
            let mut tree = self.shared.tree_mut()?;
            tree.ensure_writable(parent, self.id)?;

            let id = NodeId(tree.next_id);
            tree.next_id += 1;
            tree.nodes
                .insert(id, NodeRecord::new(name.to_string(), Some(parent), node_type));
            tree.node_mut(parent)?.children.push(id);
            (id, tree.path_of(id)?)
        };

        debug!(path = %child_path, node_type = node_type.as_str(), "node added");
        self.pending()?.created.insert(id);
        self.queue(id, StoreEventKind::NodeAdded, child_path)?;
        Ok(id)
    }

    fn remove(&self, node: NodeId) -> StoreResult<()> {
        self.ensure_live()?;

        let (removed, removed_path) = {
            let mut tree = self.shared.tree_mut()?;
            let parent = tree
                .node(node)?
                .parent
                .ok_or_else(|| StoreError::ConstraintViolation("cannot remove the root".into()))?;
            tree.ensure_writable(parent, self.id)?;

            let removed_path = tree.path_of(node)?;
            let removed = tree.subtree(node);
            for id in &removed {
                tree.nodes.remove(id);
            }
            tree.node_mut(parent)?.children.retain(|c| *c != node);
            (removed, removed_path)
        };

        debug!(path = %removed_path, nodes = removed.len(), "node removed");

        let mut pending = self.pending()?;
        let was_created = pending.created.contains(&node);
        let gone: HashSet<NodeId> = removed.into_iter().collect();
        pending.events.retain(|e| !gone.contains(&e.node));
        pending.created.retain(|id| !gone.contains(id));
        if !was_created {
            pending.events.push(PendingEvent {
                node,
                event: StoreEvent {
                    kind: StoreEventKind::NodeRemoved,
                    path: removed_path,
                    session: self.id,
                },
            });
        }
        Ok(())
    }

    fn has_mixin(&self, node: NodeId, mixin: Mixin) -> StoreResult<bool> {
        self.ensure_live()?;
        Ok(self.shared.tree()?.node(node)?.mixins.contains(&mixin))
    }

    fn can_add_mixin(&self, node: NodeId, mixin: Mixin) -> StoreResult<bool> {
        self.ensure_live()?;
        self.shared.tree()?.node(node)?;
        Ok(mixin != Mixin::Versionable || self.shared.options.versioning)
    }

    fn add_mixin(&self, node: NodeId, mixin: Mixin) -> StoreResult<()> {
        self.ensure_live()?;
        if mixin == Mixin::Versionable && !self.shared.options.versioning {
            return Err(StoreError::UnsupportedOperation(format!(
                "{} is disabled in this store",
                mixin.as_str()
            )));
        }

        let mut tree = self.shared.tree_mut()?;
        tree.ensure_writable(node, self.id)?;
        let record = tree.node_mut(node)?;
        if record.mixins.contains(&mixin) {
            return Ok(());
        }
        record.mixins.push(mixin);
        if mixin == Mixin::Versionable {
            record.checkout = CheckoutState::CheckedOut { owner: None };
        }
        Ok(())
    }

    fn checkout(&self, node: NodeId) -> StoreResult<()> {
        self.ensure_live()?;
        let mut tree = self.shared.tree_mut()?;
        let node_path = tree.path_of(node)?;
        let record = tree.node_mut(node)?;
        if !record.is_versionable() {
            return Err(StoreError::UnsupportedOperation(format!(
                "{node_path} is not versionable"
            )));
        }
        match record.checkout {
            CheckoutState::CheckedOut { owner: Some(owner) } if owner != self.id => {
                Err(StoreError::LockConflict {
                    path: node_path,
                    owner: owner.0,
                })
            }
            _ => {
                record.checkout = CheckoutState::CheckedOut {
                    owner: Some(self.id),
                };
                debug!(path = %node_path, session = %self.id, "checked out");
                Ok(())
            }
        }
    }

    fn checkin(&self, node: NodeId) -> StoreResult<()> {
        self.ensure_live()?;
        let mut tree = self.shared.tree_mut()?;
        let node_path = tree.path_of(node)?;
        let record = tree.node_mut(node)?;
        if !record.is_versionable() {
            return Err(StoreError::UnsupportedOperation(format!(
                "{node_path} is not versionable"
            )));
        }
        match record.checkout {
            CheckoutState::CheckedIn => Ok(()),
            CheckoutState::CheckedOut { owner: Some(owner) } if owner != self.id => {
                Err(StoreError::LockConflict {
                    path: node_path,
                    owner: owner.0,
                })
            }
            CheckoutState::CheckedOut { .. } => {
                record.checkout = CheckoutState::CheckedIn;
                debug!(path = %node_path, "checked in");
                Ok(())
            }
        }
    }

    fn is_checked_out(&self, node: NodeId) -> StoreResult<bool> {
        self.ensure_live()?;
        let tree = self.shared.tree()?;
        let record = tree.node(node)?;
        Ok(!record.is_versionable() || record.checkout != CheckoutState::CheckedIn)
    }

    fn set_property(&self, node: NodeId, name: &str, value: PropertyValue) -> StoreResult<()> {
        self.ensure_live()?;
        path::validate_node_name(name)?;

        let (kind, property_path) = {
            let mut tree = self.shared.tree_mut()?;
            tree.ensure_writable(node, self.id)?;
            let property_path = path::join(&tree.path_of(node)?, name);
            let previous = tree.node_mut(node)?.properties.insert(name.to_string(), value);
            let kind = if previous.is_some() {
                StoreEventKind::PropertyChanged
            } else {
                StoreEventKind::PropertyAdded
            };
            (kind, property_path)
        };

        self.queue(node, kind, property_path)
    }

    fn has_property(&self, node: NodeId, name: &str) -> StoreResult<bool> {
        self.ensure_live()?;
        Ok(self.shared.tree()?.node(node)?.properties.contains_key(name))
    }

    fn property(&self, node: NodeId, name: &str) -> StoreResult<Option<PropertyValue>> {
        self.ensure_live()?;
        Ok(self.shared.tree()?.node(node)?.properties.get(name).cloned())
    }

    fn binary_property(&self, node: NodeId, name: &str) -> StoreResult<BinaryStream> {
        self.ensure_live()?;
        let tree = self.shared.tree()?;
        let property_path = || tree.path_of(node).map(|p| path::join(&p, name));

        let bytes = match tree.node(node)?.properties.get(name) {
            Some(PropertyValue::Binary(bytes)) => bytes.clone(),
            Some(other) => {
                return Err(StoreError::ValueFormat(format!(
                    "{} holds a {} value, not Binary",
                    property_path()?,
                    other.type_name()
                )))
            }
            None => return Err(StoreError::PathNotFound(property_path()?)),
        };

        let length = bytes.len() as u64;
        let short = !bytes.is_empty()
            && self
                .shared
                .short_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        let delivered = if short {
            bytes.slice(..bytes.len() / 2)
        } else {
            bytes
        };
        Ok(BinaryStream::new(length, Box::new(Cursor::new(delivered))))
    }

    fn save(&self) -> StoreResult<()> {
        self.ensure_live()?;
        let events: Vec<StoreEvent> = {
            let mut pending = self.pending()?;
            pending.created.clear();
            pending.events.drain(..).map(|p| p.event).collect()
        };
        if events.is_empty() {
            return Ok(());
        }

        let observers = self.shared.observers()?;
        let mut deliveries = 0;
        for entry in observers.iter() {
            let accepted: Vec<StoreEvent> = events
                .iter()
                .filter(|e| entry.spec.accepts(e, entry.session))
                .cloned()
                .collect();
            if accepted.is_empty() {
                continue;
            }
            let message = Dispatch::Deliver {
                observer: Arc::clone(&entry.observer),
                events: accepted,
            };
            if self.shared.dispatch.send(message).is_err() {
                warn!(observer = entry.id.as_u64(), "event dispatcher stopped, dropping events");
            } else {
                deliveries += 1;
            }
        }

        debug!(session = %self.id, events = events.len(), deliveries, "saved");
        Ok(())
    }

    fn logout(&self) -> StoreResult<()> {
        if !self.live.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let removed = self.drop_observers()?;

        let mut tree = self.shared.tree_mut()?;
        for record in tree.nodes.values_mut() {
            if record.checkout == (CheckoutState::CheckedOut { owner: Some(self.id) }) {
                record.checkout = CheckoutState::CheckedOut { owner: None };
            }
        }
        info!(session = %self.id, observers_removed = removed, "session closed");
        Ok(())
    }

    fn execute_query(&self, statement: &str, dialect: QueryDialect) -> StoreResult<Vec<NodeId>> {
        self.ensure_live()?;
        let query = CompiledQuery::compile(statement, dialect)?;
        let tree = self.shared.tree()?;

        let mut matched = vec![tree.root];
        for step in &query.steps {
            let mut next = Vec::new();
            for node in &matched {
                let record = tree.node(*node)?;
                next.extend(tree.named_children(record, step));
            }
            matched = next;
        }

        if query.deep {
            matched = matched.into_iter().flat_map(|n| tree.subtree(n)).collect();
        }
        debug!(statement, results = matched.len(), "query executed");
        Ok(matched)
    }

    fn add_observer(
        &self,
        observer: Arc<dyn StoreObserver>,
        spec: ObserverSpec,
    ) -> StoreResult<ObserverId> {
        self.ensure_live()?;
        if !self.shared.options.observation {
            return Err(StoreError::UnsupportedOperation(
                "observation is disabled in this store".into(),
            ));
        }
        path::validate_path(&spec.path)?;

        let id = ObserverId(self.shared.next_observer.fetch_add(1, Ordering::SeqCst));
        info!(
            observer = id.as_u64(),
            path = %spec.path,
            deep = spec.deep,
            no_local = spec.no_local,
            "observer registered"
        );
        self.shared.observers_mut()?.push(ObserverEntry {
            id,
            session: self.id,
            spec,
            observer,
        });
        Ok(id)
    }

    fn remove_observer(&self, id: ObserverId) -> StoreResult<()> {
        self.ensure_live()?;
        let mut observers = self.shared.observers_mut()?;
        let position = observers
            .iter()
            .position(|e| e.id == id && e.session == self.id)
            .ok_or(StoreError::UnknownObserver(id.0))?;
        observers.remove(position);
        info!(observer = id.as_u64(), "observer removed");
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if self.live.load(Ordering::SeqCst) {
            if let Err(e) = self.drop_observers() {
                warn!(session = %self.id, error = %e, "failed to drop observers");
            }
        }
    }
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession")
            .field("id", &self.id)
            .field("live", &self.live.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMask;
    use bytes::Bytes;
    use std::io::Read;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<StoreEvent>>,
        batches: AtomicU32,
    }

    impl StoreObserver for Recorder {
        fn on_events(&self, events: &[StoreEvent]) {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().extend_from_slice(events);
        }
    }

    impl Recorder {
        fn events(&self) -> Vec<StoreEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    fn watch_all(session: &InMemorySession, recorder: &Arc<Recorder>) -> ObserverId {
        session
            .add_observer(
                recorder.clone(),
                ObserverSpec {
                    mask: EventMask::ALL,
                    path: "/".into(),
                    deep: true,
                    no_local: true,
                },
            )
            .unwrap()
    }

    fn versionable_child(session: &InMemorySession, parent: NodeId, name: &str) -> NodeId {
        let n = session.add_child(parent, name, NodeType::Unstructured).unwrap();
        session.add_mixin(n, Mixin::Versionable).unwrap();
        n
    }

    // -----------------------------------------------------------------------
    // Structure and paths
    // -----------------------------------------------------------------------

    #[test]
    fn root_path_and_name() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        assert_eq!(s.node_path(root).unwrap(), "/");
        assert_eq!(s.node_name(root).unwrap(), "");
        assert_eq!(s.parent(root).unwrap(), None);
    }

    #[test]
    fn sessions_have_distinct_ids() {
        let repo = InMemoryRepository::new();
        assert_ne!(repo.login().session_id(), repo.login().session_id());
    }

    #[test]
    fn same_name_siblings_get_indices() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a1 = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        let b = s.add_child(root, "b", NodeType::Unstructured).unwrap();
        let a2 = s.add_child(root, "a", NodeType::Unstructured).unwrap();

        assert_eq!(s.node_path(a1).unwrap(), "/a");
        assert_eq!(s.node_path(b).unwrap(), "/b");
        assert_eq!(s.node_path(a2).unwrap(), "/a[2]");
        assert_eq!(s.node_name(a2).unwrap(), "a");
        assert_eq!(s.item_node("/a[2]").unwrap(), a2);
        assert_eq!(s.item_node("/a").unwrap(), a1);
        assert_eq!(s.child_nodes(root, Some("a")).unwrap(), vec![a1, a2]);
        assert_eq!(s.child_nodes(root, None).unwrap(), vec![a1, b, a2]);
    }

    #[test]
    fn item_node_resolves_property_paths() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        s.set_property(a, "SIGNATURE", PropertyValue::Binary(Bytes::from_static(b"sig")))
            .unwrap();

        assert_eq!(s.item_node("/a/SIGNATURE").unwrap(), a);
        assert!(matches!(
            s.item_node("/a/MISSING"),
            Err(StoreError::PathNotFound(_))
        ));
    }

    #[test]
    fn invalid_child_names_rejected() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        assert!(matches!(
            s.add_child(root, ".hidden", NodeType::Unstructured),
            Err(StoreError::ConstraintViolation(_))
        ));
        assert!(s.add_child(root, "a/b", NodeType::Unstructured).is_err());
    }

    #[test]
    fn remove_makes_subtree_stale() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        let b = s.add_child(a, "b", NodeType::Unstructured).unwrap();
        assert_eq!(repo.node_count().unwrap(), 3);

        s.remove(a).unwrap();
        assert_eq!(repo.node_count().unwrap(), 1);
        assert!(matches!(s.node_path(b), Err(StoreError::StaleNode(_))));
        assert!(s.remove(root).is_err());
    }

    // -----------------------------------------------------------------------
    // Versioning
    // -----------------------------------------------------------------------

    #[test]
    fn checked_in_node_rejects_mutation() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = versionable_child(&s, root, "a");
        assert!(s.is_checked_out(a).unwrap());

        s.checkin(a).unwrap();
        assert!(!s.is_checked_out(a).unwrap());
        assert!(matches!(
            s.add_child(a, "b", NodeType::Unstructured),
            Err(StoreError::Version(_))
        ));

        s.checkout(a).unwrap();
        s.add_child(a, "b", NodeType::Unstructured).unwrap();
        s.checkin(a).unwrap();
        assert!(!s.is_checked_out(a).unwrap());
    }

    #[test]
    fn competing_checkout_conflicts() {
        let repo = InMemoryRepository::new();
        let s1 = repo.login();
        let s2 = repo.login();
        let root = s1.root().unwrap();
        let a = versionable_child(&s1, root, "a");
        s1.checkin(a).unwrap();

        s1.checkout(a).unwrap();
        assert!(matches!(s2.checkout(a), Err(StoreError::LockConflict { .. })));
        assert!(matches!(
            s2.add_child(a, "x", NodeType::Unstructured),
            Err(StoreError::LockConflict { .. })
        ));

        s1.checkin(a).unwrap();
        s2.checkout(a).unwrap();
    }

    #[test]
    fn logout_releases_checkouts() {
        let repo = InMemoryRepository::new();
        let s1 = repo.login();
        let s2 = repo.login();
        let root = s1.root().unwrap();
        let a = versionable_child(&s1, root, "a");
        s1.checkin(a).unwrap();
        s1.checkout(a).unwrap();

        s1.logout().unwrap();
        s2.checkout(a).unwrap();
    }

    #[test]
    fn non_versionable_nodes_are_always_writable() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        assert!(s.is_checked_out(root).unwrap());
        assert!(matches!(
            s.checkout(root),
            Err(StoreError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn versioning_can_be_disabled() {
        let repo = InMemoryRepository::with_options(MemoryStoreOptions {
            versioning: false,
            ..Default::default()
        });
        let s = repo.login();
        let root = s.root().unwrap();
        assert!(!s.can_add_mixin(root, Mixin::Versionable).unwrap());
        assert!(s.can_add_mixin(root, Mixin::Referenceable).unwrap());
        assert!(matches!(
            s.add_mixin(root, Mixin::Versionable),
            Err(StoreError::UnsupportedOperation(_))
        ));
        s.add_mixin(root, Mixin::Referenceable).unwrap();
        assert!(s.has_mixin(root, Mixin::Referenceable).unwrap());
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    #[test]
    fn typed_properties() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        s.set_property(a, "COUNT", PropertyValue::Long(3)).unwrap();
        s.set_property(a, "TYPE", PropertyValue::String("LEAF".into()))
            .unwrap();

        assert_eq!(s.property(a, "COUNT").unwrap(), Some(PropertyValue::Long(3)));
        assert!(s.has_property(a, "TYPE").unwrap());
        assert_eq!(s.property(a, "NOPE").unwrap(), None);
        assert!(matches!(
            s.binary_property(a, "COUNT"),
            Err(StoreError::ValueFormat(_))
        ));
        assert!(matches!(
            s.binary_property(a, "NOPE"),
            Err(StoreError::PathNotFound(_))
        ));
    }

    #[test]
    fn binary_stream_reads_full_value() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        s.set_property(a, "CONTENT", PropertyValue::Binary(Bytes::from_static(b"payload")))
            .unwrap();

        let mut stream = s.binary_property(a, "CONTENT").unwrap();
        let mut buf = Vec::new();
        stream.reader.read_to_end(&mut buf).unwrap();
        assert_eq!(stream.length, 7);
        assert_eq!(buf, b"payload");
    }

    #[test]
    fn injected_short_read_truncates_delivery_only() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        s.set_property(a, "CONTENT", PropertyValue::Binary(Bytes::from_static(b"payload")))
            .unwrap();
        repo.inject_short_reads(1);

        let mut stream = s.binary_property(a, "CONTENT").unwrap();
        let mut buf = Vec::new();
        stream.reader.read_to_end(&mut buf).unwrap();
        assert_eq!(stream.length, 7);
        assert!(buf.len() < 7);

        let mut stream = s.binary_property(a, "CONTENT").unwrap();
        let mut buf = Vec::new();
        stream.reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    #[test]
    fn query_root_and_steps() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        let b1 = s.add_child(a, "b", NodeType::Unstructured).unwrap();
        let b2 = s.add_child(a, "b", NodeType::Unstructured).unwrap();
        s.add_child(a, "c", NodeType::Unstructured).unwrap();

        assert_eq!(
            s.execute_query("/jcr:root", QueryDialect::XPath).unwrap(),
            vec![root]
        );
        assert_eq!(
            s.execute_query("/jcr:root/a/b", QueryDialect::XPath).unwrap(),
            vec![b1, b2]
        );
        assert!(s
            .execute_query("/jcr:root/zzz", QueryDialect::XPath)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn deep_query_includes_matched_and_descendants() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let a = s.add_child(root, "a", NodeType::Unstructured).unwrap();
        let b = s.add_child(a, "b", NodeType::Unstructured).unwrap();
        let c = s.add_child(b, "c", NodeType::Unstructured).unwrap();
        let d = s.add_child(a, "d", NodeType::Unstructured).unwrap();
        s.add_child(root, "other", NodeType::Unstructured).unwrap();

        assert_eq!(
            s.execute_query("/jcr:root/a//*", QueryDialect::XPath).unwrap(),
            vec![a, b, c, d]
        );
    }

    #[test]
    fn sql_dialect_rejected() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        assert!(matches!(
            s.execute_query("SELECT * FROM nt:base", QueryDialect::Sql),
            Err(StoreError::InvalidQuery { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    #[test]
    fn events_delivered_after_save_to_other_sessions() {
        let repo = InMemoryRepository::new();
        let watcher = repo.login();
        let writer = repo.login();
        let recorder = Arc::new(Recorder::default());
        watch_all(&watcher, &recorder);

        let root = writer.root().unwrap();
        let a = writer.add_child(root, "a", NodeType::Unstructured).unwrap();
        writer
            .set_property(a, "SIGNATURE", PropertyValue::Binary(Bytes::from_static(b"s")))
            .unwrap();
        repo.flush_events().unwrap();
        assert!(recorder.events().is_empty());

        writer.save().unwrap();
        repo.flush_events().unwrap();
        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, StoreEventKind::NodeAdded);
        assert_eq!(events[0].path, "/a");
        assert_eq!(events[1].kind, StoreEventKind::PropertyAdded);
        assert_eq!(events[1].path, "/a/SIGNATURE");
        assert_eq!(events[1].session, writer.session_id());
        assert_eq!(recorder.batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn own_events_suppressed_when_no_local() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let recorder = Arc::new(Recorder::default());
        watch_all(&s, &recorder);

        let root = s.root().unwrap();
        s.add_child(root, "a", NodeType::Unstructured).unwrap();
        s.save().unwrap();
        repo.flush_events().unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn removing_unsaved_node_drops_its_events() {
        let repo = InMemoryRepository::new();
        let watcher = repo.login();
        let writer = repo.login();
        let recorder = Arc::new(Recorder::default());
        watch_all(&watcher, &recorder);

        let root = writer.root().unwrap();
        let a = writer.add_child(root, "a", NodeType::Unstructured).unwrap();
        writer.set_property(a, "X", PropertyValue::Long(1)).unwrap();
        writer.remove(a).unwrap();
        writer.save().unwrap();
        repo.flush_events().unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn remove_observer_stops_delivery() {
        let repo = InMemoryRepository::new();
        let watcher = repo.login();
        let writer = repo.login();
        let recorder = Arc::new(Recorder::default());
        let id = watch_all(&watcher, &recorder);
        assert_eq!(repo.observer_count().unwrap(), 1);

        watcher.remove_observer(id).unwrap();
        assert_eq!(repo.observer_count().unwrap(), 0);
        assert!(matches!(
            watcher.remove_observer(id),
            Err(StoreError::UnknownObserver(_))
        ));

        let root = writer.root().unwrap();
        writer.add_child(root, "a", NodeType::Unstructured).unwrap();
        writer.save().unwrap();
        repo.flush_events().unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn observation_can_be_disabled() {
        let repo = InMemoryRepository::with_options(MemoryStoreOptions {
            observation: false,
            ..Default::default()
        });
        let s = repo.login();
        let result = s.add_observer(
            Arc::new(Recorder::default()),
            ObserverSpec {
                mask: EventMask::ALL,
                path: "/".into(),
                deep: true,
                no_local: true,
            },
        );
        assert!(matches!(result, Err(StoreError::UnsupportedOperation(_))));
    }

    #[test]
    fn observer_path_is_validated() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let result = s.add_observer(
            Arc::new(Recorder::default()),
            ObserverSpec {
                mask: EventMask::ALL,
                path: "relative/path".into(),
                deep: false,
                no_local: true,
            },
        );
        assert!(result.is_err());
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn logout_closes_session_and_drops_observers() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        watch_all(&s, &Arc::new(Recorder::default()));
        assert_eq!(repo.observer_count().unwrap(), 1);

        s.logout().unwrap();
        assert_eq!(repo.observer_count().unwrap(), 0);
        assert!(matches!(s.root(), Err(StoreError::SessionClosed(_))));
        s.logout().unwrap();
    }

    #[test]
    fn dropping_session_drops_observers() {
        let repo = InMemoryRepository::new();
        {
            let s = repo.login();
            watch_all(&s, &Arc::new(Recorder::default()));
        }
        assert_eq!(repo.observer_count().unwrap(), 0);
    }

    #[test]
    fn options_serde_defaults() {
        let options: MemoryStoreOptions = serde_json::from_str(r#"{"versioning":false}"#).unwrap();
        assert!(!options.versioning);
        assert!(options.observation);
    }

    #[test]
    fn debug_format() {
        let repo = InMemoryRepository::new();
        let debug = format!("{repo:?}");
        assert!(debug.contains("InMemoryRepository"));
        assert!(debug.contains("node_count"));
    }
}
