use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ccnr_store::{Mixin, NodeId, NodeType, ObserverSpec, StoreError, StoreSession};
use ccnr_types::{Authenticator, CompleteName, ContentObject, Interest, Name, Signature};
use tracing::{debug, info, warn};

use crate::checkout::CheckoutScope;
use crate::codec::{encode_component, name_to_path};
use crate::config::RepositoryConfig;
use crate::error::{RepoError, RepoResult};
use crate::metadata::{
    self, read_complete_name, read_content_object, read_name, read_publisher, read_signature,
    write_metadata,
};
use crate::query::build_query;
use crate::subscription::{InterestListener, InterestObserver, Registration};

/// How an existing same-name sibling relates to an incoming write.
enum SiblingMatch {
    /// Same publisher and signature: the write is already stored.
    Identical,
    /// Same publisher and content digest under a different signature.
    Republish,
    Distinct,
}

/// A content-centric repository over one store session.
///
/// Construct one per session with [`Repository::open`] and share it by
/// reference or `Arc`. Checkouts and saves belong to the session as a whole,
/// so writes through one repository run one at a time; reads and
/// subscription changes do not wait for them. Writers that need parallelism
/// open one repository per session.
pub struct Repository {
    session: Arc<dyn StoreSession>,
    config: RepositoryConfig,
    root: NodeId,
    versionable_root: AtomicBool,
    writes: Mutex<()>,
    registrations: RwLock<Vec<Registration>>,
}

impl Repository {
    /// Open a repository over an authenticated store session.
    ///
    /// Root capabilities are enabled on a best-effort basis when configured.
    pub fn open(session: Arc<dyn StoreSession>, config: RepositoryConfig) -> RepoResult<Self> {
        config.validate()?;
        let root = session.root()?;
        let repo = Self {
            session,
            config,
            root,
            versionable_root: AtomicBool::new(false),
            writes: Mutex::new(()),
            registrations: RwLock::new(Vec::new()),
        };

        repo.ensure_root_capabilities();
        let versionable = repo.session.has_mixin(root, Mixin::Versionable)?;
        repo.versionable_root.store(versionable, Ordering::SeqCst);

        info!(
            session = %repo.session.session_id(),
            versionable_root = versionable,
            "repository opened"
        );
        Ok(repo)
    }

    pub fn session(&self) -> &Arc<dyn StoreSession> {
        &self.session
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Whether the store root takes part in versioning.
    pub fn versionable_root(&self) -> bool {
        self.versionable_root.load(Ordering::SeqCst)
    }

    pub fn is_root(&self, node: NodeId) -> bool {
        node == self.root
    }

    // ---- Root capabilities ----

    fn ensure_root_capabilities(&self) {
        if !self.config.bootstrap_root_capabilities {
            return;
        }
        if let Err(e) = self.bootstrap_root() {
            warn!(error = %e, "cannot enable root capabilities, continuing without them");
        }
    }

    fn bootstrap_root(&self) -> RepoResult<()> {
        let mut added = Vec::new();
        for mixin in [Mixin::Versionable, Mixin::Referenceable] {
            if self.session.has_mixin(self.root, mixin)? {
                continue;
            }
            if !self.session.can_add_mixin(self.root, mixin)? {
                debug!(mixin = mixin.as_str(), "store cannot add capability to root");
                continue;
            }
            self.session.add_mixin(self.root, mixin)?;
            added.push(mixin.as_str());
        }

        if !added.is_empty() {
            self.session.save()?;
            info!(capabilities = ?added, "enabled root capabilities");
        }
        let versionable = self.session.has_mixin(self.root, Mixin::Versionable)?;
        self.versionable_root.store(versionable, Ordering::SeqCst);
        Ok(())
    }

    // ---- Write protocol ----

    /// Store a signed content object under `name`.
    ///
    /// Intermediate path nodes are created as needed. If a same-name sibling
    /// from the same publisher carries the same signature, the write is
    /// treated as already applied. Otherwise a new sibling leaf is created,
    /// even when only the signature differs.
    pub fn put(
        &self,
        name: &Name,
        authenticator: &Authenticator,
        signature: &Signature,
        content: &[u8],
    ) -> RepoResult<CompleteName> {
        let components: Vec<&[u8]> = name.components().filter(|c| !c.is_empty()).collect();
        let Some((leaf, parents)) = components.split_last() else {
            warn!("rejecting put of a name with no components");
            return Err(RepoError::Input(format!(
                "cannot store content under {name}: the name has no non-empty components"
            )));
        };

        let _write = self.write_guard()?;
        self.ensure_root_capabilities();

        let mut node = self.root;
        for component in parents {
            let segment = encode_component(component);
            node = match self.session.child_nodes(node, Some(&segment))?.into_iter().next() {
                Some(child) => child,
                None => self.add_path_node(node, &segment)?,
            };
        }

        let stored = self.add_leaf_node(
            node,
            &encode_component(leaf),
            authenticator,
            signature,
            content,
        )?;
        debug!(name = %name, node = ?stored, "put complete");
        Ok(CompleteName::new(
            name.clone(),
            authenticator.clone(),
            signature.clone(),
        ))
    }

    /// Serializes write transactions on the shared session.
    fn write_guard(&self) -> RepoResult<MutexGuard<'_, ()>> {
        self.writes
            .lock()
            .map_err(|_| StoreError::Internal("write lock poisoned".into()).into())
    }

    fn should_checkout(&self, parent: NodeId) -> bool {
        self.versionable_root() || !self.is_root(parent)
    }

    /// Enable versioning and referencing on a freshly added node.
    fn prepare_node(&self, node: NodeId) -> RepoResult<()> {
        for mixin in [Mixin::Versionable, Mixin::Referenceable] {
            if !self.session.has_mixin(node, mixin)? && self.session.can_add_mixin(node, mixin)? {
                self.session.add_mixin(node, mixin)?;
            }
        }
        Ok(())
    }

    fn add_path_node(&self, parent: NodeId, segment: &str) -> RepoResult<NodeId> {
        let scope = CheckoutScope::acquire(&*self.session, parent, self.should_checkout(parent))?;

        let created = self
            .session
            .add_child(parent, segment, NodeType::Unstructured)
            .map_err(RepoError::from)
            .and_then(|node| {
                self.prepare_node(node)?;
                self.session.save()?;
                Ok(node)
            });
        let released = scope.release();

        let node = created?;
        released?;
        info!(path = %self.session.node_path(node)?, "created path node");
        Ok(node)
    }

    fn add_leaf_node(
        &self,
        parent: NodeId,
        segment: &str,
        authenticator: &Authenticator,
        signature: &Signature,
        content: &[u8],
    ) -> RepoResult<NodeId> {
        if let Some(existing) = self.find_identical(parent, segment, authenticator, signature)? {
            info!(node = ?existing, "identical content already stored, returning it");
            return Ok(existing);
        }

        let scope = CheckoutScope::acquire(&*self.session, parent, self.should_checkout(parent))?;
        let written = self.write_leaf(parent, segment, authenticator, signature, content);
        let saved = self.session.save().map_err(RepoError::from);
        let released = scope.release();

        let node = written?;
        saved?;
        released?;
        info!(path = %self.session.node_path(node)?, "created content node");
        Ok(node)
    }

    /// Add the leaf and write its properties, removing it again on failure.
    fn write_leaf(
        &self,
        parent: NodeId,
        segment: &str,
        authenticator: &Authenticator,
        signature: &Signature,
        content: &[u8],
    ) -> RepoResult<NodeId> {
        let node = self
            .session
            .add_child(parent, segment, NodeType::Unstructured)?;
        let written = self.prepare_node(node).and_then(|()| {
            write_metadata(&*self.session, node, authenticator, signature, content)
        });

        match written {
            Ok(()) => Ok(node),
            Err(e) => {
                warn!(segment, error = %e, "failed writing content node, rolling back");
                if let Err(rollback) = self.session.remove(node) {
                    warn!(segment, error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    fn find_identical(
        &self,
        parent: NodeId,
        segment: &str,
        authenticator: &Authenticator,
        signature: &Signature,
    ) -> RepoResult<Option<NodeId>> {
        for sibling in self.session.child_nodes(parent, Some(segment))? {
            match self.compare_sibling(sibling, authenticator, signature) {
                Ok(SiblingMatch::Identical) => return Ok(Some(sibling)),
                Ok(SiblingMatch::Republish) => {
                    info!(
                        node = ?sibling,
                        publisher = %authenticator.publisher,
                        "same publisher and content under a new signature, storing as a new sibling"
                    );
                }
                Ok(SiblingMatch::Distinct) => {}
                Err(e) => warn!(node = ?sibling, error = %e, "skipping unreadable sibling"),
            }
        }
        Ok(None)
    }

    fn compare_sibling(
        &self,
        sibling: NodeId,
        authenticator: &Authenticator,
        signature: &Signature,
    ) -> RepoResult<SiblingMatch> {
        let session = &*self.session;
        let attempts = self.config.binary_read_attempts;

        if read_publisher(session, sibling)? != Some(authenticator.publisher) {
            return Ok(SiblingMatch::Distinct);
        }
        let Some(existing) = read_signature(session, sibling, attempts)? else {
            return Ok(SiblingMatch::Distinct);
        };
        if existing == *signature {
            return Ok(SiblingMatch::Identical);
        }
        let digest =
            metadata::read_binary(session, sibling, metadata::CONTENT_HASH_ELEMENT, attempts)?;
        if digest[..] == authenticator.content_digest[..] {
            return Ok(SiblingMatch::Republish);
        }
        Ok(SiblingMatch::Distinct)
    }

    // ---- Queries ----

    fn query(&self, name: &Name, recursive: bool) -> RepoResult<Vec<NodeId>> {
        let statement = build_query(name, recursive);
        let nodes = self
            .session
            .execute_query(&statement, self.config.query_dialect)?;
        debug!(%statement, matches = nodes.len(), "query executed");
        Ok(nodes)
    }

    /// Content stored at `name`, and below it when `recursive` is set.
    ///
    /// With an authenticator, only objects from the same publisher with the
    /// same content type are returned. Nodes that cannot be read are logged
    /// and skipped.
    pub fn get(
        &self,
        name: &Name,
        authenticator: Option<&Authenticator>,
        recursive: bool,
    ) -> RepoResult<Vec<ContentObject>> {
        let attempts = self.config.binary_read_attempts;
        let mut objects = Vec::new();
        for node in self.query(name, recursive)? {
            match read_content_object(&*self.session, node, attempts) {
                Ok(Some(object)) => {
                    let wanted = authenticator.map_or(true, |filter| {
                        filter.publisher == object.authenticator.publisher
                            && filter.content_type == object.authenticator.content_type
                    });
                    if wanted {
                        objects.push(object);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(node = ?node, error = %e, "skipping unreadable node"),
            }
        }
        debug!(name = %name, recursive, results = objects.len(), "get");
        Ok(objects)
    }

    /// Identity records of the content matching an interest.
    pub fn enumerate(&self, interest: &Interest) -> RepoResult<Vec<CompleteName>> {
        let nodes = self.query(&interest.name, interest.recursive)?;
        Ok(self
            .records(nodes, true)
            .into_iter()
            .filter(|record| interest.matches_publisher(record))
            .collect())
    }

    /// Like [`enumerate`](Self::enumerate), but path nodes are included as
    /// bare name records. The publisher filter only applies to content.
    pub fn enumerate_names(&self, interest: &Interest) -> RepoResult<Vec<CompleteName>> {
        let nodes = self.query(&interest.name, interest.recursive)?;
        Ok(self
            .records(nodes, false)
            .into_iter()
            .filter(|record| !record.is_content() || interest.matches_publisher(record))
            .collect())
    }

    /// Records for every child of the nodes at `name`, path nodes included.
    pub fn get_children(&self, name: &CompleteName) -> RepoResult<Vec<CompleteName>> {
        let mut children = Vec::new();
        for node in self.query(&name.name, false)? {
            match self.session.child_nodes(node, None) {
                Ok(nodes) => children.extend(nodes),
                Err(e) => warn!(node = ?node, error = %e, "cannot list children"),
            }
        }
        Ok(self.records(children, false))
    }

    fn records(&self, nodes: Vec<NodeId>, content_only: bool) -> Vec<CompleteName> {
        let session = &*self.session;
        let attempts = self.config.binary_read_attempts;
        let mut records = Vec::new();
        for node in nodes {
            if self.is_root(node) {
                continue;
            }
            if content_only {
                match metadata::is_content_node(session, node) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(node = ?node, error = %e, "skipping unreadable node");
                        continue;
                    }
                }
            }
            match read_complete_name(session, node, attempts) {
                Ok(record) => records.push(record),
                Err(e) => warn!(node = ?node, error = %e, "skipping unreadable node"),
            }
        }
        records
    }

    /// The name a stored node stands for.
    pub fn name_of(&self, node: NodeId) -> RepoResult<Name> {
        read_name(&*self.session, node)
    }

    /// The identity record of a stored node.
    pub fn complete_name_of(&self, node: NodeId) -> RepoResult<CompleteName> {
        read_complete_name(&*self.session, node, self.config.binary_read_attempts)
    }

    // ---- Subscriptions ----

    fn registrations(&self) -> RepoResult<RwLockReadGuard<'_, Vec<Registration>>> {
        self.registrations
            .read()
            .map_err(|_| StoreError::Internal("registration table poisoned".into()).into())
    }

    fn registrations_mut(&self) -> RepoResult<RwLockWriteGuard<'_, Vec<Registration>>> {
        self.registrations
            .write()
            .map_err(|_| StoreError::Internal("registration table poisoned".into()).into())
    }

    /// Register a standing interest.
    ///
    /// Only content written after registration by other sessions is
    /// delivered; existing matches must be fetched with [`get`](Self::get)
    /// or [`enumerate`](Self::enumerate). A registration without a listener
    /// is kept and can be cancelled, but delivers nothing.
    pub fn subscribe(
        &self,
        interest: Interest,
        listener: Option<Arc<dyn InterestListener>>,
    ) -> RepoResult<()> {
        let path = name_to_path(&interest.name);
        let observer = Arc::new(InterestObserver {
            interest: interest.clone(),
            listener: listener.clone(),
            session: Arc::downgrade(&self.session),
            read_attempts: self.config.binary_read_attempts,
        });
        let spec = ObserverSpec {
            mask: self.config.observe_mask,
            path: path.clone(),
            deep: interest.recursive,
            no_local: true,
        };

        let mut registrations = self.registrations_mut()?;
        let id = self
            .session
            .add_observer(observer, spec)
            .map_err(|source| RepoError::Subscription {
                path: path.clone(),
                source,
            })?;
        info!(
            %path,
            recursive = interest.recursive,
            has_listener = listener.is_some(),
            observer = id.as_u64(),
            "interest registered"
        );
        registrations.push(Registration {
            interest,
            listener,
            observer: id,
        });
        Ok(())
    }

    /// Cancel one registration of `interest`.
    ///
    /// With a listener, only a registration holding that exact listener is
    /// removed. Without one, the first registration of the interest is
    /// removed whatever its listener. Cancelling something that is not
    /// registered is a no-op.
    pub fn cancel(
        &self,
        interest: &Interest,
        listener: Option<&Arc<dyn InterestListener>>,
    ) -> RepoResult<()> {
        let mut registrations = self.registrations_mut()?;
        let Some(position) = registrations
            .iter()
            .position(|r| r.is_cancelled_by(interest, listener))
        else {
            debug!(interest = %interest.name, "no registration to cancel");
            return Ok(());
        };

        let observer = registrations[position].observer;
        match self.session.remove_observer(observer) {
            Ok(()) | Err(StoreError::UnknownObserver(_)) => {}
            Err(source) => {
                return Err(RepoError::Subscription {
                    path: name_to_path(&interest.name),
                    source,
                })
            }
        }
        registrations.remove(position);
        info!(interest = %interest.name, observer = observer.as_u64(), "interest cancelled");
        Ok(())
    }

    /// Number of live registrations.
    pub fn subscription_count(&self) -> RepoResult<usize> {
        Ok(self.registrations()?.len())
    }

    // ---- Lifecycle ----

    /// Cancel every registration, save and log out. Failures are logged.
    pub fn shutdown(&self) {
        info!(session = %self.session.session_id(), "shutting down repository");
        match self.registrations_mut() {
            Ok(mut registrations) => {
                for registration in registrations.drain(..) {
                    if let Err(e) = self.session.remove_observer(registration.observer) {
                        debug!(error = %e, "observer already gone");
                    }
                }
            }
            Err(e) => warn!(error = %e, "cannot clear registrations"),
        }
        if let Err(e) = self.session.save() {
            warn!(error = %e, "save on shutdown failed");
        }
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "logout on shutdown failed");
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("session", &self.session.session_id())
            .field("versionable_root", &self.versionable_root())
            .field("subscriptions", &self.subscription_count().ok())
            .finish()
    }
}
