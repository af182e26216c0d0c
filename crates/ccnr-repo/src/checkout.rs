//! Scoped checkout of a parent node for the duration of one mutation.

use ccnr_store::{Mixin, NodeId, StoreError, StoreSession};
use tracing::{info, warn};

use crate::error::RepoResult;

/// Mutation permission on a node, released by checking it back in.
///
/// Call [`release`](Self::release) to observe checkin failures. If the scope
/// is dropped without it (early return, panic), the node is still checked in
/// and failures are logged.
pub struct CheckoutScope<'a> {
    session: &'a dyn StoreSession,
    node: NodeId,
    released: bool,
}

impl<'a> CheckoutScope<'a> {
    /// Check out `node` when `checkout` is set.
    ///
    /// A store that cannot version the node is tolerated: the scope is
    /// returned and the mutation proceeds without version safety.
    pub fn acquire(
        session: &'a dyn StoreSession,
        node: NodeId,
        checkout: bool,
    ) -> RepoResult<Self> {
        if checkout {
            match session.checkout(node) {
                Ok(()) => info!(node = ?node, "checked out parent"),
                Err(StoreError::UnsupportedOperation(reason)) => {
                    warn!(node = ?node, %reason, "store cannot version this node, continuing without checkout");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Self {
            session,
            node,
            released: false,
        })
    }

    /// Check the node back in if it is a checked-out versionable node.
    pub fn release(mut self) -> RepoResult<()> {
        self.released = true;
        check_in(self.session, self.node)
    }
}

fn check_in(session: &dyn StoreSession, node: NodeId) -> RepoResult<()> {
    if session.has_mixin(node, Mixin::Versionable)? && session.is_checked_out(node)? {
        session.checkin(node)?;
        info!(node = ?node, "checked in parent");
    }
    Ok(())
}

impl Drop for CheckoutScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = check_in(self.session, self.node) {
            warn!(node = ?self.node, error = %e, "failed to check in parent on unwind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccnr_store::{InMemoryRepository, MemoryStoreOptions, NodeType};

    fn checked_in_parent(session: &dyn StoreSession) -> NodeId {
        let root = session.root().unwrap();
        let parent = session.add_child(root, "p", NodeType::Unstructured).unwrap();
        session.add_mixin(parent, Mixin::Versionable).unwrap();
        session.checkin(parent).unwrap();
        parent
    }

    #[test]
    fn acquire_then_release() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let parent = checked_in_parent(&*s);

        let scope = CheckoutScope::acquire(&*s, parent, true).unwrap();
        assert!(s.is_checked_out(parent).unwrap());
        s.add_child(parent, "c", NodeType::Unstructured).unwrap();
        scope.release().unwrap();
        assert!(!s.is_checked_out(parent).unwrap());
    }

    #[test]
    fn drop_checks_in() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let parent = checked_in_parent(&*s);
        {
            let _scope = CheckoutScope::acquire(&*s, parent, true).unwrap();
            assert!(s.is_checked_out(parent).unwrap());
        }
        assert!(!s.is_checked_out(parent).unwrap());
    }

    #[test]
    fn skip_checkout_still_checks_in_on_release() {
        let repo = InMemoryRepository::new();
        let s = repo.login();
        let root = s.root().unwrap();
        let parent = s.add_child(root, "p", NodeType::Unstructured).unwrap();
        s.add_mixin(parent, Mixin::Versionable).unwrap();
        assert!(s.is_checked_out(parent).unwrap());

        CheckoutScope::acquire(&*s, parent, false)
            .unwrap()
            .release()
            .unwrap();
        assert!(!s.is_checked_out(parent).unwrap());
    }

    #[test]
    fn unversioned_parent_is_tolerated() {
        let repo = InMemoryRepository::with_options(MemoryStoreOptions {
            versioning: false,
            ..Default::default()
        });
        let s = repo.login();
        let root = s.root().unwrap();
        let parent = s.add_child(root, "p", NodeType::Unstructured).unwrap();

        let scope = CheckoutScope::acquire(&*s, parent, true).unwrap();
        s.add_child(parent, "c", NodeType::Unstructured).unwrap();
        scope.release().unwrap();
    }

    #[test]
    fn conflicting_checkout_fails() {
        let repo = InMemoryRepository::new();
        let s1 = repo.login();
        let s2 = repo.login();
        let parent = checked_in_parent(&*s1);

        let held = CheckoutScope::acquire(&*s1, parent, true).unwrap();
        assert!(CheckoutScope::acquire(&*s2, parent, true).is_err());
        held.release().unwrap();
        assert!(CheckoutScope::acquire(&*s2, parent, true).is_ok());
    }
}
