//! Interest subscription bridge.
//!
//! Each subscription becomes one store observer rooted at the interest's
//! path, deep when the interest is recursive, and always excluding the
//! repository's own session. Raw store events are folded back into the
//! content nodes they touched and forwarded to the listener.

use std::sync::{Arc, Weak};

use ccnr_store::{ObserverId, StoreEvent, StoreEventKind, StoreObserver, StoreSession};
use ccnr_types::{CompleteName, Interest};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::metadata::{is_content_node, read_complete_name};

/// Receiver of content matching a subscribed interest.
///
/// Called on the store's delivery thread. Implementations must not block and
/// must not write to the repository from inside the callback.
pub trait InterestListener: Send + Sync {
    /// Predicate applied to each candidate before delivery.
    fn matches(&self, _candidate: &CompleteName) -> bool {
        true
    }

    /// Receive the new matches from one store save.
    fn handle_results(&self, results: Vec<CompleteName>);
}

/// Listener that forwards each delivery into an unbounded channel.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Vec<CompleteName>>,
}

impl ChannelListener {
    /// A listener paired with the receiving end of its channel.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<CompleteName>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl InterestListener for ChannelListener {
    fn handle_results(&self, results: Vec<CompleteName>) {
        if self.tx.send(results).is_err() {
            debug!("interest receiver dropped, discarding results");
        }
    }
}

/// Returns `true` if both handles point at the same listener.
pub fn same_listener(a: &Arc<dyn InterestListener>, b: &Arc<dyn InterestListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// One live subscription.
pub(crate) struct Registration {
    pub(crate) interest: Interest,
    pub(crate) listener: Option<Arc<dyn InterestListener>>,
    pub(crate) observer: ObserverId,
}

impl Registration {
    /// Whether this registration is the one `cancel(interest, listener)`
    /// refers to. A missing listener matches any registration of the
    /// interest.
    pub(crate) fn is_cancelled_by(
        &self,
        interest: &Interest,
        listener: Option<&Arc<dyn InterestListener>>,
    ) -> bool {
        if self.interest != *interest {
            return false;
        }
        match (listener, &self.listener) {
            (None, _) => true,
            (Some(wanted), Some(registered)) => same_listener(wanted, registered),
            (Some(_), None) => false,
        }
    }
}

/// Store observer bound to one interest.
pub(crate) struct InterestObserver {
    pub(crate) interest: Interest,
    pub(crate) listener: Option<Arc<dyn InterestListener>>,
    pub(crate) session: Weak<dyn StoreSession>,
    pub(crate) read_attempts: u32,
}

impl InterestObserver {
    fn collect(&self, session: &dyn StoreSession, events: &[StoreEvent]) -> Vec<CompleteName> {
        let mut nodes = Vec::new();
        for event in events {
            if event.kind == StoreEventKind::NodeRemoved {
                continue;
            }
            match session.item_node(&event.path) {
                Ok(node) if !nodes.contains(&node) => nodes.push(node),
                Ok(_) => {}
                Err(e) => debug!(path = %event.path, error = %e, "event item no longer resolves"),
            }
        }

        let mut results = Vec::new();
        for node in nodes {
            match is_content_node(session, node) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "cannot inspect notified node");
                    continue;
                }
            }
            match read_complete_name(session, node, self.read_attempts) {
                Ok(name) => results.push(name),
                Err(e) => warn!(error = %e, "skipping unreadable notified node"),
            }
        }
        results
    }
}

impl StoreObserver for InterestObserver {
    fn on_events(&self, events: &[StoreEvent]) {
        let Some(listener) = &self.listener else {
            debug!(interest = %self.interest.name, events = events.len(), "interest has no listener");
            return;
        };
        let Some(session) = self.session.upgrade() else {
            return;
        };

        let results: Vec<CompleteName> = self
            .collect(&*session, events)
            .into_iter()
            .filter(|name| self.interest.matches_publisher(name) && listener.matches(name))
            .collect();
        if results.is_empty() {
            return;
        }
        debug!(interest = %self.interest.name, results = results.len(), "delivering interest matches");
        listener.handle_results(results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccnr_types::Name;

    struct Counting;

    impl InterestListener for Counting {
        fn handle_results(&self, _results: Vec<CompleteName>) {}
    }

    fn registration(interest: Interest, listener: Option<Arc<dyn InterestListener>>) -> Registration {
        Registration {
            interest,
            listener,
            observer: ObserverId::default(),
        }
    }

    #[test]
    fn listener_identity() {
        let a: Arc<dyn InterestListener> = Arc::new(Counting);
        let b: Arc<dyn InterestListener> = Arc::new(Counting);
        assert!(same_listener(&a, &a.clone()));
        assert!(!same_listener(&a, &b));
    }

    #[test]
    fn cancel_matching_rules() {
        let interest = Interest::recursive(Name::from_components([b"a"]));
        let other = Interest::new(Name::from_components([b"b"]));
        let a: Arc<dyn InterestListener> = Arc::new(Counting);
        let b: Arc<dyn InterestListener> = Arc::new(Counting);

        let with_a = registration(interest.clone(), Some(a.clone()));
        assert!(with_a.is_cancelled_by(&interest, Some(&a)));
        assert!(!with_a.is_cancelled_by(&interest, Some(&b)));
        assert!(with_a.is_cancelled_by(&interest, None));
        assert!(!with_a.is_cancelled_by(&other, None));

        let anonymous = registration(interest.clone(), None);
        assert!(anonymous.is_cancelled_by(&interest, None));
        assert!(!anonymous.is_cancelled_by(&interest, Some(&a)));
    }

    #[test]
    fn channel_listener_forwards_batches() {
        let (listener, mut rx) = ChannelListener::channel();
        let name = CompleteName::name_only(Name::from_components([b"x"]));
        listener.handle_results(vec![name.clone()]);
        assert_eq!(rx.try_recv().unwrap(), vec![name]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_listener_tolerates_dropped_receiver() {
        let (listener, rx) = ChannelListener::channel();
        drop(rx);
        listener.handle_results(vec![]);
    }

    #[test]
    fn default_predicate_accepts() {
        let name = CompleteName::name_only(Name::root());
        assert!(Counting.matches(&name));
    }
}
