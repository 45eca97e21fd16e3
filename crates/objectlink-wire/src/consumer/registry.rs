//! Consumer registry: object id to (observer, serving node).
//!
//! Each object id maps to at most one observer and at most one node. Node
//! references are weak: the connection layer owns nodes, and a closing node
//! clears itself from every entry through [`ConsumerRegistry::detach_node`].

use super::{ConsumerNode, ObjectObserver};
use crate::id::{next_registry_id, NodeId};
use objectlink_types::{LinkError, LinkResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

/// Creates an observer on demand for an object id without one.
pub type ObserverFactory = Arc<dyn Fn(&str) -> Option<Arc<dyn ObjectObserver>> + Send + Sync>;

#[derive(Clone)]
struct LinkedNode {
    id: NodeId,
    node: Weak<ConsumerNode>,
}

#[derive(Default)]
struct ObserverEntry {
    observer: Option<Arc<dyn ObjectObserver>>,
    node: Option<LinkedNode>,
}

/// Thread-safe registry of observers and the nodes currently serving them.
#[derive(Clone)]
pub struct ConsumerRegistry {
    id: Arc<str>,
    entries: Arc<RwLock<HashMap<String, ObserverEntry>>>,
    factory: Arc<RwLock<Option<ObserverFactory>>>,
}

impl ConsumerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        let id = next_registry_id();
        debug!(registry = %id, "Created consumer registry");
        Self {
            id: id.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(RwLock::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Install or clear the fallback observer factory.
    pub fn set_observer_factory(&self, factory: Option<ObserverFactory>) {
        let mut slot = self.factory.write().unwrap_or_else(|e| e.into_inner());
        *slot = factory;
    }

    /// Register an observer under its own object id.
    pub fn add_observer(&self, observer: Arc<dyn ObjectObserver>) -> LinkResult<()> {
        let object_id = observer.object_id().to_string();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(object_id.clone()).or_default();
        if entry.observer.is_some() {
            return Err(LinkError::DuplicateObserver(object_id));
        }
        debug!(registry = %self.id, object_id = %object_id, "Added observer");
        entry.observer = Some(observer);
        Ok(())
    }

    /// Forget and release the observer for `object_id`. Missing ids are a no-op.
    ///
    /// The entry is gone before `on_release` runs, so the hook may call back
    /// into the registry.
    pub fn remove_observer(&self, object_id: &str) {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.remove(object_id)
        };
        match removed.and_then(|entry| entry.observer) {
            Some(observer) => {
                info!(registry = %self.id, object_id, "Removed observer");
                observer.on_release();
            }
            None => warn!(registry = %self.id, object_id, "No observer to release"),
        }
    }

    /// The observer for `object_id`, created through the factory if needed.
    pub fn observer(&self, object_id: &str) -> Option<Arc<dyn ObjectObserver>> {
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry(object_id.to_string()).or_default();
            if let Some(observer) = &entry.observer {
                return Some(Arc::clone(observer));
            }
        }

        let factory = {
            let slot = self.factory.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        }?;
        debug!(registry = %self.id, object_id, "Creating observer via factory");
        let created = factory(object_id)?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(object_id.to_string()).or_default();
        // Another caller may have registered one while the factory ran.
        let observer = entry.observer.get_or_insert(created);
        Some(Arc::clone(observer))
    }

    /// Whether an entry exists for `object_id`.
    pub fn is_registered(&self, object_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(object_id)
    }

    /// Record `node` as the node serving `object_id`.
    pub fn link_node(&self, object_id: &str, node: &Arc<ConsumerNode>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(object_id.to_string()).or_default().node = Some(LinkedNode {
            id: node.id().clone(),
            node: Arc::downgrade(node),
        });
        debug!(registry = %self.id, object_id, node = %node.id(), "Linked node");
    }

    /// Forget which node serves `object_id`.
    pub fn unlink_node(&self, object_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(object_id) {
            entry.node = None;
        }
        debug!(registry = %self.id, object_id, "Unlinked node");
    }

    /// The node currently serving `object_id`, if it is still alive.
    pub fn node(&self, object_id: &str) -> Option<Arc<ConsumerNode>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(object_id)
            .and_then(|e| e.node.as_ref())
            .and_then(|linked| linked.node.upgrade())
    }

    /// Clear `node_id` from every entry, keeping the observers.
    pub fn detach_node(&self, node_id: &NodeId) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut cleared = 0;
        for entry in entries.values_mut() {
            if entry.node.as_ref().is_some_and(|linked| &linked.id == node_id) {
                entry.node = None;
                cleared += 1;
            }
        }
        if cleared > 0 {
            info!(registry = %self.id, node = %node_id, cleared, "Detached node");
        }
    }

    /// Snapshot of all object ids with an entry.
    pub fn object_ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ConsumerRegistry")
            .field("id", &self.id)
            .field("entries", &entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::MessageConverter;
    use crate::message::{Args, Props, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestObserver {
        object_id: String,
        released: AtomicUsize,
    }

    impl TestObserver {
        fn new(object_id: &str) -> Arc<Self> {
            Arc::new(Self {
                object_id: object_id.to_string(),
                released: AtomicUsize::new(0),
            })
        }
    }

    impl ObjectObserver for TestObserver {
        fn object_id(&self) -> &str {
            &self.object_id
        }
        fn on_init(&self, _object_id: &str, _props: Props, _node: &Arc<ConsumerNode>) {}
        fn on_property_change(&self, _symbol_id: &str, _value: Value) {}
        fn on_signal(&self, _symbol_id: &str, _args: Args) {}
        fn on_release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_and_get_observer() {
        let registry = ConsumerRegistry::new();
        registry.add_observer(TestObserver::new("demo.Counter")).unwrap();

        let observer = registry.observer("demo.Counter").unwrap();
        assert_eq!(observer.object_id(), "demo.Counter");
        assert!(registry.is_registered("demo.Counter"));
    }

    #[test]
    fn test_duplicate_observer_rejected() {
        let registry = ConsumerRegistry::new();
        let first = TestObserver::new("demo.Counter");
        registry.add_observer(first.clone()).unwrap();

        let err = registry
            .add_observer(TestObserver::new("demo.Counter"))
            .unwrap_err();
        assert!(matches!(err, LinkError::DuplicateObserver(id) if id == "demo.Counter"));

        let kept = registry.observer("demo.Counter").unwrap();
        let first_dyn: Arc<dyn ObjectObserver> = first;
        assert!(Arc::ptr_eq(&kept, &first_dyn));
    }

    #[test]
    fn test_remove_releases_once() {
        let registry = ConsumerRegistry::new();
        let observer = TestObserver::new("demo.Counter");
        registry.add_observer(observer.clone()).unwrap();

        registry.remove_observer("demo.Counter");
        registry.remove_observer("demo.Counter");
        assert_eq!(observer.released.load(Ordering::SeqCst), 1);
        assert!(!registry.is_registered("demo.Counter"));
    }

    /// Calls back into its registry from every hook.
    struct Reentrant {
        object_id: String,
        registry: ConsumerRegistry,
        released: AtomicUsize,
        replacement: Arc<TestObserver>,
        seen_changes: AtomicUsize,
    }

    impl ObjectObserver for Reentrant {
        fn object_id(&self) -> &str {
            &self.object_id
        }
        fn on_init(&self, _object_id: &str, _props: Props, _node: &Arc<ConsumerNode>) {}
        fn on_property_change(&self, _symbol_id: &str, _value: Value) {
            if self.registry.observer(&self.object_id).is_some() {
                self.seen_changes.fetch_add(1, Ordering::SeqCst);
            }
            self.registry.remove_observer(&self.object_id);
        }
        fn on_signal(&self, _symbol_id: &str, _args: Args) {}
        fn on_release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
            // A second remove from inside the hook finds nothing left.
            self.registry.remove_observer(&self.object_id);
            let _ = self.registry.add_observer(self.replacement.clone());
        }
    }

    fn reentrant(registry: &ConsumerRegistry) -> Arc<Reentrant> {
        Arc::new(Reentrant {
            object_id: "demo.Counter".to_string(),
            registry: registry.clone(),
            released: AtomicUsize::new(0),
            replacement: TestObserver::new("demo.Counter"),
            seen_changes: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_release_hook_can_reenter_registry() {
        let registry = ConsumerRegistry::new();
        let observer = reentrant(&registry);
        registry.add_observer(observer.clone()).unwrap();

        registry.remove_observer("demo.Counter");
        assert_eq!(observer.released.load(Ordering::SeqCst), 1);

        // The observer added from the hook survives the outer remove.
        let kept = registry.observer("demo.Counter").unwrap();
        let replacement: Arc<dyn ObjectObserver> = observer.replacement.clone();
        assert!(Arc::ptr_eq(&kept, &replacement));
        assert_eq!(observer.replacement.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delivered_change_can_remove_its_observer() {
        let registry = ConsumerRegistry::new();
        let observer = reentrant(&registry);
        registry.add_observer(observer.clone()).unwrap();
        let conv = MessageConverter::default();
        let node = ConsumerNode::new(registry.clone(), conv);

        let change = conv
            .encode(&crate::message::Message::property_change(
                "demo.Counter/count",
                Value::from(3),
            ))
            .unwrap();
        node.deliver(&change).unwrap();

        assert_eq!(observer.seen_changes.load(Ordering::SeqCst), 1);
        assert_eq!(observer.released.load(Ordering::SeqCst), 1);
        assert!(registry.observer("demo.Counter").is_some());
    }

    #[test]
    fn test_factory_creates_and_stores() {
        let registry = ConsumerRegistry::new();
        assert!(registry.observer("demo.Lazy").is_none());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.set_observer_factory(Some(Arc::new(move |id: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(TestObserver::new(id) as Arc<dyn ObjectObserver>)
        })));

        let a = registry.observer("demo.Lazy").unwrap();
        let b = registry.observer("demo.Lazy").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        registry.set_observer_factory(None);
        assert!(registry.observer("demo.Other").is_none());
    }

    #[test]
    fn test_link_unlink_detach_node() {
        let registry = ConsumerRegistry::new();
        registry.add_observer(TestObserver::new("a.One")).unwrap();
        registry.add_observer(TestObserver::new("a.Two")).unwrap();
        let node = ConsumerNode::new(registry.clone(), MessageConverter::default());

        registry.link_node("a.One", &node);
        registry.link_node("a.Two", &node);
        assert_eq!(registry.node("a.One").unwrap().id(), node.id());

        registry.unlink_node("a.One");
        assert!(registry.node("a.One").is_none());
        assert!(registry.node("a.Two").is_some());

        registry.detach_node(node.id());
        registry.detach_node(node.id());
        assert!(registry.node("a.Two").is_none());
        assert!(registry.observer("a.Two").is_some());
    }

    #[test]
    fn test_object_ids_snapshot() {
        let registry = ConsumerRegistry::new();
        registry.add_observer(TestObserver::new("a.One")).unwrap();
        registry.add_observer(TestObserver::new("a.Two")).unwrap();
        let mut ids = registry.object_ids();
        ids.sort();
        assert_eq!(ids, vec!["a.One".to_string(), "a.Two".to_string()]);
    }
}
