//! Provider registry: object id to (provider, linked nodes).
//!
//! Unlike the consumer side, an object may be linked from many nodes at once;
//! notifications fan out to all of them.

use super::{ObjectProvider, ProviderNode};
use crate::id::{next_registry_id, NodeId};
use crate::identifier::join;
use crate::message::{Args, Message, Props};
use objectlink_types::{LinkError, LinkResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

/// Creates a provider on demand for an object id without one.
pub type ProviderFactory = Arc<dyn Fn(&str) -> Option<Arc<dyn ObjectProvider>> + Send + Sync>;

#[derive(Clone)]
struct LinkedNode {
    id: NodeId,
    node: Weak<ProviderNode>,
}

#[derive(Default)]
struct ProviderEntry {
    provider: Option<Arc<dyn ObjectProvider>>,
    nodes: Vec<LinkedNode>,
}

/// Thread-safe registry of providers and the nodes linked to each.
#[derive(Clone)]
pub struct ProviderRegistry {
    id: Arc<str>,
    entries: Arc<RwLock<HashMap<String, ProviderEntry>>>,
    factory: Arc<RwLock<Option<ProviderFactory>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let id = next_registry_id();
        debug!(registry = %id, "Created provider registry");
        Self {
            id: id.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(RwLock::new(None)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Install or clear the fallback provider factory.
    pub fn set_provider_factory(&self, factory: Option<ProviderFactory>) {
        let mut slot = self.factory.write().unwrap_or_else(|e| e.into_inner());
        *slot = factory;
    }

    /// Register a provider under its own object id.
    pub fn add_provider(&self, provider: Arc<dyn ObjectProvider>) -> LinkResult<()> {
        let object_id = provider.object_id().to_string();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(object_id.clone()).or_default();
        if entry.provider.is_some() {
            return Err(LinkError::DuplicateProvider(object_id));
        }
        info!(registry = %self.id, object_id = %object_id, "Added provider");
        entry.provider = Some(provider);
        Ok(())
    }

    /// Forget the provider and all links for `object_id`.
    pub fn remove_provider(&self, object_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(object_id).is_none() {
            warn!(registry = %self.id, object_id, "No provider to remove");
            return;
        }
        info!(registry = %self.id, object_id, "Removed provider");
    }

    /// The provider for `object_id`, created through the factory if needed.
    pub fn provider(&self, object_id: &str) -> Option<Arc<dyn ObjectProvider>> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(provider) = entries.get(object_id).and_then(|e| e.provider.as_ref()) {
                return Some(Arc::clone(provider));
            }
        }

        let factory = {
            let slot = self.factory.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        }?;
        debug!(registry = %self.id, object_id, "Creating provider via factory");
        let created = factory(object_id)?;

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(object_id.to_string()).or_default();
        let provider = entry.provider.get_or_insert(created);
        Some(Arc::clone(provider))
    }

    /// Whether an entry exists for `object_id`.
    pub fn is_registered(&self, object_id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(object_id)
    }

    /// Add `node` to the fan-out list of `object_id`.
    pub fn link_node(&self, object_id: &str, node: &Arc<ProviderNode>) -> LinkResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = entries.entry(object_id.to_string()).or_default();
        if entry.nodes.iter().any(|linked| &linked.id == node.id()) {
            return Err(LinkError::AlreadyLinked {
                object_id: object_id.to_string(),
                node: node.id().to_string(),
            });
        }
        entry.nodes.push(LinkedNode {
            id: node.id().clone(),
            node: Arc::downgrade(node),
        });
        debug!(registry = %self.id, object_id, node = %node.id(), links = entry.nodes.len(), "Linked node");
        Ok(())
    }

    /// Remove `node_id` from the fan-out list of `object_id`, if present.
    pub fn unlink_node(&self, object_id: &str, node_id: &NodeId) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(object_id) {
            entry.nodes.retain(|linked| &linked.id != node_id);
        }
        debug!(registry = %self.id, object_id, node = %node_id, "Unlinked node");
    }

    /// Snapshot of the live nodes linked to `object_id`.
    pub fn nodes_for(&self, object_id: &str) -> Vec<Arc<ProviderNode>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(object_id)
            .map(|entry| {
                entry
                    .nodes
                    .iter()
                    .filter_map(|linked| linked.node.upgrade())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove `node_id` from every fan-out list.
    pub fn detach_node(&self, node_id: &NodeId) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut cleared = 0;
        for entry in entries.values_mut() {
            let before = entry.nodes.len();
            entry.nodes.retain(|linked| &linked.id != node_id);
            cleared += before - entry.nodes.len();
        }
        if cleared > 0 {
            info!(registry = %self.id, node = %node_id, cleared, "Detached node");
        }
    }

    /// Send one `PropertyChange` per entry of `props` to every linked node.
    pub async fn notify_property_change(&self, object_id: &str, props: Props) {
        let nodes = self.nodes_for(object_id);
        debug!(registry = %self.id, object_id, nodes = nodes.len(), "Fan-out property change");
        for node in nodes {
            for (name, value) in &props {
                let msg = Message::property_change(join(object_id, name), value.clone());
                if let Err(e) = node.send_message(&msg).await {
                    warn!(node = %node.id(), object_id, error = %e, "Property change not delivered");
                }
            }
        }
    }

    /// Send a `Signal` to every linked node.
    pub async fn notify_signal(&self, object_id: &str, name: &str, args: Args) {
        let nodes = self.nodes_for(object_id);
        debug!(registry = %self.id, object_id, signal = name, nodes = nodes.len(), "Fan-out signal");
        let msg = Message::signal(join(object_id, name), args);
        for node in nodes {
            if let Err(e) = node.send_message(&msg).await {
                warn!(node = %node.id(), object_id, error = %e, "Signal not delivered");
            }
        }
    }

    /// Snapshot of all object ids with an entry.
    pub fn object_ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.keys().cloned().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ProviderRegistry")
            .field("id", &self.id)
            .field("entries", &entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::MessageConverter;
    use crate::message::Value;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixed {
        object_id: String,
    }

    fn fixed(object_id: &str) -> Arc<dyn ObjectProvider> {
        Arc::new(Fixed {
            object_id: object_id.to_string(),
        })
    }

    #[async_trait]
    impl ObjectProvider for Fixed {
        fn object_id(&self) -> &str {
            &self.object_id
        }
        async fn invoke(&self, _member: &str, _args: Args) -> Result<Value, String> {
            Ok(Value::Null)
        }
        async fn set_property(&self, _member: &str, _value: Value) -> Result<(), String> {
            Ok(())
        }
        async fn collect_properties(&self) -> Result<Props, String> {
            Ok(Props::new())
        }
    }

    fn node_with_output(
        registry: &ProviderRegistry,
    ) -> (Arc<ProviderNode>, mpsc::Receiver<Vec<u8>>) {
        let node = ProviderNode::spawn(registry.clone(), MessageConverter::default(), 8);
        let (tx, rx) = mpsc::channel(16);
        node.set_output(Arc::new(tx));
        (node, rx)
    }

    #[test]
    fn test_add_and_duplicate_provider() {
        let registry = ProviderRegistry::new();
        let first = fixed("demo.Counter");
        registry.add_provider(Arc::clone(&first)).unwrap();

        let err = registry.add_provider(fixed("demo.Counter")).unwrap_err();
        assert!(matches!(err, LinkError::DuplicateProvider(id) if id == "demo.Counter"));
        assert!(Arc::ptr_eq(&registry.provider("demo.Counter").unwrap(), &first));
    }

    #[test]
    fn test_factory_backed_provider() {
        let registry = ProviderRegistry::new();
        assert!(registry.provider("demo.Lazy").is_none());
        registry.set_provider_factory(Some(Arc::new(|id: &str| {
            id.starts_with("demo.").then(|| fixed(id))
        })));

        let a = registry.provider("demo.Lazy").unwrap();
        let b = registry.provider("demo.Lazy").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.provider("other.Thing").is_none());
        assert!(registry.is_registered("demo.Lazy"));
    }

    #[test]
    fn test_remove_provider() {
        let registry = ProviderRegistry::new();
        registry.add_provider(fixed("demo.Counter")).unwrap();
        registry.remove_provider("demo.Counter");
        registry.remove_provider("demo.Counter");
        assert!(!registry.is_registered("demo.Counter"));
        assert!(registry.provider("demo.Counter").is_none());
    }

    #[tokio::test]
    async fn test_link_node_at_most_once() {
        let registry = ProviderRegistry::new();
        let (node, _rx) = node_with_output(&registry);

        registry.link_node("demo.Counter", &node).unwrap();
        let err = registry.link_node("demo.Counter", &node).unwrap_err();
        assert!(matches!(err, LinkError::AlreadyLinked { .. }));
        assert_eq!(registry.nodes_for("demo.Counter").len(), 1);

        registry.unlink_node("demo.Counter", node.id());
        registry.unlink_node("demo.Counter", node.id());
        assert!(registry.nodes_for("demo.Counter").is_empty());
    }

    #[tokio::test]
    async fn test_detach_node_is_idempotent() {
        let registry = ProviderRegistry::new();
        let (a, _rx_a) = node_with_output(&registry);
        let (b, _rx_b) = node_with_output(&registry);
        registry.link_node("x.One", &a).unwrap();
        registry.link_node("x.Two", &a).unwrap();
        registry.link_node("x.Two", &b).unwrap();

        registry.detach_node(a.id());
        let once: Vec<_> = registry.nodes_for("x.Two").iter().map(|n| n.id().clone()).collect();
        registry.detach_node(a.id());
        let twice: Vec<_> = registry.nodes_for("x.Two").iter().map(|n| n.id().clone()).collect();

        assert_eq!(once, twice);
        assert_eq!(once, vec![b.id().clone()]);
        assert!(registry.nodes_for("x.One").is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_property_change() {
        let registry = ProviderRegistry::new();
        let (n1, mut rx1) = node_with_output(&registry);
        let (n2, mut rx2) = node_with_output(&registry);
        registry.link_node("demo.Counter", &n1).unwrap();
        registry.link_node("demo.Counter", &n2).unwrap();

        let mut props = Props::new();
        props.insert("x".to_string(), json!(5));
        registry.notify_property_change("demo.Counter", props).await;

        let conv = MessageConverter::default();
        let expected = Message::property_change("demo.Counter/x", json!(5));
        for rx in [&mut rx1, &mut rx2] {
            let msg = conv.decode(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(msg, expected);
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_fan_out_signal() {
        let registry = ProviderRegistry::new();
        let (n1, mut rx1) = node_with_output(&registry);
        registry.link_node("demo.Counter", &n1).unwrap();

        registry
            .notify_signal("demo.Counter", "changed", vec![json!(3)])
            .await;
        let msg = MessageConverter::default()
            .decode(&rx1.recv().await.unwrap())
            .unwrap();
        assert_eq!(msg, Message::signal("demo.Counter/changed", vec![json!(3)]));
    }

    #[tokio::test]
    async fn test_dropped_node_not_in_snapshot() {
        let registry = ProviderRegistry::new();
        let (node, _rx) = node_with_output(&registry);
        registry.link_node("demo.Counter", &node).unwrap();
        drop(node);
        assert!(registry.nodes_for("demo.Counter").is_empty());
    }
}
