//! Schema-less objects and the proxy that pairs both registries.
//!
//! [`MetaObserver`] mirrors any remote object into a property bag without a
//! generated type. [`MetaProvider`] serves a property bag plus a table of
//! invoke handlers. A [`Proxy`] owns one consumer and one provider registry
//! so a process can link to objects on one side and re-serve them on the
//! other.

use crate::consumer::{ConsumerNode, ConsumerRegistry, ObjectObserver, ReplyFn};
use crate::converter::MessageConverter;
use crate::identifier::{join, split_member};
use crate::message::{Args, Props, Value};
use crate::provider::{ObjectProvider, ProviderNode, ProviderRegistry};
use async_trait::async_trait;
use objectlink_types::{LinkError, LinkResult, WireFormat};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Called with the member name and new value of a changed property.
pub type ChangeFn = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Called with the member name and arguments of a received signal.
pub type SignalFn = Box<dyn Fn(&str, &Args) + Send + Sync>;

/// Answers one method of a [`MetaProvider`].
pub type InvokeHandler = Arc<dyn Fn(Args) -> Result<Value, String> + Send + Sync>;

/// Observer that keeps the last known properties of any remote object.
pub struct MetaObserver {
    object_id: String,
    properties: Mutex<Props>,
    node: Mutex<Option<Weak<ConsumerNode>>>,
    on_change: Option<ChangeFn>,
    on_signal: Option<SignalFn>,
}

impl MetaObserver {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            properties: Mutex::new(Props::new()),
            node: Mutex::new(None),
            on_change: None,
            on_signal: None,
        }
    }

    /// Run `f` after every property change.
    pub fn with_change(mut self, f: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(f));
        self
    }

    /// Run `f` for every signal.
    pub fn with_signal(mut self, f: impl Fn(&str, &Args) + Send + Sync + 'static) -> Self {
        self.on_signal = Some(Box::new(f));
        self
    }

    /// Snapshot of the mirrored properties.
    pub fn properties(&self) -> Props {
        self.properties.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        let props = self.properties.lock().unwrap_or_else(|e| e.into_inner());
        props.get(name).cloned()
    }

    /// Whether an `Init` arrived and the serving node is still alive.
    pub fn is_linked(&self) -> bool {
        self.linked_node().is_some()
    }

    fn linked_node(&self) -> Option<Arc<ConsumerNode>> {
        let slot = self.node.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().and_then(Weak::upgrade)
    }

    /// Invoke `member` on the remote object through the linked node.
    pub async fn invoke(&self, member: &str, args: Args, on_reply: Option<ReplyFn>) -> LinkResult<u64> {
        let node = self.linked_node().ok_or(LinkError::ConnectionClosed)?;
        node.invoke_remote(&join(&self.object_id, member), args, on_reply)
            .await
    }

    /// Invoke `member` and wait for the result.
    pub async fn call(&self, member: &str, args: Args, timeout: Duration) -> LinkResult<Value> {
        let node = self.linked_node().ok_or(LinkError::ConnectionClosed)?;
        node.call(&join(&self.object_id, member), args, timeout).await
    }

    /// Ask the remote object to change `member`.
    pub async fn set_property(&self, member: &str, value: Value) -> LinkResult<()> {
        let node = self.linked_node().ok_or(LinkError::ConnectionClosed)?;
        node.set_remote_property(&join(&self.object_id, member), value)
            .await
    }
}

impl ObjectObserver for MetaObserver {
    fn object_id(&self) -> &str {
        &self.object_id
    }

    fn on_init(&self, object_id: &str, props: Props, node: &Arc<ConsumerNode>) {
        debug!(object_id, props = props.len(), node = %node.id(), "Meta observer initialized");
        *self.properties.lock().unwrap_or_else(|e| e.into_inner()) = props;
        *self.node.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(node));
    }

    fn on_property_change(&self, symbol_id: &str, value: Value) {
        let name = split_member(symbol_id);
        {
            let mut props = self.properties.lock().unwrap_or_else(|e| e.into_inner());
            props.insert(name.to_string(), value.clone());
        }
        if let Some(f) = &self.on_change {
            f(name, &value);
        }
    }

    fn on_signal(&self, symbol_id: &str, args: Args) {
        if let Some(f) = &self.on_signal {
            f(split_member(symbol_id), &args);
        }
    }

    fn on_release(&self) {
        *self.node.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl std::fmt::Debug for MetaObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaObserver")
            .field("object_id", &self.object_id)
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Provider backed by a property bag and per-method handlers.
pub struct MetaProvider {
    object_id: String,
    properties: Mutex<Props>,
    handlers: RwLock<HashMap<String, InvokeHandler>>,
}

impl MetaProvider {
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            properties: Mutex::new(Props::new()),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Start from `props` instead of an empty bag.
    pub fn with_properties(mut self, props: Props) -> Self {
        self.properties = Mutex::new(props);
        self
    }

    /// Answer invocations of `method` with `handler`, replacing any earlier one.
    pub fn on_invoke(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Args) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(method.into(), Arc::new(handler));
    }

    pub fn properties(&self) -> Props {
        self.properties.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Update `name` locally and push the change to every node linked
    /// through `registry`.
    pub async fn publish(&self, registry: &ProviderRegistry, name: &str, value: Value) {
        {
            let mut props = self.properties.lock().unwrap_or_else(|e| e.into_inner());
            props.insert(name.to_string(), value.clone());
        }
        let mut change = Props::new();
        change.insert(name.to_string(), value);
        registry.notify_property_change(&self.object_id, change).await;
    }
}

#[async_trait]
impl ObjectProvider for MetaProvider {
    fn object_id(&self) -> &str {
        &self.object_id
    }

    async fn invoke(&self, member: &str, args: Args) -> Result<Value, String> {
        let handler = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(member).cloned()
        };
        match handler {
            Some(handler) => handler(args),
            None => {
                warn!(object_id = %self.object_id, member, "No handler for method");
                Err(format!("unknown method {member}"))
            }
        }
    }

    async fn set_property(&self, member: &str, value: Value) -> Result<(), String> {
        let mut props = self.properties.lock().unwrap_or_else(|e| e.into_inner());
        props.insert(member.to_string(), value);
        Ok(())
    }

    async fn linked(&self, object_id: &str, node: &Arc<ProviderNode>) -> Result<(), String> {
        debug!(object_id, node = %node.id(), "Meta provider linked");
        Ok(())
    }

    async fn collect_properties(&self) -> Result<Props, String> {
        Ok(self.properties())
    }
}

impl std::fmt::Debug for MetaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MetaProvider")
            .field("object_id", &self.object_id)
            .field("handlers", &handlers.len())
            .finish()
    }
}

/// One consumer registry and one provider registry sharing a wire format.
#[derive(Debug, Clone)]
pub struct Proxy {
    converter: MessageConverter,
    consumers: ConsumerRegistry,
    providers: ProviderRegistry,
}

impl Proxy {
    pub fn new(format: WireFormat) -> Self {
        let proxy = Self {
            converter: MessageConverter::new(format),
            consumers: ConsumerRegistry::new(),
            providers: ProviderRegistry::new(),
        };
        info!(
            format = %format,
            consumers = %proxy.consumers.id(),
            providers = %proxy.providers.id(),
            "Created proxy"
        );
        proxy
    }

    pub fn converter(&self) -> MessageConverter {
        self.converter
    }

    pub fn consumer_registry(&self) -> &ConsumerRegistry {
        &self.consumers
    }

    pub fn provider_registry(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// A consumer node on the proxy's consumer registry. Attach its output
    /// before use.
    pub fn create_consumer_node(&self) -> Arc<ConsumerNode> {
        ConsumerNode::new(self.consumers.clone(), self.converter)
    }

    /// A provider node on the proxy's provider registry. Must be called
    /// inside a Tokio runtime.
    pub fn create_provider_node(&self, queue: usize) -> Arc<ProviderNode> {
        ProviderNode::spawn(self.providers.clone(), self.converter, queue)
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new(WireFormat::default())
    }
}
