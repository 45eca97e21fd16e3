//! Provider node: answers one connection's requests against the registry.
//!
//! Inbound messages are queued and drained by a single task per node, so
//! provider callbacks for one connection never overlap.

use super::registry::ProviderRegistry;
use crate::converter::MessageConverter;
use crate::id::NodeId;
use crate::identifier::{split_member, split_object_id};
use crate::message::{Args, Message, MsgType, Props, Value};
use crate::transport::{Endpoint, MessageSink};
use async_trait::async_trait;
use objectlink_types::{LinkError, LinkResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Server endpoint for one connection.
pub struct ProviderNode {
    id: NodeId,
    registry: ProviderRegistry,
    converter: MessageConverter,
    output: RwLock<Option<Arc<dyn MessageSink>>>,
    inbound: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    this: Weak<ProviderNode>,
}

impl ProviderNode {
    /// Create a node and start its processing task.
    ///
    /// `queue` bounds the inbound queue; a full queue makes the transport's
    /// read side wait.
    pub fn spawn(registry: ProviderRegistry, converter: MessageConverter, queue: usize) -> Arc<Self> {
        let (inbound, inbound_rx) = mpsc::channel(queue.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let node = Arc::new_cyclic(|this| Self {
            id: NodeId::next(),
            registry,
            converter,
            output: RwLock::new(None),
            inbound,
            shutdown,
            closed: AtomicBool::new(false),
            this: this.clone(),
        });
        debug!(node = %node.id, registry = %node.registry.id(), "Provider node started");
        tokio::spawn(Self::process_loop(
            Arc::downgrade(&node),
            inbound_rx,
            shutdown_rx,
        ));
        node
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn set_output(&self, output: Arc<dyn MessageSink>) {
        let mut slot = self.output.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(output);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue one raw message for processing.
    pub async fn deliver(&self, data: Vec<u8>) -> LinkResult<()> {
        if self.is_closed() {
            return Err(LinkError::ConnectionClosed);
        }
        self.inbound
            .send(data)
            .await
            .map_err(|_| LinkError::ConnectionClosed)
    }

    /// Encode and write one message to this node's connection.
    pub async fn send_message(&self, msg: &Message) -> LinkResult<()> {
        if self.is_closed() {
            return Err(LinkError::ConnectionClosed);
        }
        let output = {
            let slot = self.output.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        };
        let Some(output) = output else {
            warn!(node = %self.id, kind = %msg.msg_type(), "No output attached, message dropped");
            return Err(LinkError::NoOutput);
        };
        let data = self.converter.encode(msg)?;
        debug!(node = %self.id, kind = %msg.msg_type(), "-> send");
        if let Err(e) = output.write(data).await {
            error!(node = %self.id, error = %e, "Write failed, closing node");
            self.close();
            return Err(e);
        }
        Ok(())
    }

    /// Broadcast a property change to every node linked to the symbol's object.
    pub async fn notify_property_change(&self, symbol_id: &str, value: Value) {
        let mut props = Props::new();
        props.insert(split_member(symbol_id).to_string(), value);
        self.registry
            .notify_property_change(split_object_id(symbol_id), props)
            .await;
    }

    /// Broadcast a signal to every node linked to the symbol's object.
    pub async fn notify_signal(&self, symbol_id: &str, args: Args) {
        self.registry
            .notify_signal(split_object_id(symbol_id), split_member(symbol_id), args)
            .await;
    }

    /// Detach from the registry and stop processing. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.detach_node(&self.id);
        let _ = self.shutdown.send(true);
        let mut slot = self.output.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        info!(node = %self.id, "Provider node closed");
    }

    async fn process_loop(
        node: Weak<Self>,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let data = tokio::select! {
                _ = shutdown.changed() => break,
                next = inbound.recv() => match next {
                    Some(data) => data,
                    None => break,
                },
            };
            let Some(node) = node.upgrade() else { break };
            node.handle(&data).await;
        }
        debug!("Provider node processing stopped");
    }

    async fn handle(&self, data: &[u8]) {
        let msg = match self.converter.decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(node = %self.id, error = %e, "Dropped undecodable message");
                return;
            }
        };
        debug!(node = %self.id, kind = %msg.msg_type(), "<- received");

        let result = match msg {
            Message::Link { object_id } => self.handle_link(&object_id).await,
            Message::Unlink { object_id } => {
                info!(node = %self.id, object_id = %object_id, "Unlinked");
                self.registry.unlink_node(&object_id, &self.id);
                Ok(())
            }
            Message::SetProperty { symbol_id, value } => {
                self.handle_set_property(&symbol_id, value).await
            }
            Message::Invoke {
                request_id,
                symbol_id,
                args,
            } => self.handle_invoke(request_id, &symbol_id, args).await,
            other => Err(LinkError::UnknownMessageKind(other.msg_type().to_string())),
        };
        if let Err(e) = result {
            warn!(node = %self.id, error = %e, "Message handling failed");
        }
    }

    async fn handle_link(&self, object_id: &str) -> LinkResult<()> {
        let Some(this) = self.this.upgrade() else {
            return Err(LinkError::ConnectionClosed);
        };
        // Recorded even for an unknown object, so a provider added later can notify this node.
        if let Err(e) = self.registry.link_node(object_id, &this) {
            warn!(node = %self.id, error = %e, "Duplicate link, sending snapshot again");
        }
        let Some(provider) = self.registry.provider(object_id) else {
            info!(node = %self.id, object_id, "Link to unknown object dropped");
            return Ok(());
        };

        if let Err(e) = provider.linked(object_id, &this).await {
            warn!(node = %self.id, object_id, error = %e, "Provider link hook failed");
        }
        let props = provider
            .collect_properties()
            .await
            .map_err(LinkError::ProviderInvocation)?;
        info!(node = %self.id, object_id, props = props.len(), "Linked");
        self.send_message(&Message::init(object_id, props)).await
    }

    async fn handle_set_property(&self, symbol_id: &str, value: Value) -> LinkResult<()> {
        let object_id = split_object_id(symbol_id);
        let Some(provider) = self.registry.provider(object_id) else {
            return self.reject(MsgType::SetProperty, 0, object_id).await;
        };
        match provider.set_property(split_member(symbol_id), value.clone()).await {
            Ok(()) => {
                self.send_message(&Message::property_change(symbol_id, value))
                    .await
            }
            Err(e) => {
                warn!(node = %self.id, symbol_id, error = %e, "Set property failed");
                self.send_message(&Message::error(MsgType::SetProperty, 0, e))
                    .await
            }
        }
    }

    async fn handle_invoke(&self, request_id: u64, symbol_id: &str, args: Args) -> LinkResult<()> {
        let object_id = split_object_id(symbol_id);
        let Some(provider) = self.registry.provider(object_id) else {
            return self.reject(MsgType::Invoke, request_id, object_id).await;
        };
        match provider.invoke(split_member(symbol_id), args).await {
            Ok(value) => {
                self.send_message(&Message::invoke_reply(request_id, symbol_id, value))
                    .await
            }
            Err(e) => {
                debug!(node = %self.id, symbol_id, request_id, error = %e, "Invoke failed");
                self.send_message(&Message::error(MsgType::Invoke, request_id, e))
                    .await
            }
        }
    }

    async fn reject(&self, kind: MsgType, request_id: u64, object_id: &str) -> LinkResult<()> {
        let err = LinkError::NoProvider(object_id.to_string());
        warn!(node = %self.id, kind = %kind, error = %err, "Rejecting request");
        let text = format!("no provider for {object_id}");
        self.send_message(&Message::error(kind, request_id, text))
            .await
    }
}

#[async_trait]
impl Endpoint for ProviderNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn receive(&self, data: Vec<u8>) {
        if let Err(e) = self.deliver(data).await {
            debug!(node = %self.id, error = %e, "Inbound message discarded");
        }
    }

    fn disconnected(&self) {
        self.close();
    }
}

impl std::fmt::Debug for ProviderNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderNode")
            .field("id", &self.id)
            .field("registry", &self.registry.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
