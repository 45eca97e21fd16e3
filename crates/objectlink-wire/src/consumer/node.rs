//! Consumer node: one logical connection to a provider.
//!
//! Turns local calls (link, set, invoke) into outgoing messages and incoming
//! messages into observer callbacks. Invocations are correlated with their
//! replies through a per-node table keyed by a strictly increasing request id.

use super::registry::ConsumerRegistry;
use crate::converter::MessageConverter;
use crate::id::NodeId;
use crate::identifier::split_object_id;
use crate::message::{Args, Message, MsgType, Value};
use crate::transport::{Endpoint, MessageSink};
use async_trait::async_trait;
use objectlink_types::{LinkError, LinkResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// A successful method result.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeReply {
    pub symbol_id: String,
    pub value: Value,
}

/// Reply or the error text the provider sent back.
pub type InvokeResult = Result<InvokeReply, String>;

/// Callback run exactly once when a reply (or error) for a request arrives.
pub type ReplyFn = Box<dyn FnOnce(InvokeResult) + Send + 'static>;

#[derive(Default)]
struct PendingInvokes {
    last_id: u64,
    replies: HashMap<u64, ReplyFn>,
}

/// Client endpoint for one connection.
pub struct ConsumerNode {
    id: NodeId,
    registry: ConsumerRegistry,
    converter: MessageConverter,
    output: RwLock<Option<Arc<dyn MessageSink>>>,
    pending: Mutex<PendingInvokes>,
    closed: AtomicBool,
    this: Weak<ConsumerNode>,
}

impl ConsumerNode {
    /// Create a node bound to `registry`. Attach an output with [`set_output`].
    ///
    /// [`set_output`]: ConsumerNode::set_output
    pub fn new(registry: ConsumerRegistry, converter: MessageConverter) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: NodeId::next(),
            registry,
            converter,
            output: RwLock::new(None),
            pending: Mutex::new(PendingInvokes::default()),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    pub fn set_output(&self, output: Arc<dyn MessageSink>) {
        let mut slot = self.output.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(output);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of invocations still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.replies.len()
    }

    /// Call a remote method. Returns the request id used.
    ///
    /// Without a callback no reply is tracked; a reply that arrives anyway
    /// is reported as an unknown request.
    pub async fn invoke_remote(
        &self,
        symbol_id: &str,
        args: Args,
        on_reply: Option<ReplyFn>,
    ) -> LinkResult<u64> {
        let request_id = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.last_id += 1;
            let request_id = pending.last_id;
            if let Some(on_reply) = on_reply {
                pending.replies.insert(request_id, on_reply);
            }
            request_id
        };

        let msg = Message::invoke(request_id, symbol_id, args);
        if let Err(e) = self.send_message(&msg).await {
            self.take_pending(request_id);
            return Err(e);
        }
        Ok(request_id)
    }

    /// Call a remote method and wait for its result.
    ///
    /// An `Error` reply becomes [`LinkError::ProviderInvocation`]. On timeout
    /// the pending entry is dropped, so a late reply counts as unknown.
    pub async fn call(&self, symbol_id: &str, args: Args, timeout: Duration) -> LinkResult<Value> {
        let (tx, rx) = oneshot::channel();
        let request_id = self
            .invoke_remote(
                symbol_id,
                args,
                Some(Box::new(move |result: InvokeResult| {
                    let _ = tx.send(result);
                })),
            )
            .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply.value),
            Ok(Ok(Err(message))) => Err(LinkError::ProviderInvocation(message)),
            Ok(Err(_)) => Err(LinkError::ConnectionClosed),
            Err(_) => {
                self.take_pending(request_id);
                Err(LinkError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Ask the provider to change a property. No reply is correlated.
    pub async fn set_remote_property(&self, symbol_id: &str, value: Value) -> LinkResult<()> {
        self.send_message(&Message::set_property(symbol_id, value))
            .await
    }

    /// Mark this node as serving `object_id`, then send `Link`.
    pub async fn link_remote_node(&self, object_id: &str) -> LinkResult<()> {
        if let Some(this) = self.this.upgrade() {
            self.registry.link_node(object_id, &this);
        }
        info!(node = %self.id, object_id, "Linking remote object");
        self.send_message(&Message::link(object_id)).await
    }

    /// Clear the registry association, then send `Unlink`.
    pub async fn unlink_remote_node(&self, object_id: &str) -> LinkResult<()> {
        self.registry.unlink_node(object_id);
        info!(node = %self.id, object_id, "Unlinking remote object");
        self.send_message(&Message::unlink(object_id)).await
    }

    /// Decode one incoming message and dispatch it to observers or callbacks.
    pub fn deliver(&self, data: &[u8]) -> LinkResult<()> {
        let msg = self.converter.decode(data)?;
        debug!(node = %self.id, kind = %msg.msg_type(), "<- received");

        match msg {
            Message::Init { object_id, props } => {
                let observer = self
                    .registry
                    .observer(&object_id)
                    .ok_or_else(|| LinkError::NoObserver(object_id.clone()))?;
                if let Some(this) = self.this.upgrade() {
                    observer.on_init(&object_id, props, &this);
                }
            }
            Message::PropertyChange { symbol_id, value } => {
                let object_id = split_object_id(&symbol_id);
                let observer = self
                    .registry
                    .observer(object_id)
                    .ok_or_else(|| LinkError::NoObserver(object_id.to_string()))?;
                observer.on_property_change(&symbol_id, value);
            }
            Message::InvokeReply {
                request_id,
                symbol_id,
                value,
            } => {
                let on_reply = self
                    .take_pending(request_id)
                    .ok_or(LinkError::UnknownRequest(request_id))?;
                on_reply(Ok(InvokeReply { symbol_id, value }));
            }
            Message::Signal { symbol_id, args } => {
                let object_id = split_object_id(&symbol_id);
                let observer = self
                    .registry
                    .observer(object_id)
                    .ok_or_else(|| LinkError::NoObserver(object_id.to_string()))?;
                observer.on_signal(&symbol_id, args);
            }
            Message::Error {
                msg_type,
                request_id,
                error,
            } => {
                warn!(
                    node = %self.id,
                    kind = %msg_type,
                    request_id,
                    error = %error,
                    "Provider reported an error"
                );
                if msg_type == MsgType::Invoke {
                    if let Some(on_reply) = self.take_pending(request_id) {
                        on_reply(Err(error));
                    }
                }
            }
            other => {
                return Err(LinkError::UnknownMessageKind(
                    other.msg_type().to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Encode and write one message. A failed write closes the node.
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

    /// Detach from the registry and drop pending callbacks. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.detach_node(&self.id);
        let dropped = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut pending.replies)
        };
        if !dropped.is_empty() {
            info!(node = %self.id, pending = dropped.len(), "Dropping unanswered invokes");
        }
        let mut slot = self.output.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    fn take_pending(&self, request_id: u64) -> Option<ReplyFn> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.replies.remove(&request_id)
    }
}

#[async_trait]
impl Endpoint for ConsumerNode {
    fn node_id(&self) -> &NodeId {
        &self.id
    }

    async fn receive(&self, data: Vec<u8>) {
        if let Err(e) = self.deliver(&data) {
            warn!(node = %self.id, error = %e, "Dropped incoming message");
        }
    }

    fn disconnected(&self) {
        self.close();
    }
}

impl std::fmt::Debug for ConsumerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerNode")
            .field("id", &self.id)
            .field("registry", &self.registry.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
