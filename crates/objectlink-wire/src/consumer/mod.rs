//! Consumer side: observers of remote objects and the nodes that serve them.

mod node;
mod registry;

pub use node::{ConsumerNode, InvokeReply, InvokeResult, ReplyFn};
pub use registry::{ConsumerRegistry, ObserverFactory};

use crate::message::{Args, Props, Value};
use std::sync::Arc;

/// Reacts to events of one linked remote object.
///
/// Hooks are called from the node's delivery path and never while a registry
/// lock is held, so they may call back into the registry.
pub trait ObjectObserver: Send + Sync + 'static {
    /// The object this observer watches.
    fn object_id(&self) -> &str;

    /// The provider answered a link with its full property snapshot.
    fn on_init(&self, object_id: &str, props: Props, node: &Arc<ConsumerNode>);

    fn on_property_change(&self, symbol_id: &str, value: Value);

    fn on_signal(&self, symbol_id: &str, args: Args);

    /// The observer was removed from its registry.
    fn on_release(&self);
}
