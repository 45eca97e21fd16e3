//! Provider side: local objects served to remote consumers.

mod node;
mod registry;

pub use node::ProviderNode;
pub use registry::{ProviderFactory, ProviderRegistry};

use crate::message::{Args, Props, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A local object that remote consumers can link to.
///
/// Methods may be called concurrently from different provider nodes linked to
/// the same object, so implementations guard their own state. Failures are
/// reported as plain text and travel back to the caller as an `Error` message.
#[async_trait]
pub trait ObjectProvider: Send + Sync + 'static {
    /// The object id this provider serves.
    fn object_id(&self) -> &str;

    /// Run method `member` with positional arguments.
    async fn invoke(&self, member: &str, args: Args) -> Result<Value, String>;

    /// Change property `member`.
    async fn set_property(&self, member: &str, value: Value) -> Result<(), String>;

    /// A node linked to this object. Runs before the property snapshot is taken.
    async fn linked(&self, _object_id: &str, _node: &Arc<ProviderNode>) -> Result<(), String> {
        Ok(())
    }

    /// Current value of every property, sent to a newly linked node.
    async fn collect_properties(&self) -> Result<Props, String>;
}
