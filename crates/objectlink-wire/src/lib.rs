//! ObjectLink wire protocol: remote objects linked over byte streams.
//!
//! A provider exposes a named object (properties, methods, signals); remote
//! consumers link to it, receive its property snapshot, observe changes and
//! signals, and invoke its methods.
//!
//! ## Architecture
//!
//! - **Message**: the nine tagged-array message kinds and value coercion
//! - **identifier**: `<objectId>/<member>` symbol id helpers
//! - **MessageConverter**: message <-> bytes in JSON or MessagePack
//! - **ConsumerRegistry / ConsumerNode**: client side, dispatches to observers
//! - **ProviderRegistry / ProviderNode**: source side, answers requests and
//!   fans out notifications
//! - **MetaObserver / MetaProvider / Proxy**: schema-less objects and a
//!   paired consumer/provider registry
//! - **Connection / ConnectionHub**: framed byte streams and the registration
//!   protocol that pairs each connection with a node

pub mod consumer;
pub mod converter;
pub mod dialer;
pub mod hub;
pub mod id;
pub mod identifier;
pub mod message;
pub mod provider;
pub mod proxy;
pub mod transport;

pub use consumer::{ConsumerNode, ConsumerRegistry, InvokeReply, ObjectObserver};
pub use converter::MessageConverter;
pub use dialer::{connect, ConsumerLink};
pub use hub::{ConnectionHub, ConnectionInfo};
pub use id::NodeId;
pub use message::{Args, Message, MsgType, Props, Value};
pub use provider::{ObjectProvider, ProviderNode, ProviderRegistry};
pub use proxy::{MetaObserver, MetaProvider, Proxy};
pub use transport::{Connection, Endpoint, MessageSink};

pub use objectlink_types::{LinkConfig, LinkError, LinkResult, WireFormat};
