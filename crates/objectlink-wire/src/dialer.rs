//! Consumer side of a connection: dial a hub and wire a consumer node to it.

use crate::consumer::{ConsumerNode, ConsumerRegistry};
use crate::converter::MessageConverter;
use crate::transport::Connection;
use objectlink_types::{LinkConfig, LinkResult};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;

/// A consumer node together with the connection carrying it.
#[derive(Debug, Clone)]
pub struct ConsumerLink {
    pub node: Arc<ConsumerNode>,
    pub connection: Arc<Connection>,
}

impl ConsumerLink {
    /// Close the connection; the node detaches from its registry.
    pub fn close(&self) {
        self.connection.close();
    }
}

/// Dial a hub over TCP and return a wired consumer node.
pub async fn connect<A>(addr: A, registry: &ConsumerRegistry, config: &LinkConfig) -> LinkResult<ConsumerLink>
where
    A: ToSocketAddrs,
{
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?.to_string();
    info!(peer = %peer, format = %config.format, "Connected to hub");
    Ok(attach_consumer(stream, peer, registry, config))
}

/// Wire a fresh consumer node to an already open stream.
pub fn attach_consumer<S>(
    stream: S,
    peer: impl Into<String>,
    registry: &ConsumerRegistry,
    config: &LinkConfig,
) -> ConsumerLink
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let node = ConsumerNode::new(registry.clone(), MessageConverter::new(config.format));
    let connection = Connection::new(peer, node.clone(), config);
    node.set_output(connection.sink());
    connection.start(stream);
    ConsumerLink { node, connection }
}
