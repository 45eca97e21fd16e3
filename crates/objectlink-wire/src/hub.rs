//! Connection hub: pairs every incoming connection with a provider node.
//!
//! A [`ConnectionHub`] optionally binds a TCP listener. For each accepted
//! stream (or any stream handed to [`ConnectionHub::attach`]) it creates a
//! fresh [`ProviderNode`] on the shared registry, wires the node's output to
//! the connection and the connection's input to the node, and forgets both
//! when the connection closes.

use crate::converter::MessageConverter;
use crate::id::NodeId;
use crate::provider::{ProviderNode, ProviderRegistry};
use crate::transport::Connection;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use objectlink_types::{LinkConfig, LinkResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Snapshot of one live connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: String,
    pub node_id: NodeId,
    pub connected_at: DateTime<Utc>,
}

struct HubConnection {
    conn: Arc<Connection>,
    info: ConnectionInfo,
}

/// Accepts connections and serves the provider registry over them.
pub struct ConnectionHub {
    config: LinkConfig,
    registry: ProviderRegistry,
    converter: MessageConverter,
    connections: DashMap<Uuid, HubConnection>,
    local_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
}

impl ConnectionHub {
    /// A hub without a listener; feed it streams with [`attach`].
    ///
    /// [`attach`]: ConnectionHub::attach
    pub fn new(config: LinkConfig, registry: ProviderRegistry) -> Arc<Self> {
        Arc::new(Self::build(config, registry, None))
    }

    /// Bind `config.listen_addr` and start accepting connections.
    pub async fn start(
        config: LinkConfig,
        registry: ProviderRegistry,
    ) -> LinkResult<(Arc<Self>, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            format = %config.format,
            registry = %registry.id(),
            "Hub listening"
        );

        let hub = Arc::new(Self::build(config, registry, Some(local_addr)));
        let accept_handle = tokio::spawn(Self::accept_loop(listener, Arc::clone(&hub)));
        Ok((hub, accept_handle))
    }

    fn build(config: LinkConfig, registry: ProviderRegistry, local_addr: Option<SocketAddr>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            converter: MessageConverter::new(config.format),
            config,
            registry,
            connections: DashMap::new(),
            local_addr,
            shutdown,
        }
    }

    /// Bound address, when started with a listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Serve the registry over `stream`.
    pub fn attach<S>(self: &Arc<Self>, stream: S, peer: impl Into<String>) -> ConnectionInfo
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let node = ProviderNode::spawn(
            self.registry.clone(),
            self.converter,
            self.config.inbound_queue,
        );
        let conn = Connection::new(peer, node.clone(), &self.config);
        node.set_output(conn.sink());

        let info = ConnectionInfo {
            id: conn.id(),
            peer: conn.peer().to_string(),
            node_id: node.id().clone(),
            connected_at: Utc::now(),
        };
        info!(conn = %info.id, peer = %info.peer, node = %info.node_id, "Connection attached");
        self.connections.insert(
            info.id,
            HubConnection {
                conn: Arc::clone(&conn),
                info: info.clone(),
            },
        );

        let hub = Arc::downgrade(self);
        let id = info.id;
        conn.on_close(move || {
            if let Some(hub) = hub.upgrade() {
                hub.connections.remove(&id);
                debug!(conn = %id, remaining = hub.connections.len(), "Connection released");
            }
        });
        conn.start(stream);
        info
    }

    /// Snapshot of live connections.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let live: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(&entry.value().conn))
            .collect();
        info!(connections = live.len(), "Hub shutting down");
        for conn in live {
            conn.close();
        }
    }

    async fn accept_loop(listener: TcpListener, hub: Arc<Self>) {
        let mut shutdown = hub.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "Accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %addr, error = %e, "Could not set TCP_NODELAY");
                        }
                        hub.attach(stream, addr.to_string());
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                },
            }
        }
        info!("Hub stopped accepting");
    }
}

impl std::fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("local_addr", &self.local_addr)
            .field("registry", &self.registry.id())
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Args, Message, Props, Value};
    use crate::provider::ObjectProvider;
    use crate::transport::{read_frame, write_frame};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Snapshot;

    #[async_trait]
    impl ObjectProvider for Snapshot {
        fn object_id(&self) -> &str {
            "demo.Snapshot"
        }

        async fn invoke(&self, _member: &str, _args: Args) -> Result<Value, String> {
            Ok(Value::Null)
        }

        async fn set_property(&self, _member: &str, _value: Value) -> Result<(), String> {
            Ok(())
        }

        async fn collect_properties(&self) -> Result<Props, String> {
            let mut props = Props::new();
            props.insert("count".to_string(), Value::from(7));
            Ok(props)
        }
    }

    #[tokio::test]
    async fn test_attach_tracks_and_releases() {
        let hub = ConnectionHub::new(LinkConfig::default(), ProviderRegistry::new());
        let (local, remote) = tokio::io::duplex(1024);

        let info = hub.attach(local, "duplex");
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.connections()[0], info);
        assert!(hub.local_addr().is_none());

        drop(remote);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_object_invoke_over_stream() {
        let hub = ConnectionHub::new(LinkConfig::default(), ProviderRegistry::new());
        let (local, mut remote) = tokio::io::duplex(1024);
        hub.attach(local, "duplex");

        let conv = MessageConverter::default();
        let request = conv
            .encode(&Message::invoke(1, "nobody.Home/ping", vec![]))
            .unwrap();
        write_frame(&mut remote, &request).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), read_frame(&mut remote, 1024))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            conv.decode(&reply).unwrap(),
            Message::error(crate::message::MsgType::Invoke, 1, "no provider for nobody.Home")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_link_waiting_before_attach_gets_init() {
        let registry = ProviderRegistry::new();
        registry.add_provider(Arc::new(Snapshot)).unwrap();
        let hub = ConnectionHub::new(LinkConfig::default(), registry);
        let conv = MessageConverter::default();
        let link = conv.encode(&Message::link("demo.Snapshot")).unwrap();
        let mut props = Props::new();
        props.insert("count".to_string(), Value::from(7));

        for _ in 0..50 {
            let (local, mut remote) = tokio::io::duplex(1024);
            write_frame(&mut remote, &link).await.unwrap();
            hub.attach(local, "duplex");

            let frame = tokio::time::timeout(Duration::from_secs(1), read_frame(&mut remote, 1024))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                conv.decode(&frame).unwrap(),
                Message::init("demo.Snapshot", props.clone())
            );
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let config = LinkConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..LinkConfig::default()
        };
        let (hub, accept) = ConnectionHub::start(config, ProviderRegistry::new())
            .await
            .unwrap();
        let addr = hub.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hub.connection_count(), 1);

        hub.shutdown();
        assert_eq!(hub.connection_count(), 0);
        tokio::time::timeout(Duration::from_secs(1), accept)
            .await
            .unwrap()
            .unwrap();
    }
}
