//! Byte-stream plumbing between nodes and connections.
//!
//! Nodes write through a [`MessageSink`] and receive through the
//! [`Endpoint`] trait. A [`Connection`] runs one read task and one write task
//! over any `AsyncRead + AsyncWrite` stream, framing each message with a
//! 4-byte big-endian length header.

use crate::id::NodeId;
use async_trait::async_trait;
use objectlink_types::{LinkConfig, LinkError, LinkResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outgoing side of a transport: accepts one encoded message at a time.
///
/// `write` may wait when the transport applies backpressure.
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn write(&self, data: Vec<u8>) -> LinkResult<()>;
}

#[async_trait]
impl MessageSink for mpsc::Sender<Vec<u8>> {
    async fn write(&self, data: Vec<u8>) -> LinkResult<()> {
        self.send(data)
            .await
            .map_err(|_| LinkError::ConnectionClosed)
    }
}

/// Incoming side of a transport: a node that consumes raw messages.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Identity of the node behind this endpoint.
    fn node_id(&self) -> &NodeId;

    /// Hand over one received message.
    async fn receive(&self, data: Vec<u8>);

    /// The transport is gone; release everything tied to it.
    fn disconnected(&self);
}

/// Write one frame (4-byte length + body).
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> LinkResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| LinkError::MessageTooLarge {
        size: u32::MAX,
        max: u32::MAX,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, rejecting bodies larger than `max_size`.
pub async fn read_frame<R>(reader: &mut R, max_size: u32) -> LinkResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(LinkError::ConnectionClosed);
        }
        Err(e) => return Err(LinkError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > max_size {
        return Err(LinkError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// A framed duplex stream bound to one endpoint.
pub struct Connection {
    id: Uuid,
    peer: String,
    outbound: mpsc::Sender<Vec<u8>>,
    unstarted: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    max_message_size: u32,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
    endpoint: Arc<dyn Endpoint>,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl Connection {
    /// Create a connection without touching any stream yet.
    ///
    /// The outbound queue exists from here on, so [`sink`] can be handed to
    /// the endpoint before [`start`] lets the first frame in.
    ///
    /// [`sink`]: Connection::sink
    /// [`start`]: Connection::start
    pub fn new(peer: impl Into<String>, endpoint: Arc<dyn Endpoint>, config: &LinkConfig) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            outbound,
            unstarted: Mutex::new(Some(outbound_rx)),
            max_message_size: config.max_message_size,
            shutdown,
            closed: AtomicBool::new(false),
            endpoint,
            close_hooks: Mutex::new(Vec::new()),
        })
    }

    /// Start the read and write tasks for `stream`.
    ///
    /// Every inbound frame goes to `endpoint.receive`. When either direction
    /// fails or the peer hangs up, the connection closes itself. Only the
    /// first call has an effect.
    pub fn start<S>(self: &Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let outbound_rx = {
            let mut unstarted = self.unstarted.lock().unwrap_or_else(|e| e.into_inner());
            unstarted.take()
        };
        let Some(outbound_rx) = outbound_rx else {
            warn!(conn = %self.id, "Connection already started");
            return;
        };

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(Self::write_loop(Arc::clone(self), writer, outbound_rx));
        tokio::spawn(Self::read_loop(Arc::clone(self), reader, self.max_message_size));
    }

    /// [`new`](Connection::new) followed by [`start`](Connection::start).
    pub fn spawn<S>(
        stream: S,
        peer: impl Into<String>,
        endpoint: Arc<dyn Endpoint>,
        config: &LinkConfig,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn = Self::new(peer, endpoint, config);
        conn.start(stream);
        conn
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address or label given at spawn time.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A sink that queues messages for the write task.
    pub fn sink(&self) -> Arc<dyn MessageSink> {
        Arc::new(self.outbound.clone())
    }

    /// Run `hook` once when the connection closes (immediately if it already has).
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        {
            let mut hooks = self.close_hooks.lock().unwrap_or_else(|e| e.into_inner());
            if !self.is_closed() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Stop both tasks, notify the endpoint and run the close hooks.
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        let hooks = {
            let mut hooks = self.close_hooks.lock().unwrap_or_else(|e| e.into_inner());
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *hooks)
        };
        info!(conn = %self.id, peer = %self.peer, node = %self.endpoint.node_id(), "Connection closed");
        let _ = self.shutdown.send(true);
        self.endpoint.disconnected();
        for hook in hooks {
            hook();
        }
    }

    async fn write_loop<W>(
        conn: Arc<Self>,
        mut writer: W,
        mut outbound: mpsc::Receiver<Vec<u8>>,
    ) where
        W: AsyncWrite + Unpin,
    {
        let mut shutdown = conn.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = outbound.recv() => {
                    let Some(data) = next else { break };
                    if let Err(e) = write_frame(&mut writer, &data).await {
                        warn!(conn = %conn.id, error = %e, "Write failed");
                        break;
                    }
                }
            }
        }
        let _ = writer.shutdown().await;
        debug!(conn = %conn.id, "Write task finished");
        conn.close();
    }

    async fn read_loop<R>(conn: Arc<Self>, mut reader: R, max_size: u32)
    where
        R: AsyncRead + Unpin,
    {
        let mut shutdown = conn.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                frame = read_frame(&mut reader, max_size) => match frame {
                    Ok(data) => conn.endpoint.receive(data).await,
                    Err(LinkError::ConnectionClosed) => {
                        debug!(conn = %conn.id, "Peer hung up");
                        break;
                    }
                    Err(e) => {
                        warn!(conn = %conn.id, error = %e, "Read failed");
                        break;
                    }
                },
            }
        }
        conn.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
