//! Configuration types for hubs, nodes and the command-line front end.

use crate::error::LinkResult;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default listen address for a connection hub.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8282";

/// Maximum single frame size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Encoding used for messages on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Tagged JSON array.
    #[default]
    Json,
    /// The same tagged array as MessagePack.
    #[serde(alias = "messagepack")]
    MsgPack,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Json => write!(f, "json"),
            WireFormat::MsgPack => write!(f, "msgpack"),
        }
    }
}

/// Settings shared by the hub, the dialer and the nodes they create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address the hub binds to.
    pub listen_addr: SocketAddr,
    /// Wire encoding for every message.
    pub format: WireFormat,
    /// Largest frame accepted from a peer, in bytes.
    pub max_message_size: u32,
    /// Capacity of a provider node's inbound queue.
    pub inbound_queue: usize,
    /// Capacity of a connection's outbound queue.
    pub outbound_queue: usize,
    /// Default timeout for awaited remote calls, in milliseconds.
    pub invoke_timeout_ms: u64,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8282))),
            format: WireFormat::Json,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            inbound_queue: 256,
            outbound_queue: 256,
            invoke_timeout_ms: 5000,
            log_level: "info".to_string(),
        }
    }
}

impl LinkConfig {
    /// Parse a TOML document, filling unset fields with defaults.
    pub fn from_toml_str(contents: &str) -> LinkResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// The invoke timeout as a [`Duration`].
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}
