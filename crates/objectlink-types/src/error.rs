//! Error types for the ObjectLink protocol engine.

use thiserror::Error;

/// Errors raised by registries, nodes, codecs and transports.
#[derive(Error, Debug)]
pub enum LinkError {
    /// An observer is already registered for this object id.
    #[error("Observer already registered: {0}")]
    DuplicateObserver(String),

    /// A provider is already registered for this object id.
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    /// The node is already in the object's linked-node list.
    #[error("Node {node} already linked to {object_id}")]
    AlreadyLinked {
        /// The object the link was requested for.
        object_id: String,
        /// The node that was already linked.
        node: String,
    },

    /// No observer is registered (and no factory produced one).
    #[error("No observer for {0}")]
    NoObserver(String),

    /// No provider is registered (and no factory produced one).
    #[error("No provider for {0}")]
    NoProvider(String),

    /// A reply arrived for a request id without a pending callback.
    #[error("No pending invoke with id {0}")]
    UnknownRequest(u64),

    /// The message discriminator is not handled here.
    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(String),

    /// Encoding or decoding a message failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// A provider callback reported an application-level failure.
    #[error("Provider invocation failed: {0}")]
    ProviderInvocation(String),

    /// The node has no output sink to write to.
    #[error("No output attached")]
    NoOutput,

    /// The peer closed the connection or the node was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An incoming frame exceeded the configured maximum.
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },

    /// A remote call did not complete in time.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Codec(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LinkError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LinkError::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LinkError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LinkError::Codec(e.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(e: toml::de::Error) -> Self {
        LinkError::Config(e.to_string())
    }
}

/// Alias for Result with LinkError.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = LinkError::AlreadyLinked {
            object_id: "demo.Counter".to_string(),
            node: "n1".to_string(),
        };
        assert_eq!(e.to_string(), "Node n1 already linked to demo.Counter");
        assert_eq!(
            LinkError::UnknownRequest(7).to_string(),
            "No pending invoke with id 7"
        );
    }

    #[test]
    fn test_json_error_becomes_codec() {
        let err = serde_json::from_str::<serde_json::Value>("[1,").unwrap_err();
        let e: LinkError = err.into();
        assert!(matches!(e, LinkError::Codec(_)));
    }
}
