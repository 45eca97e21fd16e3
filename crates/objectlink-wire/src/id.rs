//! Generated identities for registries and nodes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);
static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a consumer or provider node (`n1`, `n2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Allocate the next process-wide node id.
    pub fn next() -> Self {
        NodeId(format!("n{}", NEXT_NODE.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allocate the next process-wide registry id (`r1`, `r2`, ...).
pub(crate) fn next_registry_id() -> String {
    format!("r{}", NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed))
}
