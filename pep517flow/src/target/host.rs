//! The host IDE's build-stage registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle the host hands out for a registered stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostStageId(pub u64);

impl fmt::Display for HostStageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-stage-{}", self.0)
    }
}

/// The host's own stage graph.
///
/// A target registers its stages in plan order, so every predecessor is
/// registered before the stages that depend on it. Calls happen while the
/// target is being configured and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait HostStageRegistry: Send + Sync {
    /// Adds a stage with its predecessor names to the host graph.
    fn register_stage(&self, name: &str, predecessors: &[String]) -> HostStageId;

    /// Removes a previously registered stage.
    fn unregister_stage(&self, id: HostStageId);
}

/// Registry for hosts without a stage graph of their own. Hands out
/// sequential ids and forgets them.
#[derive(Debug, Default)]
pub struct DetachedHostRegistry {
    next: AtomicU64,
}

impl DetachedHostRegistry {
    /// Creates a new registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostStageRegistry for DetachedHostRegistry {
    fn register_stage(&self, _name: &str, _predecessors: &[String]) -> HostStageId {
        HostStageId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn unregister_stage(&self, _id: HostStageId) {}
}
