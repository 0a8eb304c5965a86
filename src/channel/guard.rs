//! Synchronous liveness probe for the coordinator handle

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Answers "is the coordinator handle still valid?" without sending
/// anything. A probe that panics counts as dead.
#[derive(Clone)]
pub struct ChannelGuard {
    probe: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ChannelGuard {
    pub fn new(probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
        }
    }

    /// A guard that never reports death
    pub fn always_live() -> Self {
        Self::new(|| true)
    }

    pub fn is_live(&self) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.probe)())).unwrap_or(false)
    }
}

impl std::fmt::Debug for ChannelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGuard")
            .field("live", &self.is_live())
            .finish()
    }
}
