//! Batch scheduling and per-link state
//!
//! - **BatchOrchestrator**: chunked, cache-aware, order-preserving batches
//!   (runs inside the coordinator)
//! - **LinkLifecycle**: the state machine the requester drives from
//!   request outcomes

mod lifecycle;
mod orchestrator;

pub use lifecycle::{LifecycleError, LinkId, LinkLifecycle, LinkStatus, Transition};
pub use orchestrator::{BatchConfig, BatchError, BatchOrchestrator, ItemOutcome};
