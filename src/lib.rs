//! Baitguard: resilient clickbait classification pipeline
//!
//! A long-lived coordinator owns a result cache and the classifier,
//! fetcher and summarizer collaborators. Short-lived page sessions send it
//! work over a channel that may close, stall or die at any moment, and
//! track each link's progress through a small state machine.
//!
//! # Core Concepts
//!
//! - **CacheStore**: TTL-bound, size-capped classification and summary cache
//! - **Heartbeat**: keeps the coordinator from looking idle during long work
//! - **ChannelGuard**: synchronous liveness probe for the coordinator handle
//! - **ResilientRequester**: per-attempt timeout with bounded retry
//! - **BatchOrchestrator**: chunked, cache-aware, order-preserving batches
//! - **LinkLifecycle**: per-link state machine driven by request outcomes
//!
//! # Example
//!
//! ```no_run
//! use baitguard::{Config, LinkId, MemoryStore, PageSession, ServiceHost};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), baitguard::SessionError> {
//! let config = Config::default();
//! let host = ServiceHost::new(config.services(Arc::new(MemoryStore::new())), config.host.clone());
//! let session = PageSession::connect(&host, &config);
//! let results = session
//!     .classify_links(vec![(LinkId::new("1"), "You won't believe this".into())])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod heartbeat;
pub mod host;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod storage;

pub use cache::{CacheConfig, CacheStats, CacheStore, ClassificationRecord, SummaryRecord};
pub use channel::{
    ChannelError, ChannelGuard, PortTransport, RequestPolicy, ResilientRequester, Transport,
    TransportError,
};
pub use collaborators::{Classifier, CollaboratorError, Fetcher, Summarizer, Verdict};
pub use config::{Config, ConfigError};
pub use coordinator::{Coordinator, CoordinatorServices};
pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatGuard};
pub use host::{HostConfig, ServiceHost};
pub use pipeline::{
    BatchConfig, BatchError, BatchOrchestrator, ItemOutcome, LifecycleError, LinkId,
    LinkLifecycle, LinkStatus,
};
pub use protocol::{Action, Request};
pub use session::{PageSession, SessionError};
pub use storage::{KeyValueStore, MemoryStore, OpenStore, SqliteStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
