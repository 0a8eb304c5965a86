//! The long-lived service that owns the cache
//!
//! Requesters never touch the cache or the collaborators directly. They
//! connect a port to the coordinator and exchange `Request`/`Reply`
//! messages over it. One coordinator instance runs at a time; the host may
//! terminate it at any moment and spawn a fresh one later, so anything that
//! must outlive an instance lives in the `KeyValueStore`.

mod service;

pub use service::{Coordinator, CoordinatorError};

use crate::cache::{CacheConfig, Clock, SystemClock};
use crate::collaborators::{Classifier, Fetcher, Summarizer, Unconfigured};
use crate::heartbeat::HeartbeatConfig;
use crate::pipeline::BatchConfig;
use crate::protocol::{Reply, Request};
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifies one connected port within a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(u64);

impl PortId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Everything that arrives in a coordinator's inbox.
#[derive(Debug)]
pub enum Inbound {
    /// A port opened; replies for it go to `replies`
    Connect {
        port: PortId,
        replies: mpsc::UnboundedSender<Reply>,
    },
    Message {
        port: PortId,
        request: Request,
    },
    Disconnect {
        port: PortId,
    },
}

/// What each coordinator instance is built from. Cloned into every
/// instance the host spawns.
#[derive(Clone)]
pub struct CoordinatorServices {
    pub store: Arc<dyn KeyValueStore>,
    pub classifier: Arc<dyn Classifier>,
    pub fetcher: Arc<dyn Fetcher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub heartbeat: HeartbeatConfig,
    pub clock: Arc<dyn Clock>,
}

impl CoordinatorServices {
    /// Default configuration and no collaborators: every classification
    /// or summary fails as unavailable until one is supplied.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            classifier: Arc::new(Unconfigured::new("classifier")),
            fetcher: Arc::new(Unconfigured::new("fetcher")),
            summarizer: Arc::new(Unconfigured::new("summarizer")),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_heartbeat_config(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
