//! Shared fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use baitguard::collaborators::{MockClassifier, MockFetcher, MockSummarizer};
use baitguard::{
    ChannelGuard, Config, CoordinatorServices, KeyValueStore, MemoryStore,
    PageSession, Request, ServiceHost, Transport, TransportError,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a scripted transport does on one call.
#[derive(Clone)]
pub enum Step {
    Reply(Value),
    Fail(TransportError),
    /// Never answer
    Stall,
}

/// Transport that follows a script, one step per call. The last step
/// repeats once the script runs out.
pub struct ScriptedTransport {
    steps: Vec<Step>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
    /// Flipped to false after the given call number, if set
    kill_after: Option<(usize, LiveFlag)>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty());
        Self {
            steps,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            kill_after: None,
        }
    }

    pub fn always(step: Step) -> Self {
        Self::new(vec![step])
    }

    /// Mark `flag` dead as soon as call number `call` (1-based) returns.
    pub fn killing_after(mut self, call: usize, flag: LiveFlag) -> Self {
        self.kill_after = Some((call, flag));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request);
        let step = self.steps[n.min(self.steps.len() - 1)].clone();

        if let Some((call, flag)) = &self.kill_after {
            if n + 1 >= *call {
                flag.kill();
            }
        }

        match step {
            Step::Reply(value) => Ok(value),
            Step::Fail(error) => Err(error),
            Step::Stall => std::future::pending().await,
        }
    }
}

/// Settable liveness for a `ChannelGuard`.
#[derive(Clone)]
pub struct LiveFlag(Arc<AtomicBool>);

impl LiveFlag {
    pub fn live() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn dead() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn guard(&self) -> ChannelGuard {
        let flag = self.0.clone();
        ChannelGuard::new(move || flag.load(Ordering::SeqCst))
    }
}

/// A host over `store` with mock collaborators.
pub fn mock_host(
    store: Arc<dyn KeyValueStore>,
    classifier: Arc<MockClassifier>,
    config: &Config,
) -> Arc<ServiceHost> {
    let services: CoordinatorServices = config
        .services(store)
        .with_classifier(classifier)
        .with_fetcher(Arc::new(
            MockFetcher::new()
                .with_page("https://bait.test/a", "doctors hate this one simple breakfast"),
        ))
        .with_summarizer(Arc::new(MockSummarizer::new(3)));
    ServiceHost::new(services, config.host.clone())
}

/// A host and a connected session over an in-memory store.
pub fn mock_session(
    classifier: Arc<MockClassifier>,
    config: &Config,
) -> (Arc<ServiceHost>, PageSession) {
    let host = mock_host(Arc::new(MemoryStore::new()), classifier, config);
    let session = PageSession::connect(&host, config);
    (host, session)
}

/// A config tuned for fast, paused-clock tests.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.request = config
        .request
        .with_timeout_ms(1_000)
        .with_max_retries(2)
        .with_retry_delay_ms(100);
    config.batch = config.batch.with_deadline(2_000, 500);
    config
}
