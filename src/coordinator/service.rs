//! Coordinator instance: inbox loop and request handlers

use super::{CoordinatorServices, Inbound, PortId};
use crate::cache::CacheStore;
use crate::heartbeat::{Heartbeat, Pulse};
use crate::pipeline::{BatchError, BatchOrchestrator, ItemOutcome};
use crate::protocol::{error_body, Action, Reply, Request, ERROR_KIND_TIMEOUT};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Why a handler produced an error reply.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// The single item of a `classify`/`summarize` request failed
    #[error("{0}")]
    Item(String),

    #[error("failed to encode reply: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordinatorError {
    /// The `kind` carried on the error reply
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            CoordinatorError::Batch(BatchError::DeadlineExceeded { .. }) => Some(ERROR_KIND_TIMEOUT),
            _ => None,
        }
    }
}

/// One running coordinator instance.
pub struct Coordinator {
    generation: u64,
    services: CoordinatorServices,
    orchestrator: BatchOrchestrator,
    heartbeat: Heartbeat,
    activity: Arc<dyn Pulse>,
}

impl Coordinator {
    /// `activity` is pulsed on every inbound request and, through the
    /// heartbeat, while any request is outstanding.
    pub fn new(services: CoordinatorServices, generation: u64, activity: Arc<dyn Pulse>) -> Self {
        let cache = CacheStore::new(services.store.clone(), services.cache.clone())
            .with_clock(services.clock.clone());
        let orchestrator = BatchOrchestrator::new(Arc::new(cache), services.batch.clone());
        let heartbeat = Heartbeat::from_config(&services.heartbeat, activity.clone());
        Self {
            generation,
            services,
            orchestrator,
            heartbeat,
            activity,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Serve the inbox until every sender is gone.
    ///
    /// Each request is answered from its own task; the loop keeps reading
    /// while handlers run. Aborting the future returned here drops every
    /// handler with it, and every port's reply stream closes.
    pub async fn run(self, mut inbox: mpsc::Receiver<Inbound>) {
        let this = Arc::new(self);
        let mut ports: HashMap<PortId, mpsc::UnboundedSender<Reply>> = HashMap::new();
        let mut handlers: JoinSet<()> = JoinSet::new();
        info!(generation = this.generation, "coordinator running");

        loop {
            tokio::select! {
                inbound = inbox.recv() => match inbound {
                    Some(inbound) => this.accept(inbound, &mut ports, &mut handlers),
                    None => break,
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "request task ended abnormally");
                    }
                }
            }
        }

        while handlers.join_next().await.is_some() {}
        info!(generation = this.generation, "coordinator stopped");
    }

    fn accept(
        self: &Arc<Self>,
        inbound: Inbound,
        ports: &mut HashMap<PortId, mpsc::UnboundedSender<Reply>>,
        handlers: &mut JoinSet<()>,
    ) {
        match inbound {
            Inbound::Connect { port, replies } => {
                debug!(%port, "port connected");
                ports.insert(port, replies);
            }
            Inbound::Disconnect { port } => {
                debug!(%port, "port disconnected");
                ports.remove(&port);
            }
            Inbound::Message { port, request } => {
                self.activity.pulse();
                match ports.get(&port) {
                    Some(replies) => {
                        handlers.spawn(Arc::clone(self).respond(request, replies.clone()));
                    }
                    None => warn!(%port, correlation_id = %request.correlation_id, "message from unknown port dropped"),
                }
            }
        }
    }

    /// Answer one request with exactly one reply: the handler's value, its
    /// error, or a synthesized error if the handler panicked.
    async fn respond(self: Arc<Self>, request: Request, replies: mpsc::UnboundedSender<Reply>) {
        let beat = self.heartbeat.guard();
        let Request {
            correlation_id,
            action,
        } = request;
        let name = action.name();
        debug!(%correlation_id, action = name, "handling request");

        let mut task = JoinSet::new();
        let this = Arc::clone(&self);
        task.spawn(async move { this.handle(action).await });

        let body = match task.join_next().await {
            Some(Ok(Ok(value))) => value,
            Some(Ok(Err(e))) => {
                debug!(%correlation_id, action = name, error = %e, "request failed");
                error_body(e.to_string(), e.kind())
            }
            Some(Err(e)) => {
                warn!(%correlation_id, action = name, error = %e, "request handler crashed");
                error_body(format!("{} handler failed: {}", name, e), None)
            }
            None => error_body(format!("{} handler did not run", name), None),
        };
        drop(beat);

        if replies.send(Reply { correlation_id, body }).is_err() {
            debug!(%correlation_id, "port gone before reply");
        }
    }

    async fn handle(&self, action: Action) -> Result<Value, CoordinatorError> {
        let limit = self.services.batch.concurrency_limit;
        match action {
            Action::Ping => Ok(json!({ "pong": true, "generation": self.generation })),
            Action::Classify { text } => {
                let outcomes = self
                    .orchestrator
                    .classify_batch(
                        std::slice::from_ref(&text),
                        self.services.classifier.clone(),
                        1,
                    )
                    .await?;
                single(outcomes)
            }
            Action::ClassifyBatch { items } => {
                let outcomes = self
                    .orchestrator
                    .classify_batch(&items, self.services.classifier.clone(), limit)
                    .await?;
                Ok(serde_json::to_value(outcomes)?)
            }
            Action::Summarize { url } => {
                let outcomes = self
                    .orchestrator
                    .summarize_batch(
                        std::slice::from_ref(&url),
                        self.services.fetcher.clone(),
                        self.services.summarizer.clone(),
                        1,
                    )
                    .await?;
                single(outcomes)
            }
            Action::SummarizeBatch { urls } => {
                let outcomes = self
                    .orchestrator
                    .summarize_batch(
                        &urls,
                        self.services.fetcher.clone(),
                        self.services.summarizer.clone(),
                        limit,
                    )
                    .await?;
                Ok(serde_json::to_value(outcomes)?)
            }
            Action::ClearCache => {
                let cleared = self.orchestrator.cache().clear_all();
                info!(cleared, "cache cleared");
                Ok(json!({ "cleared": cleared }))
            }
            Action::GetStats => Ok(serde_json::to_value(self.orchestrator.cache().stats())?),
        }
    }
}

/// Reply for a one-item request: the outcome when it succeeded, an error
/// reply when it didn't.
fn single<R: Serialize>(mut outcomes: Vec<ItemOutcome<R>>) -> Result<Value, CoordinatorError> {
    match outcomes.pop() {
        Some(ItemOutcome::Errored { message }) => Err(CoordinatorError::Item(message)),
        Some(done) => Ok(serde_json::to_value(done)?),
        None => Err(CoordinatorError::Item("no result produced".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        Classifier, CollaboratorResult, MockClassifier, MockFetcher, MockSummarizer, Verdict,
    };
    use crate::heartbeat::HeartbeatConfig;
    use crate::pipeline::BatchConfig;
    use crate::protocol::{as_error, CorrelationId};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct Harness {
        inbox: mpsc::Sender<Inbound>,
        replies: mpsc::UnboundedReceiver<Reply>,
        task: JoinHandle<()>,
        pulses: Arc<AtomicUsize>,
    }

    impl Harness {
        async fn start(services: CoordinatorServices) -> Self {
            let pulses = Arc::new(AtomicUsize::new(0));
            let p = pulses.clone();
            let activity: Arc<dyn Pulse> = Arc::new(move || {
                p.fetch_add(1, Ordering::SeqCst);
            });

            let (inbox, rx) = mpsc::channel(16);
            let task = tokio::spawn(Coordinator::new(services, 7, activity).run(rx));
            let (reply_tx, replies) = mpsc::unbounded_channel();
            inbox
                .send(Inbound::Connect {
                    port: PortId::new(1),
                    replies: reply_tx,
                })
                .await
                .unwrap();
            Self {
                inbox,
                replies,
                task,
                pulses,
            }
        }

        async fn call(&mut self, action: Action) -> Value {
            let request = Request::new(action);
            let id = request.correlation_id;
            self.inbox
                .send(Inbound::Message {
                    port: PortId::new(1),
                    request,
                })
                .await
                .unwrap();
            let reply = self.replies.recv().await.unwrap();
            assert_eq!(reply.correlation_id, id);
            reply.body
        }
    }

    fn services() -> CoordinatorServices {
        CoordinatorServices::new(Arc::new(MemoryStore::new()))
    }

    struct PanickingClassifier;

    #[async_trait]
    impl Classifier for PanickingClassifier {
        fn id(&self) -> &str {
            "panics"
        }

        async fn classify(&self, _text: &str) -> CollaboratorResult<Verdict> {
            panic!("classifier blew up")
        }
    }

    #[tokio::test]
    async fn ping_reports_generation() {
        let mut h = Harness::start(services()).await;
        let body = h.call(Action::Ping).await;
        assert_eq!(body, json!({ "pong": true, "generation": 7 }));
    }

    #[tokio::test]
    async fn batch_results_come_back_in_order_and_get_cached() {
        let classifier = Arc::new(
            MockClassifier::new().with_verdict("You won't believe", Verdict::clickbait(0.97, "tease")),
        );
        let mut h = Harness::start(services().with_classifier(classifier.clone())).await;
        let items = vec!["Quarterly earnings".to_string(), "You won't believe".to_string()];

        let body = h.call(Action::ClassifyBatch { items: items.clone() }).await;
        let outcomes: Vec<ItemOutcome<crate::cache::ClassificationRecord>> =
            serde_json::from_value(body).unwrap();
        assert!(!outcomes[0].record().unwrap().is_clickbait);
        assert!(outcomes[1].record().unwrap().is_clickbait);

        let body = h.call(Action::ClassifyBatch { items }).await;
        assert_eq!(body[0]["cached"], true);
        assert_eq!(body[1]["cached"], true);
        assert_eq!(classifier.calls(), 2);

        let stats = h.call(Action::GetStats).await;
        assert_eq!(stats["classifications"], 2);
        let cleared = h.call(Action::ClearCache).await;
        assert_eq!(cleared["cleared"], 2);
    }

    #[tokio::test]
    async fn single_item_failure_is_an_error_reply() {
        let classifier = Arc::new(MockClassifier::new().with_failure("broken", "model overloaded"));
        let mut h = Harness::start(services().with_classifier(classifier)).await;

        let body = h
            .call(Action::Classify {
                text: "broken".into(),
            })
            .await;
        let (message, kind) = as_error(&body).unwrap();
        assert!(message.contains("model overloaded"));
        assert_eq!(kind, None);
    }

    #[tokio::test]
    async fn summarize_fetches_then_summarizes() {
        let fetcher = Arc::new(MockFetcher::new().with_page("https://x.test/a", "one two three four"));
        let services = services()
            .with_fetcher(fetcher)
            .with_summarizer(Arc::new(MockSummarizer::new(2)));
        let mut h = Harness::start(services).await;

        let body = h
            .call(Action::Summarize {
                url: "https://x.test/a".into(),
            })
            .await;
        assert_eq!(body["status"], "done");
        assert_eq!(body["record"]["text"], "one two");
    }

    #[tokio::test]
    async fn panicking_handler_still_gets_exactly_one_reply() {
        let mut h = Harness::start(services().with_classifier(Arc::new(PanickingClassifier))).await;

        // Batch items run in their own tasks, so the panic is isolated per item
        let body = h
            .call(Action::ClassifyBatch {
                items: vec!["a".into()],
            })
            .await;
        assert_eq!(body[0]["status"], "errored");

        // The coordinator is still serving
        let body = h.call(Action::Ping).await;
        assert_eq!(body["pong"], true);
        assert!(h.replies.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_is_a_timeout_reply() {
        let classifier = Arc::new(MockClassifier::new().with_latency(Duration::from_secs(5)));
        let services = services()
            .with_classifier(classifier)
            .with_batch_config(BatchConfig::default().with_deadline(1_000, 0));
        let mut h = Harness::start(services).await;

        let body = h
            .call(Action::ClassifyBatch {
                items: vec!["slow".into()],
            })
            .await;
        let (_, kind) = as_error(&body).unwrap();
        assert_eq!(kind.as_deref(), Some(ERROR_KIND_TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pulses_only_while_a_request_is_outstanding() {
        let classifier = Arc::new(MockClassifier::new().with_latency(Duration::from_secs(1)));
        let services = services()
            .with_classifier(classifier)
            .with_heartbeat_config(HeartbeatConfig {
                idle_threshold_ms: 600,
            });
        let mut h = Harness::start(services).await;

        h.call(Action::Classify { text: "slow".into() }).await;
        let during = h.pulses.load(Ordering::SeqCst);
        // One pulse for the inbound message plus one per 100ms beat
        assert!(during >= 9, "expected steady pulses, got {}", during);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.pulses.load(Ordering::SeqCst), during);
    }

    #[tokio::test]
    async fn unknown_port_is_ignored() {
        let mut h = Harness::start(services()).await;
        h.inbox
            .send(Inbound::Message {
                port: PortId::new(99),
                request: Request {
                    correlation_id: CorrelationId::new(),
                    action: Action::Ping,
                },
            })
            .await
            .unwrap();
        let body = h.call(Action::Ping).await;
        assert_eq!(body["pong"], true);
    }

    #[tokio::test]
    async fn aborting_the_run_closes_reply_streams() {
        let mut h = Harness::start(services()).await;
        h.call(Action::Ping).await;
        h.task.abort();
        assert!(h.replies.recv().await.is_none());
    }
}
