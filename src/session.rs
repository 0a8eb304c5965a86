//! Requester context for one page
//!
//! A `PageSession` sends classification and summary work to the coordinator
//! through a `ResilientRequester` and moves each link through its
//! `LinkLifecycle` according to how the request ended.

use crate::cache::{CacheStats, ClassificationRecord, SummaryRecord};
use crate::channel::{ChannelError, PortTransport, RequestPolicy, ResilientRequester};
use crate::config::Config;
use crate::host::ServiceHost;
use crate::pipeline::{
    BatchConfig, ItemOutcome, LifecycleError, LinkId, LinkLifecycle, LinkStatus, Transition,
};
use crate::protocol::Action;
use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The coordinator answered but the item itself failed
    #[error("{0}")]
    Item(String),

    #[error("expected {expected} result(s), got {got}")]
    Mismatch { expected: usize, got: usize },
}

#[derive(Deserialize)]
struct Cleared {
    cleared: usize,
}

#[derive(Deserialize)]
struct Pong {
    generation: u64,
}

pub struct PageSession {
    requester: ResilientRequester,
    lifecycle: Mutex<LinkLifecycle>,
    batch: BatchConfig,
}

impl PageSession {
    pub fn new(requester: ResilientRequester, batch: BatchConfig) -> Self {
        Self {
            requester,
            lifecycle: Mutex::new(LinkLifecycle::new()),
            batch,
        }
    }

    /// A session talking to `host` over a fresh port.
    pub fn connect(host: &Arc<ServiceHost>, config: &Config) -> Self {
        let transport = Arc::new(PortTransport::new(host.clone()));
        let requester =
            ResilientRequester::new(transport, host.probe()).with_policy(config.request.clone());
        Self::new(requester, config.batch.clone())
    }

    fn lifecycle(&self) -> MutexGuard<'_, LinkLifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.lifecycle().subscribe()
    }

    pub fn status(&self, link: &LinkId) -> Option<LinkStatus> {
        self.lifecycle().status(link)
    }

    pub fn is_disabled(&self) -> bool {
        self.lifecycle().is_disabled()
    }

    /// The external refresh after channel death
    pub fn reset(&self) {
        self.lifecycle().reset();
    }

    /// Per-attempt policy for a batch action: the coordinator's own deadline
    /// for its item count plus one ordinary request timeout.
    fn batch_policy(&self, action: &Action) -> RequestPolicy {
        let base = self.requester.policy();
        let deadline = self.batch.deadline_for(action.item_count()).as_millis() as u64;
        base.clone()
            .with_timeout_ms(deadline.saturating_add(base.timeout_ms))
    }

    /// Classify the given links in one batch request.
    ///
    /// Links not currently `Unclassified` are skipped. Returns the outcome
    /// of every link that was sent, in input order.
    pub async fn classify_links(
        &self,
        links: Vec<(LinkId, String)>,
    ) -> Result<Vec<(LinkId, ItemOutcome<ClassificationRecord>)>, SessionError> {
        let mut started = Vec::with_capacity(links.len());
        {
            let mut lifecycle = self.lifecycle();
            for (link, text) in links {
                lifecycle.register(link.clone());
                match lifecycle.begin_classify(&link) {
                    Ok(_) => started.push((link, text)),
                    Err(LifecycleError::Disabled) => return Err(LifecycleError::Disabled.into()),
                    Err(e) => debug!(error = %e, "link skipped"),
                }
            }
        }
        if started.is_empty() {
            return Ok(Vec::new());
        }

        let items: Vec<String> = started.iter().map(|(_, text)| text.clone()).collect();
        let action = Action::ClassifyBatch { items };
        let policy = self.batch_policy(&action);
        let result = self
            .requester
            .send_as_with::<Vec<ItemOutcome<ClassificationRecord>>>(action, &policy)
            .await;

        let mut lifecycle = self.lifecycle();
        let outcomes = match result {
            Ok(outcomes) if outcomes.len() == started.len() => outcomes,
            Ok(outcomes) => {
                for (link, _) in &started {
                    let _ = lifecycle.fail_item(link);
                }
                return Err(SessionError::Mismatch {
                    expected: started.len(),
                    got: outcomes.len(),
                });
            }
            Err(e) => {
                for (link, _) in &started {
                    let _ = lifecycle.fail_request(link, &e);
                }
                return Err(e.into());
            }
        };

        let mut results = Vec::with_capacity(outcomes.len());
        for ((link, _), outcome) in started.into_iter().zip(outcomes) {
            match outcome.record() {
                Some(record) => lifecycle.finish_classify(&link, record.is_clickbait)?,
                None => lifecycle.fail_item(&link)?,
            };
            results.push((link, outcome));
        }
        Ok(results)
    }

    /// Summarize a flagged (or previously errored) link.
    pub async fn summarize_link(
        &self,
        link: &LinkId,
        url: &str,
    ) -> Result<SummaryRecord, SessionError> {
        self.lifecycle().begin_summarize(link)?;

        let result = self
            .requester
            .send_as::<ItemOutcome<SummaryRecord>>(Action::Summarize {
                url: url.to_string(),
            })
            .await;

        let mut lifecycle = self.lifecycle();
        match result {
            Ok(ItemOutcome::Done { record, .. }) => {
                lifecycle.finish_summarize(link)?;
                Ok(record)
            }
            Ok(ItemOutcome::Errored { message }) => {
                lifecycle.fail_item(link)?;
                Err(SessionError::Item(message))
            }
            Err(e) => {
                lifecycle.fail_request(link, &e)?;
                Err(e.into())
            }
        }
    }

    /// Summarize URLs directly, outside any link's lifecycle.
    pub async fn summarize_urls(
        &self,
        urls: Vec<String>,
    ) -> Result<Vec<ItemOutcome<SummaryRecord>>, SessionError> {
        let action = Action::SummarizeBatch { urls };
        let policy = self.batch_policy(&action);
        Ok(self.requester.send_as_with(action, &policy).await?)
    }

    pub async fn stats(&self) -> Result<CacheStats, SessionError> {
        Ok(self.requester.send_as(Action::GetStats).await?)
    }

    /// Remove every cached record. Returns how many were removed.
    pub async fn clear_cache(&self) -> Result<usize, SessionError> {
        let cleared: Cleared = self.requester.send_as(Action::ClearCache).await?;
        info!(cleared = cleared.cleared, "cache cleared");
        Ok(cleared.cleared)
    }

    /// Generation of the coordinator instance that answered
    pub async fn ping(&self) -> Result<u64, SessionError> {
        let pong: Pong = self.requester.send_as(Action::Ping).await?;
        Ok(pong.generation)
    }
}
