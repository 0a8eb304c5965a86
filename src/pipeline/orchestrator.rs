//! Batch orchestrator for classification and summary work
//!
//! Items are split into chunks of `concurrency_limit`. Chunks run strictly
//! one after another; the items inside a chunk run concurrently and the
//! whole chunk is awaited before the next starts, so the backend never sees
//! more than `concurrency_limit` calls at once.

use crate::cache::{CacheStore, ClassificationRecord, SummaryRecord};
use crate::collaborators::{Classifier, Fetcher, Summarizer};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Chunking and deadline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per chunk, i.e. peak concurrent collaborator calls
    pub concurrency_limit: usize,
    /// Fixed part of a batch's deadline
    pub deadline_base_ms: u64,
    /// Added to the deadline for every item in the batch
    pub deadline_per_item_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            deadline_base_ms: 10_000,
            deadline_per_item_ms: 2_000,
        }
    }
}

impl BatchConfig {
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_deadline(mut self, base_ms: u64, per_item_ms: u64) -> Self {
        self.deadline_base_ms = base_ms;
        self.deadline_per_item_ms = per_item_ms;
        self
    }

    /// `base + per_item × count`
    pub fn deadline_for(&self, count: usize) -> Duration {
        let per_item = self.deadline_per_item_ms.saturating_mul(count as u64);
        Duration::from_millis(self.deadline_base_ms.saturating_add(per_item))
    }
}

/// Result for one item of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ItemOutcome<R> {
    /// The record, and whether it came from the cache
    Done { record: R, cached: bool },
    /// This item failed; siblings are unaffected
    Errored { message: String },
}

impl<R> ItemOutcome<R> {
    pub fn fresh(record: R) -> Self {
        ItemOutcome::Done {
            record,
            cached: false,
        }
    }

    pub fn cached(record: R) -> Self {
        ItemOutcome::Done {
            record,
            cached: true,
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        ItemOutcome::Errored {
            message: message.into(),
        }
    }

    pub fn record(&self) -> Option<&R> {
        match self {
            ItemOutcome::Done { record, .. } => Some(record),
            ItemOutcome::Errored { .. } => None,
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, ItemOutcome::Errored { .. })
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch of {items} item(s) exceeded its {deadline:?} deadline")]
    DeadlineExceeded { items: usize, deadline: Duration },
}

/// Runs batches against the cache and a collaborator.
pub struct BatchOrchestrator {
    cache: Arc<CacheStore>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(cache: Arc<CacheStore>, config: BatchConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Classify every item, one outcome per item in input order.
    ///
    /// A cache hit skips the classifier; a miss calls it and writes the
    /// result back. Classifier failures only mark their own item.
    pub async fn classify_batch(
        &self,
        items: &[String],
        classifier: Arc<dyn Classifier>,
        concurrency_limit: usize,
    ) -> Result<Vec<ItemOutcome<ClassificationRecord>>, BatchError> {
        let cache = self.cache.clone();
        self.run_chunked(items, concurrency_limit, move |text| {
            classify_item(cache.clone(), classifier.clone(), text)
        })
        .await
    }

    /// Summarize every URL, one outcome per URL in input order.
    pub async fn summarize_batch(
        &self,
        urls: &[String],
        fetcher: Arc<dyn Fetcher>,
        summarizer: Arc<dyn Summarizer>,
        concurrency_limit: usize,
    ) -> Result<Vec<ItemOutcome<SummaryRecord>>, BatchError> {
        let cache = self.cache.clone();
        self.run_chunked(urls, concurrency_limit, move |url| {
            summarize_item(cache.clone(), fetcher.clone(), summarizer.clone(), url)
        })
        .await
    }

    async fn run_chunked<R, F, Fut>(
        &self,
        items: &[String],
        concurrency_limit: usize,
        op: F,
    ) -> Result<Vec<ItemOutcome<R>>, BatchError>
    where
        R: Send + 'static,
        F: Fn(String) -> Fut,
        Fut: Future<Output = ItemOutcome<R>> + Send + 'static,
    {
        let limit = concurrency_limit.max(1);
        let deadline = self.config.deadline_for(items.len());

        let work = async {
            let mut slots: Vec<Option<ItemOutcome<R>>> = items.iter().map(|_| None).collect();

            for (chunk_index, chunk) in items.chunks(limit).enumerate() {
                let offset = chunk_index * limit;
                debug!(chunk = chunk_index, size = chunk.len(), "running chunk");

                let mut tasks = JoinSet::new();
                for (i, item) in chunk.iter().enumerate() {
                    let fut = op(item.clone());
                    tasks.spawn(async move { (offset + i, fut.await) });
                }
                // Completion order is arbitrary; the index puts each result back
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok((index, outcome)) => slots[index] = Some(outcome),
                        Err(e) => warn!(error = %e, "batch item task failed"),
                    }
                }
            }

            slots
                .into_iter()
                .map(|slot| slot.unwrap_or_else(|| ItemOutcome::errored("item task failed")))
                .collect::<Vec<_>>()
        };

        tokio::time::timeout(deadline, work).await.map_err(|_| {
            warn!(items = items.len(), ?deadline, "batch deadline exceeded");
            BatchError::DeadlineExceeded {
                items: items.len(),
                deadline,
            }
        })
    }
}

async fn classify_item(
    cache: Arc<CacheStore>,
    classifier: Arc<dyn Classifier>,
    text: String,
) -> ItemOutcome<ClassificationRecord> {
    if let Some(record) = cache.get_classification(&text) {
        return ItemOutcome::cached(record);
    }
    match classifier.classify(&text).await {
        Ok(verdict) => ItemOutcome::fresh(cache.put_classification(&text, &verdict)),
        Err(e) => {
            warn!(classifier = classifier.id(), error = %e, "classification failed");
            ItemOutcome::errored(e.to_string())
        }
    }
}

async fn summarize_item(
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    summarizer: Arc<dyn Summarizer>,
    url: String,
) -> ItemOutcome<SummaryRecord> {
    if let Some(record) = cache.get_summary(&url) {
        return ItemOutcome::cached(record);
    }
    let article = match fetcher.fetch(&url).await {
        Ok(article) => article,
        Err(e) => {
            warn!(%url, error = %e, "fetch failed");
            return ItemOutcome::errored(e.to_string());
        }
    };
    match summarizer.summarize(&article).await {
        Ok(summary) => ItemOutcome::fresh(cache.put_summary(&url, summary)),
        Err(e) => {
            warn!(%url, error = %e, "summarization failed");
            ItemOutcome::errored(e.to_string())
        }
    }
}
