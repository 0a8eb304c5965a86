//! Mock collaborators for testing: preconfigured, instrumented responses.

use super::{Classifier, CollaboratorError, CollaboratorResult, Fetcher, Summarizer, Verdict};
use crate::cache::normalize_text;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Scripted {
    Verdict(Verdict),
    Failure(String),
}

/// Mock classifier.
///
/// Answers from a table keyed by normalized text, falling back to a default
/// verdict. Counts calls and tracks the peak number of overlapping calls so
/// tests can check concurrency bounds.
pub struct MockClassifier {
    default: Verdict,
    responses: HashMap<String, Scripted>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClassifier {
    /// A classifier that calls everything clean unless told otherwise.
    pub fn new() -> Self {
        Self {
            default: Verdict::clean(0.9, "mock default"),
            responses: HashMap::new(),
            delays: HashMap::new(),
            default_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, verdict: Verdict) -> Self {
        self.default = verdict;
        self
    }

    /// Register a verdict for specific text.
    pub fn with_verdict(mut self, text: &str, verdict: Verdict) -> Self {
        self.responses
            .insert(normalize_text(text), Scripted::Verdict(verdict));
        self
    }

    /// Register a failure for specific text.
    pub fn with_failure(mut self, text: &str, message: impl Into<String>) -> Self {
        self.responses
            .insert(normalize_text(text), Scripted::Failure(message.into()));
        self
    }

    /// Delay every call by `delay` (tokio time, so paused clocks apply).
    pub fn with_latency(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Delay calls for specific text, overriding the default latency.
    pub fn with_latency_for(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(normalize_text(text), delay);
        self
    }

    /// Total number of `classify` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Calls running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Holds one slot of `in_flight` until the call finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn id(&self) -> &str {
        "mock"
    }

    async fn classify(&self, text: &str) -> CollaboratorResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slot = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let normalized = normalize_text(text);
        let delay = self
            .delays
            .get(&normalized)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        drop(slot);

        match self.responses.get(&normalized) {
            Some(Scripted::Verdict(v)) => Ok(v.clone()),
            Some(Scripted::Failure(msg)) => Err(CollaboratorError::Failed(msg.clone())),
            None => Ok(self.default.clone()),
        }
    }
}

/// Mock fetcher. Returns registered article text per URL.
#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, String>,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.pages.insert(url.into(), text.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| CollaboratorError::Failed(format!("no mock page for '{}'", url)))
    }
}

/// Mock summarizer. Keeps the first `words` words of the article.
pub struct MockSummarizer {
    words: usize,
    calls: AtomicUsize,
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new(12)
    }
}

impl MockSummarizer {
    pub fn new(words: usize) -> Self {
        Self {
            words,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, article: &str) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(article
            .split_whitespace()
            .take(self.words)
            .collect::<Vec<_>>()
            .join(" "))
    }
}
