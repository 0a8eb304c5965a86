//! External collaborators: classifier, fetcher and summarizer
//!
//! The pipeline never decides what clickbait *is*; it only schedules calls
//! to whatever implements these traits. Two families of implementations:
//! - `command`: spawn a configured program per call (production)
//! - `mock`: preconfigured, instrumented responses (testing)

pub mod command;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use command::{CommandClassifier, CommandFetcher, CommandSpec, CommandSummarizer};
pub use mock::{MockClassifier, MockFetcher, MockSummarizer};

/// A classifier's answer for one piece of link text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_clickbait: bool,
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
}

impl Verdict {
    pub fn new(is_clickbait: bool, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            is_clickbait,
            confidence,
            reason: reason.into(),
        }
    }

    pub fn clickbait(confidence: f32, reason: impl Into<String>) -> Self {
        Self::new(true, confidence, reason)
    }

    pub fn clean(confidence: f32, reason: impl Into<String>) -> Self {
        Self::new(false, confidence, reason)
    }

    /// Force confidence into `[0, 1]`; NaN becomes 0.
    pub fn clamped(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

/// Errors from collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator not available: {0}")]
    Unavailable(String),
    #[error("collaborator failed: {0}")]
    Failed(String),
    #[error("collaborator output parse error: {0}")]
    Parse(String),
    #[error("collaborator IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Decides whether link text is clickbait.
///
/// May be a fast local heuristic or a slow model-backed call; the
/// orchestrator treats both the same.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Identifier used in logs
    fn id(&self) -> &str;

    async fn classify(&self, text: &str) -> CollaboratorResult<Verdict>;
}

/// Turns a URL into plain article text.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CollaboratorResult<String>;
}

/// Condenses article text into a short summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, article: &str) -> CollaboratorResult<String>;
}

/// Stand-in for a collaborator with no command configured. Every call
/// fails with `Unavailable`, which the orchestrator records per item.
#[derive(Debug, Clone)]
pub struct Unconfigured {
    role: &'static str,
}

impl Unconfigured {
    pub fn new(role: &'static str) -> Self {
        Self { role }
    }

    fn error(&self) -> CollaboratorError {
        CollaboratorError::Unavailable(format!("no {} configured", self.role))
    }
}

#[async_trait]
impl Classifier for Unconfigured {
    fn id(&self) -> &str {
        "unconfigured"
    }

    async fn classify(&self, _text: &str) -> CollaboratorResult<Verdict> {
        Err(self.error())
    }
}

#[async_trait]
impl Fetcher for Unconfigured {
    async fn fetch(&self, _url: &str) -> CollaboratorResult<String> {
        Err(self.error())
    }
}

#[async_trait]
impl Summarizer for Unconfigured {
    async fn summarize(&self, _article: &str) -> CollaboratorResult<String> {
        Err(self.error())
    }
}
