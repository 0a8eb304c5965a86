//! Per-link state machine
//!
//! ```text
//! Unclassified → Classifying → ClassifiedClean
//!                            → ClassifiedFlagged → Summarizing → Summarized
//!                                                              → Errored → Summarizing (retry)
//! ```
//!
//! Channel death is global: every in-flight link becomes `Disabled` and no
//! new attempt may start until `reset()`. A closed or timed-out request only
//! reverts the link it was for.

use crate::channel::ChannelError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 256;

/// Identifies one link within a page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LinkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for LinkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkStatus {
    Unclassified,
    Classifying,
    ClassifiedClean,
    ClassifiedFlagged,
    Summarizing,
    Summarized,
    Errored,
    Disabled,
}

impl LinkStatus {
    /// A request for this link is outstanding
    pub fn is_in_flight(self) -> bool {
        matches!(self, LinkStatus::Classifying | LinkStatus::Summarizing)
    }
}

/// One applied state change, as published to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub link: LinkId,
    pub from: LinkStatus,
    pub to: LinkStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("unknown link: {0}")]
    UnknownLink(LinkId),

    #[error("link {link}: cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        link: LinkId,
        from: LinkStatus,
        to: LinkStatus,
    },

    #[error("channel is dead; links are disabled until the page is refreshed")]
    Disabled,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: LinkStatus,
    /// Where to go back to if the current attempt is abandoned
    before_attempt: LinkStatus,
}

/// Tracks every link on one page.
pub struct LinkLifecycle {
    links: HashMap<LinkId, Entry>,
    disabled: bool,
    events: broadcast::Sender<Transition>,
}

impl Default for LinkLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkLifecycle {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            links: HashMap::new(),
            disabled: false,
            events,
        }
    }

    /// Transitions as they are applied
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    /// Start tracking a link as `Unclassified`. Returns false if it was
    /// already known.
    pub fn register(&mut self, link: LinkId) -> bool {
        if self.links.contains_key(&link) {
            return false;
        }
        self.links.insert(
            link,
            Entry {
                status: LinkStatus::Unclassified,
                before_attempt: LinkStatus::Unclassified,
            },
        );
        true
    }

    pub fn status(&self, link: &LinkId) -> Option<LinkStatus> {
        self.links.get(link).map(|e| e.status)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of links currently in `status`
    pub fn count(&self, status: LinkStatus) -> usize {
        self.links.values().filter(|e| e.status == status).count()
    }

    pub fn begin_classify(&mut self, link: &LinkId) -> Result<Transition, LifecycleError> {
        self.begin(link, &[LinkStatus::Unclassified], LinkStatus::Classifying)
    }

    pub fn finish_classify(
        &mut self,
        link: &LinkId,
        is_clickbait: bool,
    ) -> Result<Transition, LifecycleError> {
        let to = if is_clickbait {
            LinkStatus::ClassifiedFlagged
        } else {
            LinkStatus::ClassifiedClean
        };
        self.apply(link, &[LinkStatus::Classifying], to)
    }

    /// Start (or retry) summarizing a flagged link.
    pub fn begin_summarize(&mut self, link: &LinkId) -> Result<Transition, LifecycleError> {
        self.begin(
            link,
            &[LinkStatus::ClassifiedFlagged, LinkStatus::Errored],
            LinkStatus::Summarizing,
        )
    }

    pub fn finish_summarize(&mut self, link: &LinkId) -> Result<Transition, LifecycleError> {
        self.apply(link, &[LinkStatus::Summarizing], LinkStatus::Summarized)
    }

    /// The coordinator answered, but this item failed.
    ///
    /// A summary failure lands in `Errored` (retryable); a classification
    /// failure goes back to `Unclassified`.
    pub fn fail_item(&mut self, link: &LinkId) -> Result<Transition, LifecycleError> {
        match self.status(link) {
            Some(LinkStatus::Summarizing) => {
                self.apply(link, &[LinkStatus::Summarizing], LinkStatus::Errored)
            }
            Some(_) => self.revert(link),
            None => Err(LifecycleError::UnknownLink(link.clone())),
        }
    }

    /// Apply a request failure for `link`.
    ///
    /// `ChannelDead` disables every in-flight link, not just this one.
    pub fn fail_request(
        &mut self,
        link: &LinkId,
        error: &ChannelError,
    ) -> Result<Vec<Transition>, LifecycleError> {
        if error.is_permanent() {
            return Ok(self.disable_all());
        }
        if error.is_transient() {
            return self.revert(link).map(|t| vec![t]);
        }
        self.fail_item(link).map(|t| vec![t])
    }

    /// Channel death: all in-flight links become `Disabled` and new
    /// attempts are refused until `reset()`.
    pub fn disable_all(&mut self) -> Vec<Transition> {
        if !self.disabled {
            warn!("channel dead, disabling in-flight links");
        }
        self.disabled = true;

        let in_flight: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, e)| e.status.is_in_flight())
            .map(|(id, _)| id.clone())
            .collect();

        in_flight
            .into_iter()
            .filter_map(|link| self.set(&link, LinkStatus::Disabled))
            .collect()
    }

    /// The external refresh: forget every link and accept work again.
    pub fn reset(&mut self) {
        self.links.clear();
        self.disabled = false;
        debug!("link lifecycle reset");
    }

    fn begin(
        &mut self,
        link: &LinkId,
        allowed_from: &[LinkStatus],
        to: LinkStatus,
    ) -> Result<Transition, LifecycleError> {
        if self.disabled {
            return Err(LifecycleError::Disabled);
        }
        let from = self.check(link, allowed_from, to)?;
        if let Some(entry) = self.links.get_mut(link) {
            entry.before_attempt = from;
        }
        self.set(link, to)
            .ok_or_else(|| LifecycleError::UnknownLink(link.clone()))
    }

    fn apply(
        &mut self,
        link: &LinkId,
        allowed_from: &[LinkStatus],
        to: LinkStatus,
    ) -> Result<Transition, LifecycleError> {
        self.check(link, allowed_from, to)?;
        self.set(link, to)
            .ok_or_else(|| LifecycleError::UnknownLink(link.clone()))
    }

    /// Abandon the current attempt, returning to the pre-attempt state.
    fn revert(&mut self, link: &LinkId) -> Result<Transition, LifecycleError> {
        let entry = self
            .links
            .get(link)
            .copied()
            .ok_or_else(|| LifecycleError::UnknownLink(link.clone()))?;
        if !entry.status.is_in_flight() {
            return Err(LifecycleError::InvalidTransition {
                link: link.clone(),
                from: entry.status,
                to: entry.before_attempt,
            });
        }
        self.set(link, entry.before_attempt)
            .ok_or_else(|| LifecycleError::UnknownLink(link.clone()))
    }

    fn check(
        &self,
        link: &LinkId,
        allowed_from: &[LinkStatus],
        to: LinkStatus,
    ) -> Result<LinkStatus, LifecycleError> {
        let from = self
            .status(link)
            .ok_or_else(|| LifecycleError::UnknownLink(link.clone()))?;
        if allowed_from.contains(&from) {
            Ok(from)
        } else {
            Err(LifecycleError::InvalidTransition {
                link: link.clone(),
                from,
                to,
            })
        }
    }

    fn set(&mut self, link: &LinkId, to: LinkStatus) -> Option<Transition> {
        let entry = self.links.get_mut(link)?;
        let transition = Transition {
            link: link.clone(),
            from: entry.status,
            to,
        };
        entry.status = to;
        // No subscribers is fine
        let _ = self.events.send(transition.clone());
        Some(transition)
    }
}
