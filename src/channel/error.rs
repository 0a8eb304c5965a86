//! Channel failure taxonomy

use std::time::Duration;
use thiserror::Error;

/// How a single transport call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The coordinator handle is permanently invalid
    #[error("channel is permanently dead: {0}")]
    Dead(String),

    /// The channel closed before a reply arrived
    #[error("channel closed before a response was received")]
    Closed,

    /// The coordinator gave up on the request because its own deadline passed
    #[error("coordinator deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The coordinator answered with an error reply
    #[error("remote error: {0}")]
    Remote(String),

    #[error("transport failure: {0}")]
    Other(String),
}

/// What `ResilientRequester::send` reports once retrying is over.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Unreachable for the rest of this requester's life; never retried.
    #[error("coordinator channel is dead")]
    ChannelDead,

    /// Closed on every attempt.
    #[error("channel closed on all {attempts} attempt(s)")]
    ChannelClosed { attempts: u32 },

    /// No reply within the deadline on the final attempt.
    #[error("request timed out after {attempts} attempt(s) of {timeout:?}")]
    RequestTimeout { attempts: u32, timeout: Duration },

    /// Unclassified transport failure, passed through without retrying.
    #[error(transparent)]
    Transport(TransportError),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ChannelError {
    /// Whether the caller should stop talking to the coordinator until an
    /// external refresh.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ChannelError::ChannelDead)
    }

    /// Closed/timeout: worth offering the user a manual retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::ChannelClosed { .. } | ChannelError::RequestTimeout { .. }
        )
    }
}
