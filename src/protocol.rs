//! Messages exchanged between requesters and the coordinator
//!
//! A request is `{"action": "<name>", ...payload}` plus a correlation id.
//! A reply body is any JSON value, or `{"error": true, "message": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Error reply `kind` for a batch that ran past its deadline.
pub const ERROR_KIND_TIMEOUT: &str = "timeout";

/// Identifies one request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the requester wants done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    Ping,
    Classify { text: String },
    ClassifyBatch { items: Vec<String> },
    Summarize { url: String },
    SummarizeBatch { urls: Vec<String> },
    ClearCache,
    GetStats,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Ping => "ping",
            Action::Classify { .. } => "classify",
            Action::ClassifyBatch { .. } => "classifyBatch",
            Action::Summarize { .. } => "summarize",
            Action::SummarizeBatch { .. } => "summarizeBatch",
            Action::ClearCache => "clearCache",
            Action::GetStats => "getStats",
        }
    }

    /// Number of work items carried, used to scale deadlines
    pub fn item_count(&self) -> usize {
        match self {
            Action::Classify { .. } | Action::Summarize { .. } => 1,
            Action::ClassifyBatch { items } => items.len(),
            Action::SummarizeBatch { urls } => urls.len(),
            Action::Ping | Action::ClearCache | Action::GetStats => 0,
        }
    }
}

/// One exchange's request half.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub action: Action,
}

impl Request {
    /// Wrap an action with a fresh correlation id.
    pub fn new(action: Action) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            action,
        }
    }
}

/// One exchange's reply half.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub correlation_id: CorrelationId,
    pub body: Value,
}

/// Build an error reply body.
pub fn error_body(message: impl Into<String>, kind: Option<&str>) -> Value {
    let mut body = json!({ "error": true, "message": message.into() });
    if let Some(kind) = kind {
        body["kind"] = Value::String(kind.to_string());
    }
    body
}

/// If `body` is an error reply, its message and optional kind.
pub fn as_error(body: &Value) -> Option<(String, Option<String>)> {
    if body.get("error").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let kind = body.get("kind").and_then(Value::as_str).map(str::to_string);
    Some((message, kind))
}
