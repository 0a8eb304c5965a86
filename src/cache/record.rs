//! Cached record types

use super::key::CacheKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Outcome of classifying one piece of link text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRecord {
    pub key: String,
    pub is_clickbait: bool,
    /// Always within `[0, 1]`
    pub confidence: f32,
    pub reason: String,
    pub written_at: DateTime<Utc>,
}

/// Summary of the article behind one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub key: String,
    pub text: String,
    pub written_at: DateTime<Utc>,
}

/// Common view over both record kinds for the store's generic paths.
pub trait CacheRecord: Serialize + DeserializeOwned {
    const KIND: CacheKind;

    fn key(&self) -> &str;

    fn written_at(&self) -> DateTime<Utc>;
}

impl CacheRecord for ClassificationRecord {
    const KIND: CacheKind = CacheKind::Classification;

    fn key(&self) -> &str {
        &self.key
    }

    fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }
}

impl CacheRecord for SummaryRecord {
    const KIND: CacheKind = CacheKind::Summary;

    fn key(&self) -> &str {
        &self.key
    }

    fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }
}

/// Just the timestamp, for eviction scans that don't need the payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WrittenAt {
    pub written_at: DateTime<Utc>,
}
