//! Content-addressed cache keys

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for name-based (v5) key UUIDs. Changing it orphans every
/// persisted entry.
const KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_42d3_8a0e_4b57_9c2d_31e8_f0a4_b7d5);

/// The two record kinds held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheKind {
    Classification,
    Summary,
}

impl CacheKind {
    pub const ALL: [CacheKind; 2] = [CacheKind::Classification, CacheKind::Summary];

    /// Storage key prefix; also the namespace used by clear-all.
    pub fn prefix(self) -> &'static str {
        match self {
            CacheKind::Classification => "cls:",
            CacheKind::Summary => "sum:",
        }
    }

    /// Which kind a raw storage key belongs to, if any
    pub fn of_key(key: &str) -> Option<CacheKind> {
        Self::ALL.into_iter().find(|kind| key.starts_with(kind.prefix()))
    }
}

/// Lowercase, trim, and collapse whitespace runs so cosmetic differences in
/// link text share one entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trim and drop the fragment; everything else in a URL is significant.
pub fn normalize_url(url: &str) -> &str {
    let trimmed = url.trim();
    match trimmed.find('#') {
        Some(pos) => &trimmed[..pos],
        None => trimmed,
    }
}

fn derive(kind: CacheKind, normalized: &str) -> String {
    let id = Uuid::new_v5(&KEY_NAMESPACE, normalized.as_bytes());
    format!("{}{}", kind.prefix(), id)
}

/// Key for a classification of the given link text.
pub fn classification_key(text: &str) -> String {
    derive(CacheKind::Classification, &normalize_text(text))
}

/// Key for a summary of the given URL.
pub fn summary_key(url: &str) -> String {
    derive(CacheKind::Summary, normalize_url(url))
}
