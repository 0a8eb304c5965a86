//! Two-kind result cache
//!
//! Classification records are keyed by a stable hash of the normalized link
//! text, summary records by a stable hash of the URL. Entries expire after a
//! TTL and each kind is capped at its own size budget, evicting the oldest
//! `writtenAt` first.

mod clock;
mod key;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{classification_key, normalize_text, normalize_url, summary_key, CacheKind};
pub use record::{CacheRecord, ClassificationRecord, SummaryRecord};
pub use store::{CacheConfig, CacheStats, CacheStore};
