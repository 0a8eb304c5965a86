//! CacheStore: TTL + size-bounded cache over a `KeyValueStore`

use super::clock::{Clock, SystemClock};
use super::key::{classification_key, summary_key, CacheKind};
use super::record::{CacheRecord, ClassificationRecord, SummaryRecord, WrittenAt};
use crate::collaborators::Verdict;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest TTL honoured; larger configured values are clamped.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Cache limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum age of a valid entry
    pub ttl_secs: u64,
    /// Size budget for classification records
    pub max_classifications: usize,
    /// Size budget for summary records
    pub max_summaries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 7 * 24 * 60 * 60,
            max_classifications: 1000,
            max_summaries: 200,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    pub fn with_max_classifications(mut self, max: usize) -> Self {
        self.max_classifications = max;
        self
    }

    pub fn with_max_summaries(mut self, max: usize) -> Self {
        self.max_summaries = max;
        self
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    fn max_for(&self, kind: CacheKind) -> usize {
        match kind {
            CacheKind::Classification => self.max_classifications,
            CacheKind::Summary => self.max_summaries,
        }
    }
}

/// Entry counts per record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub classifications: usize,
    pub summaries: usize,
}

/// Content-addressed cache for classification and summary records.
///
/// Only the coordinator holds one. Nothing here returns an error: storage
/// faults are logged and behave like a miss (reads) or a dropped write.
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached classification for `text`, if present and unexpired
    pub fn get_classification(&self, text: &str) -> Option<ClassificationRecord> {
        self.read(&classification_key(text))
    }

    /// Record a classifier verdict for `text`, replacing any previous record.
    pub fn put_classification(&self, text: &str, verdict: &Verdict) -> ClassificationRecord {
        let clamped = verdict.clone().clamped();
        let record = ClassificationRecord {
            key: classification_key(text),
            is_clickbait: clamped.is_clickbait,
            confidence: clamped.confidence,
            reason: clamped.reason,
            written_at: self.clock.now(),
        };
        self.write(&record);
        record
    }

    /// Cached summary for `url`, if present and unexpired
    pub fn get_summary(&self, url: &str) -> Option<SummaryRecord> {
        self.read(&summary_key(url))
    }

    /// Record a summary for `url`, replacing any previous record.
    pub fn put_summary(&self, url: &str, text: impl Into<String>) -> SummaryRecord {
        let record = SummaryRecord {
            key: summary_key(url),
            text: text.into(),
            written_at: self.clock.now(),
        };
        self.write(&record);
        record
    }

    /// Remove every classification and summary entry, leaving unrelated keys
    /// in the backing store untouched. Returns the number removed.
    pub fn clear_all(&self) -> usize {
        let mut removed = 0;
        for (key, _) in self.entries() {
            if CacheKind::of_key(&key).is_some() && self.remove(&key) {
                removed += 1;
            }
        }
        debug!(removed, "cache cleared");
        removed
    }

    /// Counts of entries a read would return, per kind. Expired and
    /// unreadable entries are left out without being purged.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for (key, raw) in self.entries() {
            let Some(kind) = CacheKind::of_key(&key) else {
                continue;
            };
            match serde_json::from_str::<WrittenAt>(&raw) {
                Ok(stamp) if self.is_fresh(stamp.written_at) => {}
                _ => continue,
            }
            match kind {
                CacheKind::Classification => stats.classifications += 1,
                CacheKind::Summary => stats.summaries += 1,
            }
        }
        stats
    }

    fn is_fresh(&self, written_at: DateTime<Utc>) -> bool {
        self.clock.now() - written_at < self.config.ttl()
    }

    fn read<R: CacheRecord>(&self, key: &str) -> Option<R> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        let record: R = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry dropped");
                self.remove(key);
                return None;
            }
        };

        if self.is_fresh(record.written_at()) {
            Some(record)
        } else {
            debug!(key, "cache entry expired");
            self.remove(key);
            None
        }
    }

    fn write<R: CacheRecord>(&self, record: &R) {
        let raw = match serde_json::to_string(record) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = record.key(), error = %e, "cache record not serializable");
                return;
            }
        };
        if let Err(e) = self.store.set(record.key(), &raw) {
            warn!(key = record.key(), error = %e, "cache write failed");
            return;
        }
        self.evict(R::KIND, record.key());
    }

    /// Drop oldest-by-`writtenAt` entries of `kind` until it fits its budget.
    /// Read recency plays no part. `written` is the key just stored; it goes
    /// last whatever its timestamp ties with.
    fn evict(&self, kind: CacheKind, written: &str) {
        let max = self.config.max_for(kind);
        let mut stamped: Vec<(bool, DateTime<Utc>, String)> = Vec::new();
        for (key, raw) in self.entries() {
            if !key.starts_with(kind.prefix()) {
                continue;
            }
            let newest = key == written;
            match serde_json::from_str::<WrittenAt>(&raw) {
                Ok(stamp) => stamped.push((newest, stamp.written_at, key)),
                // Unreadable entries sort first so they go before real data
                Err(_) => stamped.push((newest, DateTime::<Utc>::MIN_UTC, key)),
            }
        }

        if stamped.len() <= max {
            return;
        }

        stamped.sort();
        let excess = stamped.len() - max;
        for (_, _, key) in stamped.into_iter().take(excess) {
            debug!(key, "evicting cache entry");
            self.remove(&key);
        }
    }

    fn entries(&self) -> Vec<(String, String)> {
        match self.store.get_all() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "cache scan failed");
                Vec::new()
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key, error = %e, "cache remove failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::storage::{MemoryStore, StorageError, StorageResult};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn cache_with(config: CacheConfig) -> (CacheStore, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let cache = CacheStore::new(store.clone(), config).with_clock(clock.clone());
        (cache, store, clock)
    }

    #[test]
    fn test_put_then_get_classification() {
        let (cache, _, _) = cache_with(CacheConfig::default());
        assert!(cache.get_classification("Top 10 secrets").is_none());

        let written = cache.put_classification("Top 10 secrets", &Verdict::clickbait(0.8, "listicle"));
        let read = cache.get_classification("top 10  SECRETS").unwrap();
        assert_eq!(read, written);
        assert!(read.is_clickbait);
        assert_eq!(read.written_at, start());
    }

    #[test]
    fn test_ttl_boundary() {
        let config = CacheConfig::default();
        let ttl = Duration::seconds(config.ttl_secs as i64);
        let (cache, _, clock) = cache_with(config);

        cache.put_summary("https://news.test/a", "short summary");

        clock.set(start() + ttl - Duration::seconds(1));
        assert!(cache.get_summary("https://news.test/a").is_some());

        clock.set(start() + ttl + Duration::seconds(1));
        assert!(cache.get_summary("https://news.test/a").is_none());
        // Expired entries are dropped on read
        assert_eq!(cache.stats().summaries, 0);
    }

    #[test]
    fn test_eviction_drops_oldest_written() {
        let (cache, _, clock) = cache_with(CacheConfig::default().with_max_classifications(3));

        for i in 0..3 {
            cache.put_classification(&format!("headline {i}"), &Verdict::clean(0.5, ""));
            clock.advance(Duration::seconds(1));
        }
        // Reading the oldest does not protect it
        assert!(cache.get_classification("headline 0").is_some());

        cache.put_classification("headline 3", &Verdict::clean(0.5, ""));
        assert_eq!(cache.stats().classifications, 3);
        assert!(cache.get_classification("headline 0").is_none());
        for i in 1..4 {
            assert!(cache.get_classification(&format!("headline {i}")).is_some());
        }

        clock.advance(Duration::seconds(1));
        cache.put_classification("headline 4", &Verdict::clean(0.5, ""));
        assert_eq!(cache.stats().classifications, 3);
        assert!(cache.get_classification("headline 1").is_none());
    }

    #[test]
    fn test_eviction_keeps_newest_on_timestamp_tie() {
        let (cache, _, _) = cache_with(CacheConfig::default().with_max_classifications(2));

        // Same clock instant for every write, so only write order separates them
        for i in 0..20 {
            let text = format!("tied headline {i}");
            let written = cache.put_classification(&text, &Verdict::clean(0.5, ""));
            assert_eq!(cache.get_classification(&text), Some(written));
            assert!(cache.stats().classifications <= 2);
        }
    }

    #[test]
    fn test_single_slot_budget_holds_latest_write() {
        let (cache, _, _) = cache_with(CacheConfig::default().with_max_classifications(1));
        for i in 0..20 {
            cache.put_classification(&format!("old {i}"), &Verdict::clean(0.5, ""));
            cache.put_classification(&format!("new {i}"), &Verdict::clean(0.5, ""));
            assert!(cache.get_classification(&format!("new {i}")).is_some());
            assert!(cache.get_classification(&format!("old {i}")).is_none());
        }
    }

    #[test]
    fn test_stats_skip_expired_entries_before_any_read() {
        let config = CacheConfig::default().with_ttl_secs(60);
        let (cache, store, clock) = cache_with(config);
        cache.put_classification("stale", &Verdict::clean(0.5, ""));
        cache.put_summary("https://news.test/a", "old news");
        clock.advance(Duration::seconds(30));
        cache.put_classification("fresh", &Verdict::clean(0.5, ""));

        clock.advance(Duration::seconds(45));
        assert_eq!(
            cache.stats(),
            CacheStats {
                classifications: 1,
                summaries: 0
            }
        );
        // Counting does not purge
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_budgets_are_per_kind() {
        let config = CacheConfig::default()
            .with_max_classifications(1)
            .with_max_summaries(2);
        let (cache, _, clock) = cache_with(config);

        cache.put_summary("https://a.test", "a");
        clock.advance(Duration::seconds(1));
        cache.put_summary("https://b.test", "b");
        clock.advance(Duration::seconds(1));
        cache.put_classification("one", &Verdict::clean(0.5, ""));
        clock.advance(Duration::seconds(1));
        cache.put_classification("two", &Verdict::clean(0.5, ""));

        assert_eq!(
            cache.stats(),
            CacheStats {
                classifications: 1,
                summaries: 2
            }
        );
    }

    #[test]
    fn test_refresh_replaces_record() {
        let (cache, _, clock) = cache_with(CacheConfig::default());
        cache.put_classification("headline", &Verdict::clean(0.6, "first"));
        clock.advance(Duration::seconds(30));
        let second = cache.put_classification("headline", &Verdict::clickbait(0.7, "second"));

        let read = cache.get_classification("headline").unwrap();
        assert_eq!(read, second);
        assert_eq!(cache.stats().classifications, 1);
    }

    #[test]
    fn test_clear_all_keeps_foreign_keys() {
        let (cache, store, _) = cache_with(CacheConfig::default());
        store.set("settings:enabled", "true").unwrap();
        cache.put_classification("headline", &Verdict::clean(0.5, ""));
        cache.put_summary("https://a.test", "summary");

        assert_eq!(cache.clear_all(), 2);
        assert_eq!(cache.stats(), CacheStats::default());
        assert_eq!(store.get("settings:enabled").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let (cache, store, _) = cache_with(CacheConfig::default());
        store
            .set(&classification_key("headline"), "not json")
            .unwrap();
        assert!(cache.get_classification("headline").is_none());
        assert!(store.is_empty());
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get_all(&self) -> StorageResult<Vec<(String, String)>> {
            Err(StorageError::Unavailable("disk gone".into()))
        }
        fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Unavailable("disk gone".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("disk gone".into()))
        }
        fn remove(&self, _key: &str) -> StorageResult<bool> {
            Err(StorageError::Unavailable("disk gone".into()))
        }
    }

    #[test]
    fn test_storage_faults_degrade_to_miss() {
        let cache = CacheStore::new(Arc::new(FailingStore), CacheConfig::default());
        let record = cache.put_classification("headline", &Verdict::clickbait(0.9, "x"));
        assert!(record.is_clickbait);
        assert!(cache.get_classification("headline").is_none());
        assert_eq!(cache.clear_all(), 0);
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
