//! EventCache: best-effort, per-event snapshot cache over durable storage
//!
//! Every failure on this path is logged and absorbed. A read problem looks
//! like a miss, a write problem looks like a write that never happened.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::clock::Clock;
use crate::entry::{cache_key, CacheEntry, EventId};
use crate::stats::CacheStats;
use crate::storage::KvStorage;

/// Keyed store of one [`CacheEntry`] per event
#[async_trait]
pub trait CacheStore<T: Send + Sync>: Send + Sync {
    /// Read the entry for an event. Any failure reads as `None`.
    async fn get(&self, event_id: EventId) -> Option<CacheEntry<T>>;

    /// Replace the entry for an event.
    ///
    /// # Returns
    /// * `bool` - Whether the entry reached storage
    async fn put(&self, event_id: EventId, entry: &CacheEntry<T>) -> bool;

    /// Whether an entry is still inside its TTL. The version check is left
    /// to the caller.
    fn is_valid(&self, entry: &CacheEntry<T>, clock: &dyn Clock) -> bool {
        entry.is_fresh_at(clock.now())
    }
}

/// JSON-serialized cache entries kept in a [`KvStorage`]
pub struct EventCache<S> {
    storage: S,
    stats: Arc<CacheStats>,
}

impl<S: KvStorage> EventCache<S> {
    /// Create a cache writing through `storage`
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Count read failures into `stats`, usually the loader's
    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    /// The storage backend
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Statistics this cache records read failures into
    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }
}

#[async_trait]
impl<S, T> CacheStore<T> for EventCache<S>
where
    S: KvStorage,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, event_id: EventId) -> Option<CacheEntry<T>> {
        let raw = match self.storage.get_item(&cache_key(event_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Error reading cache for event {}: {}", event_id, e);
                self.stats.record_read_failure();
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if entry.event_id == event_id => Some(entry),
            Ok(entry) => {
                warn!(
                    "Cache record for event {} belongs to event {}, ignoring",
                    event_id, entry.event_id
                );
                self.stats.record_read_failure();
                None
            }
            Err(e) => {
                warn!("Discarding unreadable cache record for event {}: {}", event_id, e);
                self.stats.record_read_failure();
                None
            }
        }
    }

    async fn put(&self, event_id: EventId, entry: &CacheEntry<T>) -> bool {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Error serializing cache for event {}: {}", event_id, e);
                return false;
            }
        };

        match self.storage.set_item(&cache_key(event_id), json).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Error saving cache for event {}: {}", event_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::VersionToken;
    use crate::snapshot::{reshape, PersonId, PhotoId, RawDetection, RawEventPayload, RawPerson, RawPhoto};
    use crate::storage::{FileStorage, MemoryStorage};
    use crate::EventSnapshot;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn snapshot() -> EventSnapshot {
        let payload = RawEventPayload {
            event_id: Some(EventId(42)),
            photos: (1..=5)
                .map(|id| RawPhoto {
                    id: PhotoId(id),
                    url: format!("https://img.test/{}.jpg?sig=a%2Fb&x=ü", id),
                })
                .collect(),
            people: vec![RawPerson {
                id: PersonId(9),
                name: "Zoë \"Z\" O'Neil".to_string(),
            }],
            detections: (1..=4)
                .map(|id| RawDetection {
                    photo_id: PhotoId(id),
                    person_id: Some(PersonId(9)),
                })
                .collect(),
        };
        reshape(EventId(42), "Trip", &payload)
    }

    fn entry(event_id: u64) -> CacheEntry<EventSnapshot> {
        let cached_at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
            + Duration::nanoseconds(123_456_789);
        CacheEntry::new(
            EventId(event_id),
            snapshot(),
            VersionToken::new("2024-01-01T10:00:00Z"),
            cached_at,
            Duration::hours(4),
        )
    }

    #[tokio::test]
    async fn test_round_trip_memory() {
        let cache = EventCache::new(MemoryStorage::new());
        let original = entry(42);

        assert!(cache.put(EventId(42), &original).await);
        let loaded: CacheEntry<EventSnapshot> = cache.get(EventId(42)).await.unwrap();

        assert_eq!(loaded, original);
        assert!(cache.storage().raw("event_42_cache").is_some());
    }

    #[tokio::test]
    async fn test_round_trip_file_across_restart() {
        let dir = TempDir::new().unwrap();
        let original = entry(42);

        {
            let cache = EventCache::new(FileStorage::open(dir.path()).unwrap());
            assert!(cache.put(EventId(42), &original).await);
        }

        let cache = EventCache::new(FileStorage::open(dir.path()).unwrap());
        let loaded: Option<CacheEntry<EventSnapshot>> = cache.get(EventId(42)).await;
        assert_eq!(loaded, Some(original));
    }

    #[tokio::test]
    async fn test_put_replaces_previous_entry() {
        let cache = EventCache::new(MemoryStorage::new());
        let first = entry(42);
        let mut second = entry(42);
        second.updated_at = VersionToken::new("2024-01-02T00:00:00Z");

        assert!(cache.put(EventId(42), &first).await);
        assert!(cache.put(EventId(42), &second).await);

        let loaded: CacheEntry<EventSnapshot> = cache.get(EventId(42)).await.unwrap();
        assert_eq!(loaded.updated_at, second.updated_at);
        assert_eq!(cache.storage().len(), 1);
    }

    #[tokio::test]
    async fn test_events_do_not_share_slots() {
        let cache = EventCache::new(MemoryStorage::new());

        assert!(cache.put(EventId(1), &entry(1)).await);
        assert!(cache.put(EventId(11), &entry(11)).await);

        let one: CacheEntry<EventSnapshot> = cache.get(EventId(1)).await.unwrap();
        let eleven: CacheEntry<EventSnapshot> = cache.get(EventId(11)).await.unwrap();
        assert_eq!(one.event_id, EventId(1));
        assert_eq!(eleven.event_id, EventId(11));
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let cache = EventCache::new(MemoryStorage::new());
        let loaded: Option<CacheEntry<EventSnapshot>> = cache.get(EventId(3)).await;
        assert!(loaded.is_none());
        assert_eq!(cache.stats().read_failures(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_absent() {
        let storage = MemoryStorage::new();
        storage.insert_raw("event_42_cache", "{\"eventId\": 42, \"data\": ");
        let cache = EventCache::new(storage);

        let loaded: Option<CacheEntry<EventSnapshot>> = cache.get(EventId(42)).await;
        assert!(loaded.is_none());
        assert_eq!(cache.stats().read_failures(), 1);
    }

    #[tokio::test]
    async fn test_incompatible_record_reads_as_absent() {
        let storage = MemoryStorage::new();
        storage.insert_raw(
            "event_42_cache",
            r#"{"eventId":42,"data":{"legacy":true},"updatedAt":"v","cachedAt":"2024-01-01T10:00:00Z","expiresAt":"2024-01-01T14:00:00Z"}"#,
        );
        let cache = EventCache::new(storage);

        let loaded: Option<CacheEntry<EventSnapshot>> = cache.get(EventId(42)).await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_record_for_other_event_is_ignored() {
        let storage = MemoryStorage::new();
        let misplaced = serde_json::to_string(&entry(7)).unwrap();
        storage.insert_raw("event_42_cache", &misplaced);
        let cache = EventCache::new(storage);

        let loaded: Option<CacheEntry<EventSnapshot>> = cache.get(EventId(42)).await;
        assert!(loaded.is_none());
        assert_eq!(cache.stats().read_failures(), 1);
    }

    #[tokio::test]
    async fn test_storage_failures_are_absorbed() {
        let stats = Arc::new(CacheStats::new());
        let cache = EventCache::new(MemoryStorage::new()).with_stats(Arc::clone(&stats));
        assert!(cache.put(EventId(42), &entry(42)).await);

        cache.storage().set_fail_reads(true);
        let loaded: Option<CacheEntry<EventSnapshot>> = cache.get(EventId(42)).await;
        assert!(loaded.is_none());
        assert_eq!(stats.read_failures(), 1);

        cache.storage().set_fail_writes(true);
        assert!(!cache.put(EventId(42), &entry(42)).await);
    }

    #[test]
    fn test_is_valid_uses_clock() {
        let cache = EventCache::new(MemoryStorage::new());
        let entry = entry(42);
        let clock = ManualClock::new(entry.cached_at);

        assert!(CacheStore::<EventSnapshot>::is_valid(&cache, &entry, &clock));

        clock.set(entry.expires_at - Duration::nanoseconds(1));
        assert!(cache.is_valid(&entry, &clock));

        clock.set(entry.expires_at);
        assert!(!cache.is_valid(&entry, &clock));
    }
}
