//! Cache-aside event loading with a remote version check
//!
//! `load_event` reads the local entry, asks the server for the event's
//! current version, and only downloads the full payload when the entry is
//! missing, fetched at another version, or past its TTL. Network failures
//! reach the caller; cache failures never do.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheEntry, EventId, VersionToken};
use crate::snapshot::{reshape, EventSnapshot, RawEventPayload};
use crate::stats::CacheStats;

/// Error type returned by network collaborators
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// How long a cache entry is trusted after it was written
pub fn default_ttl() -> Duration {
    Duration::hours(4)
}

/// Cheap endpoint reporting an event's current version
#[async_trait]
pub trait VersionOracle: Send + Sync {
    /// Current version token of the event
    async fn fetch_event_version(&self, event_id: EventId) -> Result<VersionToken, SourceError>;
}

/// Endpoint returning an event's full photo and people payload
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Full event payload
    async fn fetch_event_payload(&self, event_id: EventId)
        -> Result<RawEventPayload, SourceError>;
}

/// Error surfaced to the screen showing the event
#[derive(Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Version check failed
    Oracle(String),

    /// Full payload fetch failed
    Fetch(String),
}

impl LoadError {
    /// Message suitable for display
    pub fn message(&self) -> &str {
        match self {
            LoadError::Oracle(msg) | LoadError::Fetch(msg) => msg,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Oracle(msg) => write!(f, "failed to check event version: {}", msg),
            LoadError::Fetch(msg) => write!(f, "failed to load event details: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Why a load was or was not served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Cached entry matched the server version and was inside its TTL
    Hit,
    /// No usable cached entry
    Miss,
    /// Server version differs from the cached one
    VersionChanged,
    /// Cached entry outlived its TTL
    Expired,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::VersionChanged => "version changed",
            CacheOutcome::Expired => "expired",
        };
        f.write_str(text)
    }
}

/// A loaded snapshot and how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEvent {
    /// Display-ready snapshot
    pub snapshot: EventSnapshot,
    /// Cache decision taken for this load
    pub outcome: CacheOutcome,
}

/// Loads event snapshots through the cache
pub struct EventLoader<C, O, P, K = SystemClock> {
    cache: C,
    oracle: O,
    source: P,
    clock: K,
    ttl: Duration,
    stats: Arc<CacheStats>,
}

impl<C, O, P> EventLoader<C, O, P, SystemClock> {
    /// Create a loader using the system clock and [`default_ttl`]
    pub fn new(cache: C, oracle: O, source: P) -> Self {
        Self {
            cache,
            oracle,
            source,
            clock: SystemClock,
            ttl: default_ttl(),
            stats: Arc::new(CacheStats::new()),
        }
    }
}

impl<C, O, P, K> EventLoader<C, O, P, K> {
    /// Replace the clock
    pub fn with_clock<K2: Clock>(self, clock: K2) -> EventLoader<C, O, P, K2> {
        EventLoader {
            cache: self.cache,
            oracle: self.oracle,
            source: self.source,
            clock,
            ttl: self.ttl,
            stats: self.stats,
        }
    }

    /// Replace the TTL given to newly written entries
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Record into `stats`; pass the same handle to
    /// [`EventCache::with_stats`](crate::EventCache::with_stats) to also
    /// count read failures
    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    /// TTL given to newly written entries
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cache store
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// The version oracle
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// The primary data source
    pub fn source(&self) -> &P {
        &self.source
    }

    /// The clock
    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Load statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<C, O, P, K> EventLoader<C, O, P, K>
where
    C: CacheStore<EventSnapshot>,
    O: VersionOracle,
    P: EventSource,
    K: Clock,
{
    /// Load an event's display-ready snapshot
    pub async fn load_event(
        &self,
        event_id: EventId,
        event_name: &str,
    ) -> Result<EventSnapshot, LoadError> {
        self.load_event_with_outcome(event_id, event_name)
            .await
            .map(|loaded| loaded.snapshot)
    }

    /// Load an event, also reporting the cache decision
    pub async fn load_event_with_outcome(
        &self,
        event_id: EventId,
        event_name: &str,
    ) -> Result<LoadedEvent, LoadError> {
        let cached = self.cache.get(event_id).await;

        let version = self
            .oracle
            .fetch_event_version(event_id)
            .await
            .map_err(|e| {
                warn!("Version check for event {} failed: {}", event_id, e);
                LoadError::Oracle(e.to_string())
            })?;

        let outcome = match cached {
            None => CacheOutcome::Miss,
            Some(entry) if !entry.matches(&version) => CacheOutcome::VersionChanged,
            Some(entry) if !self.cache.is_valid(&entry, &self.clock) => CacheOutcome::Expired,
            Some(entry) => {
                self.stats.record_hit();
                debug!("Event {} served from cache at version {}", event_id, version);

                // The caller's name wins over the one stored with the entry
                let mut snapshot = entry.data;
                snapshot.name = event_name.to_string();
                return Ok(LoadedEvent {
                    snapshot,
                    outcome: CacheOutcome::Hit,
                });
            }
        };

        match outcome {
            CacheOutcome::VersionChanged => self.stats.record_version_mismatch(),
            CacheOutcome::Expired => self.stats.record_expiration(),
            _ => self.stats.record_miss(),
        }
        debug!(
            "Refreshing event {} ({}), server version {}",
            event_id, outcome, version
        );

        let payload = self
            .source
            .fetch_event_payload(event_id)
            .await
            .map_err(|e| {
                warn!("Fetching event {} failed: {}", event_id, e);
                LoadError::Fetch(e.to_string())
            })?;

        let snapshot = reshape(event_id, event_name, &payload);
        let entry = CacheEntry::new(event_id, snapshot, version, self.clock.now(), self.ttl);

        if self.cache.put(event_id, &entry).await {
            self.stats.record_store();
        } else {
            self.stats.record_store_failure();
        }

        Ok(LoadedEvent {
            snapshot: entry.data,
            outcome,
        })
    }
}
