//! Cached event records and key derivation

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Server-side identifier of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventId {
    fn from(id: u64) -> Self {
        EventId(id)
    }
}

/// Opaque version marker reported by the server for an event.
///
/// Only ever compared for equality, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        VersionToken(token.into())
    }

    /// Raw token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cached snapshot of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// Event the snapshot belongs to
    pub event_id: EventId,
    /// Client-ready snapshot
    pub data: T,
    /// Server version the snapshot was fetched at
    pub updated_at: VersionToken,
    /// Local time the entry was written
    pub cached_at: DateTime<Utc>,
    /// Local time after which the entry is not trusted
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Build an entry written at `cached_at` that expires `ttl` later
    pub fn new(
        event_id: EventId,
        data: T,
        updated_at: VersionToken,
        cached_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            event_id,
            data,
            updated_at,
            cached_at,
            expires_at: cached_at + ttl,
        }
    }

    /// True while `now` is before the expiry time
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True if the entry was fetched at exactly this server version
    pub fn matches(&self, version: &VersionToken) -> bool {
        self.updated_at == *version
    }
}

/// Storage key for an event's cache record
pub fn cache_key(event_id: EventId) -> String {
    format!("event_{}_cache", event_id)
}
