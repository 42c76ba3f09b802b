//! # piccache
//!
//! Local cache for PicSort event data.
//!
//! ## Architecture
//! - **EventCache**: one JSON record per event in a durable key/value store
//! - **EventLoader**: cache-aside loading, validated against the server's
//!   version token before a cached snapshot is trusted
//! - **reshape**: turns the raw photo/people payload into the snapshot
//!   screens render
//!
//! An entry is used only when its version token equals the one the server
//! reports *and* it is younger than its TTL (4 hours by default). Storage
//! problems degrade to a fresh fetch and are never surfaced.

#![warn(missing_docs)]

mod cache;
mod clock;
mod entry;
mod loader;
mod snapshot;
mod stats;
mod storage;

pub use cache::{CacheStore, EventCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{cache_key, CacheEntry, EventId, VersionToken};
pub use loader::{
    default_ttl, CacheOutcome, EventLoader, EventSource, LoadError, LoadedEvent, SourceError,
    VersionOracle,
};
pub use snapshot::{
    reshape, EventImage, EventSnapshot, PersonId, PersonSummary, PhotoId, RawDetection,
    RawEventPayload, RawPerson, RawPhoto, ESTABLISHED_PERSON_MIN_PHOTOS,
};
pub use stats::CacheStats;
pub use storage::{FileStorage, KvStorage, MemoryStorage, StorageError};
