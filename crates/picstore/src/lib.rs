//! # picstore
//!
//! Embedded key/value record log backing PicSort's local cache.
//!
//! ## Design
//! - Append-only log with a single writer per data directory; lookups are
//!   served from the in-memory index and read one value from disk
//! - Newest record per key wins; an in-memory index is rebuilt on open
//! - Torn tails from interrupted writes are truncated on open, and a file
//!   too short to hold its header is recreated empty
//! - Basic operations: GET, PUT, KEYS, COMPACT

#![warn(missing_docs)]

mod error;
mod parser;
mod storage;

pub use error::{Error, Result};
pub use storage::RecordStore;
