//! Storage engine implementation
//!
//! File layout:
//! - `records.pic`: header followed by an append-only sequence of records
//!
//! The in-memory index maps each key to the newest copy of its value. A
//! record becomes visible only after it has been fully appended, so readers
//! see either the previous value or the new one.
//!
//! A data directory has exactly one writer. Appends go to the end of the
//! region this handle has replayed, so a second process writing the same
//! file would overwrite records and leave a torn tail behind.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Error, Result};
use crate::parser::{
    create_header, encode_record, parse_header, parse_record, HEADER_LEN, RECORD_PREFIX_LEN,
};

/// Maximum key size (1 KiB)
const MAX_KEY_SIZE: usize = 1024;

/// Maximum value size (16 MiB)
const MAX_VALUE_SIZE: usize = 16 * 1024 * 1024;

const DATA_FILE: &str = "records.pic";
const COMPACT_FILE: &str = "records.pic.compact";

type Index = HashMap<String, Slot, RandomState>;

/// Location of a value inside the data file
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u32,
}

fn record_len(key_len: usize, value_len: u32) -> u64 {
    (RECORD_PREFIX_LEN + key_len) as u64 + value_len as u64
}

struct Inner {
    file: File,
    index: Index,
    /// Length of the valid part of the data file
    size: u64,
    /// Bytes taken by records the index still points at
    live_bytes: u64,
}

impl Inner {
    /// Append a record at the end of the valid region. A failed write is
    /// rolled back so a later append never lands behind a torn record.
    fn append(&mut self, record: &[u8]) -> Result<u64> {
        let start = self.size;
        let written = self
            .file
            .seek(SeekFrom::Start(start))
            .and_then(|_| self.file.write_all(record));

        if let Err(e) = written {
            let _ = self.file.set_len(start);
            return Err(e.into());
        }

        self.size = start + record.len() as u64;
        Ok(start)
    }

    fn read_slot(&mut self, slot: Slot) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(slot.offset))?;
        let mut value = vec![0u8; slot.len as usize];
        self.file.read_exact(&mut value)?;
        Ok(value)
    }
}

/// RecordStore is the durable, string-keyed storage handle
pub struct RecordStore {
    /// Path to the store directory
    path: PathBuf,

    inner: RwLock<Inner>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl RecordStore {
    /// Open or create a record store at the given directory
    ///
    /// # Arguments
    /// * `path` - Directory path for the data file
    ///
    /// # Returns
    /// * `Result<RecordStore>` - Store handle
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let data_path = path.join(DATA_FILE);

        let inner = if data_path.exists() {
            Self::open_existing(&data_path)?
        } else {
            Self::create_new(&data_path)?
        };

        Ok(RecordStore {
            path: path.to_path_buf(),
            inner: RwLock::new(inner),
            closed: RwLock::new(false),
        })
    }

    fn open_existing(data_path: &Path) -> Result<Inner> {
        let mut file = OpenOptions::new().read(true).write(true).open(data_path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let file_len = data.len() as u64;

        // Crash between creating the file and writing its header
        if data.len() < HEADER_LEN {
            warn!(
                "Data file {:?} has a torn header ({} bytes), starting empty",
                data_path, file_len
            );
            drop(file);
            return Self::create_new(data_path);
        }

        parse_header(&data[..HEADER_LEN])?;
        let (index, valid_len, live_bytes) = Self::replay(&data);
        drop(data);

        if valid_len < file_len {
            warn!(
                "Truncating torn tail of {:?}: {} bytes after offset {}",
                data_path,
                file_len - valid_len,
                valid_len
            );
            file.set_len(valid_len)?;
        }

        Ok(Inner {
            file,
            index,
            size: valid_len,
            live_bytes,
        })
    }

    /// Rebuild the index from raw file bytes. Replay stops at the first
    /// record that is truncated or has a non UTF-8 key; everything from
    /// there on is treated as a torn tail.
    fn replay(data: &[u8]) -> (Index, u64, u64) {
        let mut index = Index::default();
        let mut live_bytes = 0u64;
        let mut input = &data[HEADER_LEN..];

        while !input.is_empty() {
            let (rest, record) = match parse_record(input) {
                Ok(parsed) => parsed,
                Err(_) => break,
            };
            let key = match std::str::from_utf8(record.key) {
                Ok(key) => key,
                Err(_) => break,
            };

            let record_start = (data.len() - input.len()) as u64;
            let slot = Slot {
                offset: record_start + (RECORD_PREFIX_LEN + key.len()) as u64,
                len: record.value.len() as u32,
            };

            if let Some(old) = index.insert(key.to_string(), slot) {
                live_bytes -= record_len(key.len(), old.len);
            }
            live_bytes += record_len(key.len(), slot.len);

            input = rest;
        }

        let valid_len = (data.len() - input.len()) as u64;
        (index, valid_len, live_bytes)
    }

    fn create_new(data_path: &Path) -> Result<Inner> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path)?;

        let header = create_header();
        file.write_all(&header)?;

        Ok(Inner {
            file,
            index: Index::default(),
            size: header.len() as u64,
            live_bytes: 0,
        })
    }

    /// Store a value under a key, replacing any previous value
    ///
    /// # Arguments
    /// * `key` - UTF-8 key, at most 1 KiB
    /// * `value` - Raw value bytes, at most 16 MiB
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }

        if key.len() > MAX_KEY_SIZE {
            return Err(Error::KeyTooLarge(key.len()));
        }

        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::ValueTooLarge(value.len()));
        }

        let record = encode_record(key.as_bytes(), value);

        let mut inner = self.inner.write();
        let start = inner.append(&record)?;

        let slot = Slot {
            offset: start + (RECORD_PREFIX_LEN + key.len()) as u64,
            len: value.len() as u32,
        };
        if let Some(old) = inner.index.insert(key.to_string(), slot) {
            inner.live_bytes -= record_len(key.len(), old.len);
        }
        inner.live_bytes += record.len() as u64;

        Ok(())
    }

    /// Get the newest value stored under a key
    ///
    /// Reads share the file cursor with appends, so they take the write lock.
    ///
    /// # Returns
    /// * `Result<Option<Vec<u8>>>` - `None` if the key was never written
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }

        let mut inner = self.inner.write();
        let slot = match inner.index.get(key) {
            Some(slot) => *slot,
            None => return Ok(None),
        };

        inner.read_slot(slot).map(Some)
    }

    /// Check whether a key has a stored value
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().index.contains_key(key)
    }

    /// All keys with a stored value, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().index.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Get the number of keys in the store
    pub fn len(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().index.is_empty()
    }

    /// Bytes held by superseded records, reclaimable with [`compact`](Self::compact)
    pub fn dead_bytes(&self) -> u64 {
        let inner = self.inner.read();
        inner.size - HEADER_LEN as u64 - inner.live_bytes
    }

    /// Rewrite the data file so it only holds the newest value of each key
    pub fn compact(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }

        let mut inner = self.inner.write();
        let compact_path = self.path.join(COMPACT_FILE);

        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&compact_path)?;
        out.write_all(&create_header())?;

        let mut keys: Vec<String> = inner.index.keys().cloned().collect();
        keys.sort();

        let mut index = Index::default();
        let mut offset = HEADER_LEN as u64;

        for key in keys {
            let slot = inner.index[&key];
            let value = inner.read_slot(slot)?;
            let record = encode_record(key.as_bytes(), &value);
            out.write_all(&record)?;

            index.insert(
                key.clone(),
                Slot {
                    offset: offset + (RECORD_PREFIX_LEN + key.len()) as u64,
                    len: slot.len,
                },
            );
            offset += record.len() as u64;
        }

        out.sync_all()?;
        fs::rename(&compact_path, self.path.join(DATA_FILE))?;

        inner.file = out;
        inner.index = index;
        inner.size = offset;
        inner.live_bytes = offset - HEADER_LEN as u64;

        Ok(())
    }

    /// Close the store and fsync all changes
    pub fn close(&self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        self.inner.write().file.sync_all()?;
        *self.closed.write() = true;

        Ok(())
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn data_len(dir: &TempDir) -> u64 {
        fs::metadata(dir.path().join(DATA_FILE)).unwrap().len()
    }

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        assert_eq!(db.len(), 0);
        assert!(db.is_empty());

        db.close().unwrap();

        let db = RecordStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        db.put("event_1_cache", b"{\"id\":1}").unwrap();

        assert_eq!(db.len(), 1);
        assert!(db.contains("event_1_cache"));
        assert_eq!(db.get("event_1_cache").unwrap().unwrap(), b"{\"id\":1}");
    }

    #[test]
    fn test_get_missing_key() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        assert!(db.get("event_9_cache").unwrap().is_none());
        assert!(!db.contains("event_9_cache"));
    }

    #[test]
    fn test_overwrite_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        db.put("k", b"first").unwrap();
        db.put("other", b"x").unwrap();
        db.put("k", b"second").unwrap();

        assert_eq!(db.len(), 2);
        assert_eq!(db.get("k").unwrap().unwrap(), b"second");
        assert_eq!(db.dead_bytes(), record_len(1, 5));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();

        {
            let db = RecordStore::open(dir.path()).unwrap();
            db.put("a", b"test value 1").unwrap();
            db.put("b", b"test value 2").unwrap();
            db.put("a", b"test value 3").unwrap();
            db.close().unwrap();
        }

        {
            let db = RecordStore::open(dir.path()).unwrap();
            assert_eq!(db.len(), 2);
            assert_eq!(db.keys(), vec!["a".to_string(), "b".to_string()]);
            assert_eq!(db.get("a").unwrap().unwrap(), b"test value 3");
            assert_eq!(db.get("b").unwrap().unwrap(), b"test value 2");
            assert_eq!(db.dead_bytes(), record_len(1, 12));
        }
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();

        {
            let db = RecordStore::open(dir.path()).unwrap();
            db.put("a", b"complete").unwrap();
        }
        let good_len = data_len(&dir);

        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join(DATA_FILE))
                .unwrap();
            let record = encode_record(b"b", b"never finished");
            file.write_all(&record[..record.len() - 4]).unwrap();
        }

        {
            let db = RecordStore::open(dir.path()).unwrap();
            assert_eq!(data_len(&dir), good_len);
            assert_eq!(db.get("a").unwrap().unwrap(), b"complete");
            assert!(db.get("b").unwrap().is_none());

            db.put("b", b"rewritten").unwrap();
        }

        let db = RecordStore::open(dir.path()).unwrap();
        assert_eq!(db.get("b").unwrap().unwrap(), b"rewritten");
    }

    #[test]
    fn test_torn_header_starts_empty() {
        for torn in [&b""[..], &b"PICSTO"[..]] {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join(DATA_FILE), torn).unwrap();

            let db = RecordStore::open(dir.path()).unwrap();
            assert!(db.is_empty());
            assert_eq!(data_len(&dir), HEADER_LEN as u64);

            db.put("event_1_cache", b"{}").unwrap();
            db.close().unwrap();

            let db = RecordStore::open(dir.path()).unwrap();
            assert_eq!(db.get("event_1_cache").unwrap().unwrap(), b"{}");
        }
    }

    #[test]
    fn test_invalid_header() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DATA_FILE), b"NOTASTORE\0\0\0\0").unwrap();

        let result = RecordStore::open(dir.path());
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_key_too_large() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        let key = "k".repeat(MAX_KEY_SIZE + 1);
        assert!(matches!(db.put(&key, b"v"), Err(Error::KeyTooLarge(_))));
    }

    #[test]
    fn test_value_too_large() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        let large_value = vec![b'x'; MAX_VALUE_SIZE + 1];
        let result = db.put("k", &large_value);
        assert!(matches!(result, Err(Error::ValueTooLarge(_))));
        assert!(db.is_empty());
    }

    #[test]
    fn test_compact() {
        let dir = TempDir::new().unwrap();

        {
            let db = RecordStore::open(dir.path()).unwrap();
            for i in 0..10 {
                db.put("hot", format!("version {}", i).as_bytes()).unwrap();
            }
            db.put("cold", b"untouched").unwrap();
            assert!(db.dead_bytes() > 0);

            db.compact().unwrap();

            assert_eq!(db.dead_bytes(), 0);
            assert_eq!(db.get("hot").unwrap().unwrap(), b"version 9");
            assert_eq!(db.get("cold").unwrap().unwrap(), b"untouched");

            db.put("hot", b"after compaction").unwrap();
        }

        let db = RecordStore::open(dir.path()).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("hot").unwrap().unwrap(), b"after compaction");
        assert!(!dir.path().join(COMPACT_FILE).exists());
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        db.close().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn test_operations_after_close() {
        let dir = TempDir::new().unwrap();
        let db = RecordStore::open(dir.path()).unwrap();

        db.close().unwrap();

        assert!(matches!(db.put("k", b"v"), Err(Error::Closed)));
        assert!(matches!(db.get("k"), Err(Error::Closed)));
        assert!(matches!(db.compact(), Err(Error::Closed)));
    }
}
