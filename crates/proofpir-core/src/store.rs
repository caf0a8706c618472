//! Ordered byte-keyed persistence behind the dedup engine and the proof
//! indices.
//!
//! [`KvStore`] is the only interface the dataset builder consumes: point
//! get/set, an existence check, and ordered iteration with optional prefix
//! bounds. [`RocksStore`] is the production implementation; [`MemStore`] is
//! the in-memory double used by tests.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, IteratorMode, Options, ReadOptions, DB};

use crate::{Error, Result};

pub type KvEntry = (Vec<u8>, Vec<u8>);

pub trait KvStore: Send + Sync {
    fn maybe_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.maybe_get(key)?.is_some())
    }

    /// Point lookup that treats an absent key as an internal-consistency
    /// violation: every key read here must have been written earlier in the
    /// same pass.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.maybe_get(key)?
            .ok_or_else(|| Error::MissingKey(hex::encode(key)))
    }

    /// Ordered iteration over all entries, or over the entries whose key
    /// starts with `prefix`.
    fn scan<'a>(
        &'a self,
        prefix: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = Result<KvEntry>> + 'a>>;
}

/// Smallest key strictly greater than every key starting with `prefix`,
/// or `None` when no such key exists (all bytes are 0xff).
pub fn key_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    for i in (0..end.len()).rev() {
        end[i] = end[i].wrapping_add(1);
        if end[i] != 0 {
            end.truncate(i + 1);
            return Some(end);
        }
    }
    None
}

/// RocksDB-backed store, tuned for a bulk-load workload: large write
/// buffers, relaxed level-0 triggers, no fsync. Durability across a crash
/// is not a goal; the whole run restarts from scratch.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.increase_parallelism(4);
        opts.set_max_open_files(100_000);
        opts.set_write_buffer_size(256 << 20);
        opts.set_max_write_buffer_number(4);
        opts.set_level_zero_file_num_compaction_trigger(40);
        opts.set_level_zero_stop_writes_trigger(200);
        opts.set_use_fsync(false);
        opts.set_block_based_table_factory(&block_opts);

        let path = dir.join(name);
        let db = DB::open(&opts, &path)?;
        tracing::info!(path = %path.display(), "Opened store");
        Ok(Self { db })
    }
}

impl KvStore for RocksStore {
    fn maybe_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.db.put(key, value)?)
    }

    fn scan<'a>(
        &'a self,
        prefix: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = Result<KvEntry>> + 'a>> {
        let mut read_opts = ReadOptions::default();
        if let Some(prefix) = prefix {
            read_opts.set_iterate_lower_bound(prefix.to_vec());
            if let Some(upper) = key_upper_bound(prefix) {
                read_opts.set_iterate_upper_bound(upper);
            }
        }
        let iter = self.db.iterator_opt(IteratorMode::Start, read_opts);
        Ok(Box::new(iter.map(|entry| {
            entry
                .map(|(key, value)| (key.into_vec(), value.into_vec()))
                .map_err(Error::from)
        })))
    }
}

/// In-memory ordered store for tests. Scans take a snapshot, so holding an
/// iterator does not block writers.
#[derive(Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvStore for MemStore {
    fn maybe_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn scan<'a>(
        &'a self,
        prefix: Option<&[u8]>,
    ) -> Result<Box<dyn Iterator<Item = Result<KvEntry>> + 'a>> {
        let map = self.map.read();
        let entries: Vec<KvEntry> = match prefix {
            None => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(prefix) => {
                let lower = Bound::Included(prefix);
                let snapshot: Vec<KvEntry> = match key_upper_bound(prefix) {
                    Some(upper) => map
                        .range::<[u8], _>((lower, Bound::Excluded(upper.as_slice())))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    None => map
                        .range::<[u8], _>((lower, Bound::Unbounded))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                };
                snapshot
            }
        };
        Ok(Box::new(entries.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_upper_bound() {
        assert_eq!(key_upper_bound(&[0x01]), Some(vec![0x02]));
        assert_eq!(key_upper_bound(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(key_upper_bound(&[0xff, 0xff]), None);
        assert_eq!(key_upper_bound(&[0x00, 0x0a]), Some(vec![0x00, 0x0b]));
    }

    #[test]
    fn test_mem_store_roundtrip() {
        let store = MemStore::new();
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), b"1");
        assert_eq!(store.maybe_get(b"b").unwrap(), None);
        assert!(store.contains(b"a").unwrap());
        assert!(!store.contains(b"b").unwrap());
    }

    #[test]
    fn test_mem_store_get_missing_is_fatal() {
        let store = MemStore::new();
        assert!(matches!(store.get(b"gone"), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_mem_store_prefix_scan_ordered() {
        let store = MemStore::new();
        store.set(&[0x01, 0x02], b"a").unwrap();
        store.set(&[0x01, 0x01], b"b").unwrap();
        store.set(&[0x02, 0x00], b"c").unwrap();

        let keys: Vec<Vec<u8>> = store
            .scan(Some(&[0x01]))
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec![vec![0x01, 0x01], vec![0x01, 0x02]]);

        let all: Vec<Vec<u8>> = store
            .scan(None)
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_mem_store_prefix_scan_all_ff() {
        let store = MemStore::new();
        store.set(&[0xff, 0x01], b"a").unwrap();
        store.set(&[0xfe, 0x01], b"b").unwrap();

        let keys: Vec<Vec<u8>> = store
            .scan(Some(&[0xff]))
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec![vec![0xff, 0x01]]);
    }

    #[test]
    fn test_rocks_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path(), "test").unwrap();

        store.set(b"k1", b"v1").unwrap();
        store.set(b"k0", b"v0").unwrap();
        assert_eq!(store.get(b"k1").unwrap(), b"v1");
        assert!(!store.contains(b"missing").unwrap());

        let keys: Vec<Vec<u8>> = store
            .scan(None)
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"k0".to_vec(), b"k1".to_vec()]);
    }

    #[test]
    fn test_rocks_store_prefix_scan() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path(), "test").unwrap();

        store.set(&[0x10, 0x01], b"a").unwrap();
        store.set(&[0x10, 0x02], b"b").unwrap();
        store.set(&[0x11, 0x00], b"c").unwrap();

        let entries: Vec<KvEntry> = store
            .scan(Some(&[0x10]))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, vec![0x10, 0x01]);
        assert_eq!(entries[1].0, vec![0x10, 0x02]);
    }
}
