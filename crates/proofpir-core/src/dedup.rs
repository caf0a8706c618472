//! Content-addressed deduplication of proof fragments.
//!
//! [`ProofDb`] maps a fragment's exact bytes to a dense id and back. Ids
//! start at 1 and are assigned on first sight; identical bytes always
//! yield the same id. The keys are the full fragment bytes, not a hash,
//! so distinct fragments cannot collide.
//!
//! The engine is shared by many writer threads. The first few fragments of
//! every proof sit near the tree root and repeat across virtually all
//! accounts, so those positions get an uncontended probe of an in-process
//! hot cache before touching persistence. Everything else takes one stripe
//! of a fixed lock pool, selected from the fragment bytes, and re-checks
//! the persistent forward mapping under the lock; the persistence re-read
//! is the authoritative check, the striping only serializes writers of
//! identical content.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::key_lock::KeyLocker;
use crate::store::KvStore;
use crate::{Error, Result};

/// Fragment positions at or below this index within an account's proof are
/// eligible for the hot cache.
pub const HOT_FRAGMENT_THRESHOLD: usize = 4;

/// Store key for an id-indexed lookup: 8-byte little-endian fragment id.
pub fn fragment_id_key(id: u64) -> [u8; 8] {
    id.to_le_bytes()
}

fn fragment_id_from_value(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| Error::Truncated {
            expected: 8,
            actual: value.len(),
        })?;
    Ok(u64::from_le_bytes(bytes))
}

pub struct ProofDb {
    fragment_to_id: Arc<dyn KvStore>,
    id_to_fragment: Arc<dyn KvStore>,
    next_id: AtomicU64,
    hot_cache: Option<RwLock<AHashMap<Vec<u8>, u64>>>,
    locks: KeyLocker,
    total: AtomicU64,
    unique: AtomicU64,
    deduped: AtomicU64,
}

impl ProofDb {
    /// Engine with the hot-fragment cache enabled; the default for the
    /// account-proof pass.
    pub fn new(fragment_to_id: Arc<dyn KvStore>, id_to_fragment: Arc<dyn KvStore>) -> Self {
        Self::build(fragment_to_id, id_to_fragment, true)
    }

    /// Scoped engine without the hot cache, used for storage proofs where
    /// near-root sharing is per-contract rather than global.
    pub fn without_hot_cache(
        fragment_to_id: Arc<dyn KvStore>,
        id_to_fragment: Arc<dyn KvStore>,
    ) -> Self {
        Self::build(fragment_to_id, id_to_fragment, false)
    }

    fn build(
        fragment_to_id: Arc<dyn KvStore>,
        id_to_fragment: Arc<dyn KvStore>,
        hot_cache: bool,
    ) -> Self {
        Self {
            fragment_to_id,
            id_to_fragment,
            next_id: AtomicU64::new(0),
            hot_cache: hot_cache.then(|| RwLock::new(AHashMap::new())),
            locks: KeyLocker::default(),
            total: AtomicU64::new(0),
            unique: AtomicU64::new(0),
            deduped: AtomicU64::new(0),
        }
    }

    /// Fragments pushed through the engine, counting repeats.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Distinct fragments that received an id.
    pub fn unique(&self) -> u64 {
        self.unique.load(Ordering::Relaxed)
    }

    /// Lookups answered without minting a new id.
    pub fn deduped(&self) -> u64 {
        self.deduped.load(Ordering::Relaxed)
    }

    /// The id previously minted for `fragment`, if any.
    pub fn lookup_id(&self, fragment: &[u8]) -> Result<Option<u64>> {
        match self.fragment_to_id.maybe_get(fragment)? {
            Some(value) => Ok(Some(fragment_id_from_value(&value)?)),
            None => Ok(None),
        }
    }

    /// Return the id for `fragment`, minting one if this exact byte
    /// content has never been seen. `position` is the fragment's index
    /// within its account's proof and only gates hot-cache eligibility.
    pub fn get_or_create_id(&self, position: usize, fragment: &[u8]) -> Result<u64> {
        self.total.fetch_add(1, Ordering::Relaxed);

        let hot = self
            .hot_cache
            .as_ref()
            .filter(|_| position <= HOT_FRAGMENT_THRESHOLD);
        if let Some(cache) = hot {
            if let Some(&id) = cache.read().get(fragment) {
                self.deduped.fetch_add(1, Ordering::Relaxed);
                return Ok(id);
            }
        }

        let _guard = self.locks.lock(fragment);

        if let Some(value) = self.fragment_to_id.maybe_get(fragment)? {
            self.deduped.fetch_add(1, Ordering::Relaxed);
            return fragment_id_from_value(&value);
        }

        self.unique.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let id_key = fragment_id_key(id);
        self.fragment_to_id.set(fragment, &id_key)?;
        self.id_to_fragment.set(&id_key, fragment)?;

        if let Some(cache) = hot {
            cache.write().insert(fragment.to_vec(), id);
        }

        Ok(id)
    }

    /// Reconstruct the ordered fragment bytes for an id sequence. A
    /// missing id is a fatal consistency violation.
    pub fn recover(&self, ids: &[u64]) -> Result<Vec<Vec<u8>>> {
        ids.iter()
            .map(|&id| {
                self.id_to_fragment
                    .maybe_get(&fragment_id_key(id))?
                    .ok_or(Error::MissingFragment(id))
            })
            .collect()
    }

    /// Start a per-account accumulator.
    pub fn accumulator(&self) -> ProofAccumulator<'_> {
        ProofAccumulator {
            db: self,
            ids: Vec::new(),
        }
    }
}

/// Collects the ordered id sequence of one account's proof.
pub struct ProofAccumulator<'a> {
    db: &'a ProofDb,
    ids: Vec<u64>,
}

impl ProofAccumulator<'_> {
    pub fn push(&mut self, fragment: &[u8]) -> Result<u64> {
        let id = self.db.get_or_create_id(self.ids.len(), fragment)?;
        self.ids.push(id);
        Ok(id)
    }

    pub fn push_all<I, B>(&mut self, fragments: I) -> Result<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for fragment in fragments {
            self.push(fragment.as_ref())?;
        }
        Ok(())
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<u64> {
        self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn proof_db() -> ProofDb {
        ProofDb::new(Arc::new(MemStore::new()), Arc::new(MemStore::new()))
    }

    #[test]
    fn test_ids_dense_from_one() {
        let db = proof_db();
        assert_eq!(db.get_or_create_id(0, b"a").unwrap(), 1);
        assert_eq!(db.get_or_create_id(0, b"b").unwrap(), 2);
        assert_eq!(db.get_or_create_id(0, b"c").unwrap(), 3);
    }

    #[test]
    fn test_same_bytes_same_id() {
        let db = proof_db();
        let first = db.get_or_create_id(0, b"fragment").unwrap();
        // hot position and cold position must both agree with the first id
        assert_eq!(db.get_or_create_id(0, b"fragment").unwrap(), first);
        assert_eq!(db.get_or_create_id(100, b"fragment").unwrap(), first);
    }

    #[test]
    fn test_counters() {
        let db = proof_db();
        let mut acc = db.accumulator();
        acc.push_all([b"A".as_slice(), b"B", b"A", b"C", b"A"]).unwrap();

        assert_eq!(acc.into_ids(), vec![1, 2, 1, 3, 1]);
        assert_eq!(db.total(), 5);
        assert_eq!(db.unique(), 3);
        assert_eq!(db.deduped(), 2);
    }

    #[test]
    fn test_idempotent_against_populated_store() {
        let fragment_to_id: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let id_to_fragment: Arc<dyn KvStore> = Arc::new(MemStore::new());

        let db = ProofDb::new(fragment_to_id.clone(), id_to_fragment.clone());
        let id = db.get_or_create_id(50, b"persisted").unwrap();
        drop(db);

        // a fresh engine over the same stores must answer from persistence,
        // not mint a second id
        let db = ProofDb::new(fragment_to_id, id_to_fragment);
        assert_eq!(db.get_or_create_id(50, b"persisted").unwrap(), id);
        assert_eq!(db.deduped(), 1);
        assert_eq!(db.unique(), 0);
    }

    #[test]
    fn test_recover_roundtrip() {
        let db = proof_db();
        let mut acc = db.accumulator();
        acc.push_all([b"root".as_slice(), b"branch", b"leaf"]).unwrap();
        let ids = acc.into_ids();

        let fragments = db.recover(&ids).unwrap();
        assert_eq!(fragments, vec![b"root".to_vec(), b"branch".to_vec(), b"leaf".to_vec()]);
    }

    #[test]
    fn test_recover_missing_id_is_fatal() {
        let db = proof_db();
        assert!(matches!(db.recover(&[42]), Err(Error::MissingFragment(42))));
    }

    #[test]
    fn test_without_hot_cache_still_dedupes() {
        let db = ProofDb::without_hot_cache(Arc::new(MemStore::new()), Arc::new(MemStore::new()));
        let first = db.get_or_create_id(0, b"top").unwrap();
        assert_eq!(db.get_or_create_id(0, b"top").unwrap(), first);
        assert_eq!(db.deduped(), 1);
    }

    #[test]
    fn test_concurrent_writers_agree() {
        let db = Arc::new(proof_db());
        let fragments: Vec<Vec<u8>> = (0..64u8).map(|i| vec![i; 8]).collect();

        std::thread::scope(|s| {
            for _ in 0..8 {
                let db = Arc::clone(&db);
                let fragments = fragments.clone();
                s.spawn(move || {
                    for (i, fragment) in fragments.iter().enumerate() {
                        db.get_or_create_id(i, fragment).unwrap();
                    }
                });
            }
        });

        // 8 threads x 64 fragments, 64 distinct byte strings
        assert_eq!(db.total(), 8 * 64);
        assert_eq!(db.unique(), 64);
        assert_eq!(db.deduped(), 8 * 64 - 64);

        // every thread resolved each fragment to the same persisted id
        let mut seen = std::collections::HashSet::new();
        for fragment in &fragments {
            let id = db.lookup_id(fragment).unwrap().unwrap();
            assert!(seen.insert(id));
            assert!(id >= 1 && id <= 64);
        }
    }
}
