//! Greedy balanced assignment of deduplicated fragments to retrieval
//! partitions.
//!
//! Every fragment id gets a permanent `(bucket, row)` location the first
//! time it is seen, with no global lookahead: the least-loaded live
//! candidate wins, ties broken by a rotation counter that advances once
//! per placement across the whole run. Within one account no bucket is
//! used twice, because the retrieval protocol issues one query per bucket
//! per account and must get at most one hit per bucket; each placement or
//! first sighting of an already-placed id removes that bucket from the
//! account's candidate set.
//!
//! The first `n_tree_top` ids of every account sit near the tree root and
//! are shared by virtually all accounts; they bypass the balancing scheme
//! into a separate table and are encoded with the reserved bucket id
//! [`TREE_TOP_BUCKET_ID`].
//!
//! Assignment mutates shared scratch state (`remaining`, the rotation
//! counter) and is deliberately single-threaded: balance quality depends
//! on one global load ordering.

use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;

use crate::dedup::fragment_id_key;
use crate::proof_index::ProofIndex;
use crate::record_table::RecordTable;
use crate::store::KvStore;
use crate::{Error, Result};

/// Reserved bucket id marking a tree-top row.
pub const TREE_TOP_BUCKET_ID: u8 = u8::MAX;

/// Wire size of one location: 1-byte bucket id + 4-byte LE row id.
pub const LOCATION_SIZE: usize = 5;

/// Row id marking an unused trailing slot in a padded location vector.
pub const BLANK_ROW_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLocation {
    pub bucket_id: u8,
    pub row_id: u32,
}

impl BucketLocation {
    pub fn is_tree_top(&self) -> bool {
        self.bucket_id == TREE_TOP_BUCKET_ID
    }

    pub fn to_bytes(&self) -> [u8; LOCATION_SIZE] {
        let mut bytes = [0u8; LOCATION_SIZE];
        bytes[0] = self.bucket_id;
        bytes[1..].copy_from_slice(&self.row_id.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < LOCATION_SIZE {
            return Err(Error::Truncated {
                expected: LOCATION_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            bucket_id: bytes[0],
            row_id: u32::from_le_bytes(bytes[1..LOCATION_SIZE].try_into().expect("4 bytes")),
        })
    }
}

/// Pack an account's location vector into `max_len * 5` bytes, one 5-byte
/// slot per location; unused trailing slots stay zero.
pub fn encode_locations(locations: &[BucketLocation], max_len: usize) -> Result<Vec<u8>> {
    if locations.len() > max_len {
        return Err(Error::Config(format!(
            "account has {} locations, max proof length is {}",
            locations.len(),
            max_len
        )));
    }
    let mut bytes = vec![0u8; max_len * LOCATION_SIZE];
    for (i, location) in locations.iter().enumerate() {
        bytes[i * LOCATION_SIZE..(i + 1) * LOCATION_SIZE].copy_from_slice(&location.to_bytes());
    }
    Ok(bytes)
}

/// Decode all `max_len` slots of a packed location vector, including any
/// padding slots.
pub fn decode_locations(bytes: &[u8], max_len: usize) -> Result<Vec<BucketLocation>> {
    if bytes.len() < max_len * LOCATION_SIZE {
        return Err(Error::Truncated {
            expected: max_len * LOCATION_SIZE,
            actual: bytes.len(),
        });
    }
    (0..max_len)
        .map(|i| BucketLocation::from_bytes(&bytes[i * LOCATION_SIZE..]))
        .collect()
}

/// Per-partition health signal. No threshold is enforced here; callers
/// decide what spread is acceptable.
#[derive(Debug, Clone)]
pub struct BucketStats {
    pub tree_top_rows: u32,
    pub rows: Vec<u32>,
    pub min: u32,
    pub max: u32,
    pub spread: u32,
}

pub struct BucketMapper {
    n_tree_top: usize,
    n_buckets: usize,
    proof_index: ProofIndex,
    id_to_fragment: Arc<dyn KvStore>,
    location_index: Arc<dyn KvStore>,
    tree_top: RecordTable,
    // Process-memory only: a restart mid-run loses tree-top row
    // assignments while persisted bucket locations remain valid.
    tree_top_rows: AHashMap<u64, u32>,
    buckets: Vec<RecordTable>,
    initial_remaining: Vec<u8>,
    remaining: Vec<u8>,
    rotation: usize,
}

impl BucketMapper {
    /// Open the tree-top table plus `n_buckets` partition tables under
    /// `out_dir`, each sized for payloads up to `fragment_capacity`.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        out_dir: &Path,
        n_tree_top: usize,
        n_buckets: usize,
        fragment_capacity: usize,
        proof_index: ProofIndex,
        id_to_fragment: Arc<dyn KvStore>,
        location_index: Arc<dyn KvStore>,
    ) -> Result<Self> {
        if n_buckets == 0 || n_buckets >= TREE_TOP_BUCKET_ID as usize {
            return Err(Error::Config(format!(
                "n_buckets must be in 1..{}, got {}",
                TREE_TOP_BUCKET_ID, n_buckets
            )));
        }

        let tree_top = RecordTable::open(out_dir, "tree-top", fragment_capacity, 0)?;
        let buckets = (0..n_buckets)
            .map(|i| RecordTable::open(out_dir, &format!("account-proofs-{i}"), fragment_capacity, 0))
            .collect::<Result<Vec<_>>>()?;

        let initial_remaining: Vec<u8> = (0..n_buckets as u8).collect();
        let remaining = initial_remaining.clone();

        tracing::info!(n_buckets, n_tree_top, fragment_capacity, "Opened bucket mapper");

        Ok(Self {
            n_tree_top,
            n_buckets,
            proof_index,
            id_to_fragment,
            location_index,
            tree_top,
            tree_top_rows: AHashMap::new(),
            buckets,
            initial_remaining,
            remaining,
            rotation: 0,
        })
    }

    pub fn n_buckets(&self) -> usize {
        self.n_buckets
    }

    pub fn n_tree_top(&self) -> usize {
        self.n_tree_top
    }

    fn fragment(&self, id: u64) -> Result<Vec<u8>> {
        self.id_to_fragment
            .maybe_get(&fragment_id_key(id))?
            .ok_or(Error::MissingFragment(id))
    }

    fn lookup_location(&self, id: u64) -> Result<Option<BucketLocation>> {
        match self.location_index.maybe_get(&fragment_id_key(id))? {
            Some(bytes) => Ok(Some(BucketLocation::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_location(&self, id: u64, location: BucketLocation) -> Result<()> {
        self.location_index
            .set(&fragment_id_key(id), &location.to_bytes())
    }

    /// Assign locations for the account keyed by `address_hash`, reading
    /// its id sequence from the proof index.
    pub fn assign_account(&mut self, address_hash: &[u8]) -> Result<Vec<BucketLocation>> {
        let proof_ids = self.proof_index.get(address_hash)?;
        self.assign(&proof_ids)
    }

    /// Assign a `(bucket, row)` location to every id of one account's
    /// ordered proof sequence. Ids seen in an earlier account keep their
    /// persisted location; fresh ids are placed greedily in the
    /// least-loaded live candidate bucket.
    pub fn assign(&mut self, proof_ids: &[u64]) -> Result<Vec<BucketLocation>> {
        self.remaining.copy_from_slice(&self.initial_remaining);
        let mut live = self.n_buckets;

        let mut locations = Vec::with_capacity(proof_ids.len());

        for &id in proof_ids.iter().take(self.n_tree_top) {
            let row = match self.tree_top_rows.get(&id) {
                Some(&row) => row,
                None => {
                    let fragment = self.fragment(id)?;
                    let row = self.tree_top.append(&fragment)?;
                    self.tree_top_rows.insert(id, row);
                    row
                }
            };
            locations.push(BucketLocation {
                bucket_id: TREE_TOP_BUCKET_ID,
                row_id: row,
            });
        }

        for &id in proof_ids.iter().skip(self.n_tree_top) {
            let location = match self.lookup_location(id)? {
                Some(location) => {
                    // Record this account's use of the bucket without
                    // re-deciding placement. A repeat of an id already
                    // consumed by this account is a no-op.
                    if let Some(slot) = self.remaining[..live]
                        .iter()
                        .position(|&b| b == location.bucket_id)
                    {
                        self.remaining[slot] = self.remaining[live - 1];
                        live -= 1;
                    }
                    location
                }
                None => {
                    if live == 0 {
                        return Err(Error::BucketsExhausted {
                            proof_len: proof_ids.len(),
                            n_buckets: self.n_buckets,
                        });
                    }

                    let start = self.rotation % live;
                    let mut winning_slot = start;
                    let mut winning_bucket = self.remaining[winning_slot];
                    let mut min_rows = self.buckets[winning_bucket as usize].next_row();
                    for j in 1..live {
                        let slot = (start + j) % live;
                        let bucket = self.remaining[slot];
                        let rows = self.buckets[bucket as usize].next_row();
                        if rows < min_rows {
                            winning_slot = slot;
                            winning_bucket = bucket;
                            min_rows = rows;
                        }
                    }
                    self.rotation = self.rotation.wrapping_add(1);

                    let fragment = self.fragment(id)?;
                    let row = self.buckets[winning_bucket as usize].append(&fragment)?;
                    let location = BucketLocation {
                        bucket_id: winning_bucket,
                        row_id: row,
                    };
                    self.store_location(id, location)?;

                    self.remaining[winning_slot] = self.remaining[live - 1];
                    live -= 1;
                    location
                }
            };
            locations.push(location);
        }

        Ok(locations)
    }

    /// Reverse path: fetch the raw fragment bytes behind a location
    /// sequence, routing tree-top rows through the tree-top table. Used
    /// by offline verification.
    pub fn fetch_proof(&mut self, locations: &[BucketLocation]) -> Result<Vec<Vec<u8>>> {
        locations
            .iter()
            .map(|location| {
                if location.is_tree_top() {
                    self.tree_top.get(location.row_id)
                } else {
                    let table = self
                        .buckets
                        .get_mut(location.bucket_id as usize)
                        .ok_or(Error::BucketOutOfRange(location.bucket_id))?;
                    table.get(location.row_id)
                }
            })
            .collect()
    }

    pub fn stats(&self) -> BucketStats {
        let rows: Vec<u32> = self.buckets.iter().map(|b| b.next_row()).collect();
        let min = rows.iter().copied().min().unwrap_or(0);
        let max = rows.iter().copied().max().unwrap_or(0);
        BucketStats {
            tree_top_rows: self.tree_top.next_row(),
            rows,
            min,
            max,
            spread: max - min,
        }
    }

    /// Flush all partition tables and persist their metadata sidecars.
    pub fn close(self) -> Result<()> {
        self.tree_top.close()?;
        for bucket in self.buckets {
            bucket.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::ProofDb;
    use crate::store::MemStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        db: ProofDb,
        mapper: BucketMapper,
    }

    fn fixture(n_tree_top: usize, n_buckets: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fragment_to_id: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let id_to_fragment: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let db = ProofDb::new(fragment_to_id, id_to_fragment.clone());

        let mapper = BucketMapper::open(
            dir.path(),
            n_tree_top,
            n_buckets,
            64,
            ProofIndex::new(Arc::new(MemStore::new())),
            id_to_fragment,
            Arc::new(MemStore::new()),
        )
        .unwrap();

        Fixture {
            _dir: dir,
            db,
            mapper,
        }
    }

    fn dedup(db: &ProofDb, fragments: &[&[u8]]) -> Vec<u64> {
        let mut acc = db.accumulator();
        acc.push_all(fragments).unwrap();
        acc.into_ids()
    }

    #[test]
    fn test_location_codec_roundtrip() {
        let location = BucketLocation {
            bucket_id: 7,
            row_id: 0x01020304,
        };
        let bytes = location.to_bytes();
        assert_eq!(bytes, [7, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(BucketLocation::from_bytes(&bytes).unwrap(), location);
    }

    #[test]
    fn test_location_from_short_buffer() {
        assert!(matches!(
            BucketLocation::from_bytes(&[1, 2, 3]),
            Err(Error::Truncated {
                expected: LOCATION_SIZE,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_encode_decode_locations() {
        let locations = vec![
            BucketLocation {
                bucket_id: TREE_TOP_BUCKET_ID,
                row_id: 3,
            },
            BucketLocation {
                bucket_id: 9,
                row_id: 1000,
            },
        ];
        let bytes = encode_locations(&locations, 4).unwrap();
        assert_eq!(bytes.len(), 4 * LOCATION_SIZE);

        let decoded = decode_locations(&bytes, 4).unwrap();
        assert_eq!(&decoded[..2], &locations[..]);
        // unused trailing slots decode as zeroed locations
        assert_eq!(
            decoded[2],
            BucketLocation {
                bucket_id: 0,
                row_id: 0
            }
        );

        assert!(encode_locations(&decoded, 3).is_err());
    }

    #[test]
    fn test_repeated_fragments_single_account() {
        // fragments A B A C A over 3 buckets, no tree-top
        let mut fx = fixture(0, 3);
        let ids = dedup(&fx.db, &[b"A", b"B", b"A", b"C", b"A"]);
        assert_eq!(ids, vec![1, 2, 1, 3, 1]);

        let locations = fx.mapper.assign(&ids).unwrap();
        assert_eq!(locations.len(), 5);

        // repeated placements of id 1 resolve to the same location
        assert_eq!(locations[0], locations[2]);
        assert_eq!(locations[0], locations[4]);

        // the three distinct ids land in three distinct buckets
        let mut buckets: Vec<u8> = [locations[0], locations[1], locations[3]]
            .iter()
            .map(|l| l.bucket_id)
            .collect();
        buckets.sort_unstable();
        buckets.dedup();
        assert_eq!(buckets.len(), 3);
    }

    #[test]
    fn test_distinct_buckets_per_account() {
        let mut fx = fixture(0, 8);
        let fragments: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4]).collect();
        let refs: Vec<&[u8]> = fragments.iter().map(|f| f.as_slice()).collect();
        let ids = dedup(&fx.db, &refs);

        let locations = fx.mapper.assign(&ids).unwrap();
        let mut buckets: Vec<u8> = locations.iter().map(|l| l.bucket_id).collect();
        buckets.sort_unstable();
        buckets.dedup();
        assert_eq!(buckets.len(), 8, "no bucket may repeat within an account");
    }

    #[test]
    fn test_assignment_stable_across_accounts() {
        let mut fx = fixture(0, 4);
        let shared = dedup(&fx.db, &[b"shared-branch"]);
        let first = fx.mapper.assign(&shared).unwrap();

        // a different account carrying the same id plus its own fragments
        let mut ids = shared.clone();
        ids.extend(dedup(&fx.db, &[b"other-leaf"]));
        let second = fx.mapper.assign(&ids).unwrap();

        assert_eq!(second[0], first[0]);
        assert_ne!(second[1].bucket_id, second[0].bucket_id);
    }

    #[test]
    fn test_tree_top_rows_shared_and_sentinel() {
        let mut fx = fixture(2, 4);
        let a = dedup(&fx.db, &[b"root", b"top", b"leaf-a"]);
        let b = dedup(&fx.db, &[b"root", b"top", b"leaf-b"]);

        let la = fx.mapper.assign(&a).unwrap();
        let lb = fx.mapper.assign(&b).unwrap();

        assert!(la[0].is_tree_top() && la[1].is_tree_top());
        // both accounts resolve the shared tree-top ids to the same rows
        assert_eq!(la[0], lb[0]);
        assert_eq!(la[1], lb[1]);
        assert_eq!(fx.mapper.stats().tree_top_rows, 2);

        assert!(!la[2].is_tree_top());
        assert!(!lb[2].is_tree_top());
    }

    #[test]
    fn test_buckets_exhausted_rejected() {
        let mut fx = fixture(0, 2);
        let ids = dedup(&fx.db, &[b"x", b"y", b"z"]);
        assert!(matches!(
            fx.mapper.assign(&ids),
            Err(Error::BucketsExhausted {
                proof_len: 3,
                n_buckets: 2
            })
        ));
    }

    #[test]
    fn test_fetch_proof_roundtrip() {
        let mut fx = fixture(1, 4);
        let fragments: &[&[u8]] = &[b"root", b"branch", b"leaf"];
        let ids = dedup(&fx.db, fragments);
        let locations = fx.mapper.assign(&ids).unwrap();

        let fetched = fx.mapper.fetch_proof(&locations).unwrap();
        assert_eq!(fetched, vec![b"root".to_vec(), b"branch".to_vec(), b"leaf".to_vec()]);
    }

    #[test]
    fn test_fetch_proof_unknown_bucket_is_fatal() {
        let mut fx = fixture(0, 4);
        let result = fx.mapper.fetch_proof(&[BucketLocation {
            bucket_id: 9,
            row_id: 0,
        }]);
        assert!(matches!(result, Err(Error::BucketOutOfRange(9))));
    }

    #[test]
    fn test_spread_stays_bounded() {
        let mut fx = fixture(0, 64);
        for i in 0..100_000u64 {
            let id = fx.db.get_or_create_id(0, &i.to_le_bytes()).unwrap();
            fx.mapper.assign(&[id]).unwrap();
        }

        let stats = fx.mapper.stats();
        assert_eq!(stats.rows.iter().map(|&r| r as u64).sum::<u64>(), 100_000);
        assert!(
            stats.spread < 5,
            "spread {} must stay bounded by a small constant",
            stats.spread
        );
    }

    #[test]
    fn test_rotation_spreads_ties() {
        // with every bucket equally loaded, consecutive single-fragment
        // accounts must not all pick the same bucket
        let mut fx = fixture(0, 8);
        let mut first_buckets = Vec::new();
        for i in 0..8u64 {
            let id = fx
                .db
                .get_or_create_id(0, format!("tie-{i}").as_bytes())
                .unwrap();
            let locations = fx.mapper.assign(&[id]).unwrap();
            first_buckets.push(locations[0].bucket_id);
        }
        first_buckets.sort_unstable();
        first_buckets.dedup();
        assert_eq!(first_buckets.len(), 8);
    }

    #[test]
    fn test_open_rejects_bad_bucket_count() {
        let dir = tempfile::tempdir().unwrap();
        let id_to_fragment: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let result = BucketMapper::open(
            dir.path(),
            0,
            0,
            64,
            ProofIndex::new(Arc::new(MemStore::new())),
            id_to_fragment,
            Arc::new(MemStore::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_assign_account_reads_index() {
        let mut fx = fixture(0, 4);
        let ids = dedup(&fx.db, &[b"p", b"q"]);

        let address = [0x42u8; 32];
        fx.mapper.proof_index.save(&address, &ids).unwrap();

        let locations = fx.mapper.assign_account(&address).unwrap();
        assert_eq!(locations.len(), 2);
        assert!(matches!(
            fx.mapper.assign_account(&[0u8; 32]),
            Err(Error::MissingProofIds(_))
        ));
    }
}
