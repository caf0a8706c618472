//! Unconstrained single-table baseline for the balancing ablation.
//!
//! Places every distinct fragment id of an account into one flat table,
//! with none of the balancing or per-account distinctness machinery, so
//! runs can measure what the bucket scheme actually buys. Location vectors
//! are padded to a fixed width with [`BLANK_ROW_ID`] rows.

use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;

use crate::bucket::{BucketLocation, BLANK_ROW_ID};
use crate::dedup::fragment_id_key;
use crate::proof_index::ProofIndex;
use crate::record_table::RecordTable;
use crate::store::KvStore;
use crate::{Error, Result};

fn dedupe_preserving_order(ids: &[u64]) -> Vec<u64> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub struct FlatMapper {
    proof_index: ProofIndex,
    id_to_fragment: Arc<dyn KvStore>,
    rows: AHashMap<u64, u32>,
    all: RecordTable,
    max_proof_len: usize,
}

impl FlatMapper {
    pub fn open(
        out_dir: &Path,
        fragment_capacity: usize,
        max_proof_len: usize,
        proof_index: ProofIndex,
        id_to_fragment: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let all = RecordTable::open(out_dir, "ablation", fragment_capacity, 0)?;
        Ok(Self {
            proof_index,
            id_to_fragment,
            rows: AHashMap::new(),
            all,
            max_proof_len,
        })
    }

    pub fn assign_account(&mut self, address_hash: &[u8]) -> Result<Vec<BucketLocation>> {
        let proof_ids = self.proof_index.get(address_hash)?;
        self.assign(&proof_ids)
    }

    pub fn assign(&mut self, proof_ids: &[u64]) -> Result<Vec<BucketLocation>> {
        let distinct = dedupe_preserving_order(proof_ids);

        let mut locations = Vec::with_capacity(self.max_proof_len);
        for id in distinct {
            let row = match self.rows.get(&id) {
                Some(&row) => row,
                None => {
                    let fragment = self
                        .id_to_fragment
                        .maybe_get(&fragment_id_key(id))?
                        .ok_or(Error::MissingFragment(id))?;
                    let row = self.all.append(&fragment)?;
                    self.rows.insert(id, row);
                    row
                }
            };
            locations.push(BucketLocation {
                bucket_id: 0,
                row_id: row,
            });
        }
        while locations.len() < self.max_proof_len {
            locations.push(BucketLocation {
                bucket_id: 0,
                row_id: BLANK_ROW_ID,
            });
        }
        Ok(locations)
    }

    /// Rows in the flat table.
    pub fn len(&self) -> u32 {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn close(self) -> Result<()> {
        self.all.close()?;
        Ok(())
    }
}
