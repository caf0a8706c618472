//! Offline dedup verification.
//!
//! Walks a proof index, recovers every account's fragment bytes from the
//! reverse mapping, and checks that each fragment resolves back to the id
//! the ingest pass recorded.

use proofpir_core::proof_index::ids_from_bytes;
use proofpir_core::{Error, ProofDb, ProofIndex, Result};

/// Returns the number of verified index entries.
pub fn verify_dedup(index: &ProofIndex, proofs: &ProofDb) -> Result<u64> {
    let mut verified = 0u64;

    for entry in index.store().scan(None)? {
        let (key, value) = entry?;
        let ids = ids_from_bytes(&value);

        let fragments = proofs.recover(&ids)?;
        for (id, fragment) in ids.iter().zip(&fragments) {
            match proofs.lookup_id(fragment)? {
                Some(found) if found == *id => {}
                found => {
                    return Err(Error::Verification(format!(
                        "fragment of key {} maps to {:?}, index recorded id {}",
                        hex::encode(&key),
                        found,
                        id
                    )));
                }
            }
        }

        verified += 1;
        if verified % 10_000 == 0 {
            tracing::info!(verified, "Verified index entries");
        }
    }

    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use proofpir_core::store::{KvStore, MemStore};

    #[test]
    fn test_verify_clean_index() {
        let index_store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let proofs = ProofDb::new(Arc::new(MemStore::new()), Arc::new(MemStore::new()));
        let index = ProofIndex::new(index_store);

        for i in 0..10u8 {
            let mut acc = proofs.accumulator();
            acc.push_all([b"root".as_slice(), &[i; 4]]).unwrap();
            index.save(&[i; 32], acc.ids()).unwrap();
        }

        assert_eq!(verify_dedup(&index, &proofs).unwrap(), 10);
    }

    #[test]
    fn test_verify_detects_dangling_id() {
        let proofs = ProofDb::new(Arc::new(MemStore::new()), Arc::new(MemStore::new()));
        let index = ProofIndex::new(Arc::new(MemStore::new()));

        // an id the dedup engine never minted
        index.save(&[1u8; 32], &[99]).unwrap();

        assert!(matches!(
            verify_dedup(&index, &proofs),
            Err(Error::MissingFragment(99))
        ));
    }
}
