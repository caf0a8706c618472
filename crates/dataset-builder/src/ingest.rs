//! Proof ingestion: accounts (and optionally storage slots) through the
//! dedup engine into the proof indices.
//!
//! Workers split the 256 one-byte key prefixes of the account table among
//! themselves and scan their ranges independently; all contention funnels
//! through the shared [`ProofDb`], which is built for it.

use std::sync::atomic::{AtomicU64, Ordering};

use proofpir_core::proof_index::slot_key;
use proofpir_core::source::ProofSource;
use proofpir_core::store::KvStore;
use proofpir_core::{Error, ProofDb, ProofIndex, Result};

/// Dedup every account's membership proof and record its id sequence.
/// Returns the number of accounts ingested.
pub fn ingest_account_proofs(
    accounts: &dyn KvStore,
    source: &dyn ProofSource,
    proofs: &ProofDb,
    index: &ProofIndex,
    workers: usize,
) -> Result<u64> {
    let processed = AtomicU64::new(0);

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let processed = &processed;
            handles.push(scope.spawn(move || -> Result<()> {
                for prefix in (worker..256).step_by(workers) {
                    let prefix = [prefix as u8];
                    for entry in accounts.scan(Some(&prefix))? {
                        let (address_hash, _account) = entry?;

                        let fragments = source.account_proof(&address_hash)?;
                        let mut acc = proofs.accumulator();
                        acc.push_all(&fragments)?;
                        index.save(&address_hash, acc.ids())?;

                        let n = processed.fetch_add(1, Ordering::Relaxed) + 1;
                        if n % 100_000 == 0 {
                            tracing::info!(
                                accounts = n,
                                total = proofs.total(),
                                unique = proofs.unique(),
                                deduped = proofs.deduped(),
                                "Ingested account proofs"
                            );
                        }
                    }
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("ingest worker panicked")?;
        }
        Ok(())
    })?;

    Ok(processed.into_inner())
}

/// Dedup per-slot storage proofs into a scoped engine, keyed by
/// address-hash‖slot-key. Slots already indexed are skipped, so re-running
/// after adding accounts is cheap. Returns the number of slots ingested.
pub fn ingest_storage_proofs(
    accounts: &dyn KvStore,
    source: &dyn ProofSource,
    proofs: &ProofDb,
    slot_index: &ProofIndex,
    workers: usize,
) -> Result<u64> {
    let slots = AtomicU64::new(0);

    std::thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let slots = &slots;
            handles.push(scope.spawn(move || -> Result<()> {
                for prefix in (worker..256).step_by(workers) {
                    let prefix = [prefix as u8];
                    for entry in accounts.scan(Some(&prefix))? {
                        let (address_hash, _account) = entry?;
                        let address: [u8; 32] =
                            address_hash.as_slice().try_into().map_err(|_| Error::Truncated {
                                expected: 32,
                                actual: address_hash.len(),
                            })?;

                        for (slot, fragments) in source.storage_proofs(&address_hash)? {
                            let key = slot_key(&address, &slot);
                            if slot_index.contains(&key)? {
                                continue;
                            }

                            let mut acc = proofs.accumulator();
                            acc.push_all(&fragments)?;
                            slot_index.save(&key, acc.ids())?;

                            let n = slots.fetch_add(1, Ordering::Relaxed) + 1;
                            if n % 100_000 == 0 {
                                tracing::info!(slots = n, "Ingested storage proofs");
                            }
                        }
                    }
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("ingest worker panicked")?;
        }
        Ok(())
    })?;

    Ok(slots.into_inner())
}
