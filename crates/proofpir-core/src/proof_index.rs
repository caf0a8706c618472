//! Account and slot indices over deduplicated proofs.
//!
//! Maps a 32-byte address hash (or a 64-byte address-hash‖slot-key pair)
//! to the ordered fragment-id sequence of its membership proof. Values are
//! concatenated 8-byte little-endian ids.

use std::sync::Arc;

use crate::store::KvStore;
use crate::{AddressHash, Error, Result, SlotKey};

pub fn ids_to_bytes(ids: &[u64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        bytes.extend_from_slice(&id.to_le_bytes());
    }
    bytes
}

pub fn ids_from_bytes(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunks_exact(8)")))
        .collect()
}

/// Key of a per-slot proof entry: address hash followed by slot key.
pub fn slot_key(address_hash: &AddressHash, slot: &SlotKey) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(address_hash);
    key[32..].copy_from_slice(slot);
    key
}

pub struct ProofIndex {
    store: Arc<dyn KvStore>,
}

impl ProofIndex {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, key: &[u8], ids: &[u64]) -> Result<()> {
        self.store.set(key, &ids_to_bytes(ids))
    }

    /// The id sequence for `key`; absence is a fatal consistency
    /// violation, every key read here was written by the ingest pass.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u64>> {
        self.store
            .maybe_get(key)?
            .map(|bytes| ids_from_bytes(&bytes))
            .ok_or_else(|| Error::MissingProofIds(hex::encode(key)))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.store.contains(key)
    }

    /// The backing store, for ordered walks over all indexed keys.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}
