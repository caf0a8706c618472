//! Upstream proof source interface.
//!
//! Extraction of accounts, slots, and Merkle proofs from a chain state
//! tree is an external concern. The dataset pipeline only needs ordered
//! fragment byte strings per key; tests supply synthetic tree-shaped
//! implementations.

use crate::{Result, SlotKey};

pub trait ProofSource: Send + Sync {
    /// Ordered membership-proof fragments for one account, tree root
    /// first.
    fn account_proof(&self, address_hash: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// `(slot key, ordered fragments)` for every occupied storage slot of
    /// the account. Accounts without storage return an empty list.
    fn storage_proofs(&self, address_hash: &[u8]) -> Result<Vec<(SlotKey, Vec<Vec<u8>>)>> {
        let _ = address_hash;
        Ok(Vec::new())
    }
}
