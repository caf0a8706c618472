//! Striped locking keyed by content bytes.
//!
//! A fixed pool of mutexes plus a pure function mapping content to a
//! stripe. The only property correctness relies on is that identical bytes
//! always select the same stripe; unrelated content colliding on a stripe
//! only costs throughput.

use parking_lot::{Mutex, MutexGuard};
use xxhash_rust::xxh64::xxh64;

pub const DEFAULT_STRIPES: usize = 256;

pub struct KeyLocker {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocker {
    /// A pool of `stripes` mutexes; 0 selects [`DEFAULT_STRIPES`].
    pub fn new(stripes: usize) -> Self {
        let n = if stripes == 0 { DEFAULT_STRIPES } else { stripes };
        Self {
            stripes: (0..n).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_index(&self, key: &[u8]) -> usize {
        (xxh64(key, 0) % self.stripes.len() as u64) as usize
    }

    /// Lock the stripe for `key`; the stripe unlocks when the guard drops.
    pub fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_index(key)].lock()
    }
}

impl Default for KeyLocker {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
