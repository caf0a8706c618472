//! Pipeline for turning an extracted account set into the PIR dataset.
//!
//! Two passes over the backing stores:
//!
//! 1. [`ingest::ingest_account_proofs`]: many workers over disjoint
//!    key-prefix ranges feed proofs through one shared dedup engine and
//!    record each account's id sequence.
//! 2. [`dataset::build_dataset`]: one thread walks the account table in
//!    key order, assigns bucket locations, and packs the sharded output
//!    tables.
//!
//! The binaries wire these passes to RocksDB stores; integration tests
//! drive them over in-memory stores with synthetic proof sources.

pub mod dataset;
pub mod ingest;
pub mod verify;

pub use dataset::{build_dataset, measure_store, Assigner, BuildOptions, BuildReport, Metadata, VerifyContext};
pub use ingest::{ingest_account_proofs, ingest_storage_proofs};
pub use verify::verify_dedup;

/// Store names under the work directory, written by the ingest pass.
pub const ACCOUNTS_STORE: &str = "accounts";
pub const FRAGMENT_TO_ID_STORE: &str = "fragment-to-id";
pub const ID_TO_FRAGMENT_STORE: &str = "id-to-fragment";
pub const ACCOUNT_TO_PROOF_STORE: &str = "account-to-proof";

/// Scoped stores of the storage-slot pass.
pub const STORAGE_FRAGMENT_TO_ID_STORE: &str = "storage-fragment-to-id";
pub const STORAGE_ID_TO_FRAGMENT_STORE: &str = "storage-id-to-fragment";
pub const SLOT_TO_PROOF_STORE: &str = "slot-to-proof";

/// Store name under the output directory holding id → location mappings.
pub const LOCATION_INDEX_STORE: &str = "fragment-location";
