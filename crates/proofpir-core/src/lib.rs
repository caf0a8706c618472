//! proofpir-core: building blocks for the offline PIR state dataset
//!
//! This crate turns the raw Merkle proofs of a full account set into a
//! retrieval-ready dataset:
//!
//! - [`dedup::ProofDb`] collapses the millions of repeated proof fragments
//!   near the tree root into dense fragment ids, safely under many
//!   concurrent writers.
//! - [`bucket::BucketMapper`] spreads the unique fragments across a fixed
//!   number of retrieval partitions, keeping partition sizes balanced while
//!   never placing two of one account's fragments in the same partition.
//! - [`record_table::RecordTable`] is the append-only fixed-record binary
//!   store backing the partitions and the tree-top table.
//!
//! Extraction of accounts and proofs from a state tree is out of scope;
//! callers feed proofs through the [`source::ProofSource`] trait and
//! persistence goes through the [`store::KvStore`] trait.
//!
//! # Concurrency
//!
//! Deduplication is safe for many writers sharing one [`dedup::ProofDb`]
//! (striped locks, atomic counters). Bucket assignment is a deliberately
//! sequential single pass: balance quality depends on one global load
//! ordering, so one thread drives one [`bucket::BucketMapper`] over the
//! whole account set.

pub mod ablation;
pub mod account;
pub mod bucket;
pub mod config;
pub mod dedup;
mod error;
pub mod key_lock;
pub mod proof_index;
pub mod record_table;
pub mod source;
pub mod store;

pub use ablation::FlatMapper;
pub use account::{AccountRecord, ACCOUNT_RECORD_SIZE, ADDRESS_HASH_SIZE};
pub use bucket::{BucketLocation, BucketMapper, BucketStats, LOCATION_SIZE, TREE_TOP_BUCKET_ID};
pub use config::BuildConfig;
pub use dedup::{ProofAccumulator, ProofDb, HOT_FRAGMENT_THRESHOLD};
pub use error::Error;
pub use key_lock::KeyLocker;
pub use proof_index::ProofIndex;
pub use record_table::{RecordTable, TableMetadata};
pub use source::ProofSource;
pub use store::{KvStore, MemStore, RocksStore};

pub type Result<T> = std::result::Result<T, Error>;

/// 32-byte hash of an account address, the key of the account trie.
pub type AddressHash = [u8; 32];

/// 32-byte storage slot key.
pub type SlotKey = [u8; 32];
