//! Offline verification of an ingested proof set.
//!
//! Walks the proof index, recovers every fragment from the reverse
//! mapping, and checks each one resolves back to its recorded id.
//!
//! Usage:
//!   cargo run --bin verify-dataset -- --work-dir work/
//!   cargo run --bin verify-dataset -- --work-dir work/ --storage

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use dataset_builder::{
    verify_dedup, ACCOUNT_TO_PROOF_STORE, FRAGMENT_TO_ID_STORE, ID_TO_FRAGMENT_STORE,
    SLOT_TO_PROOF_STORE, STORAGE_FRAGMENT_TO_ID_STORE, STORAGE_ID_TO_FRAGMENT_STORE,
};
use proofpir_core::store::KvStore;
use proofpir_core::{ProofDb, ProofIndex, RocksStore};

#[derive(Parser, Debug)]
#[command(name = "verify-dataset")]
#[command(about = "Check that every indexed proof round-trips through the dedup store")]
struct Args {
    /// Directory of the backing stores written by the ingest pass
    #[arg(long)]
    work_dir: PathBuf,

    /// Verify the storage-slot index instead of the account index
    #[arg(long)]
    storage: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let (forward, reverse, index_name) = if args.storage {
        (
            STORAGE_FRAGMENT_TO_ID_STORE,
            STORAGE_ID_TO_FRAGMENT_STORE,
            SLOT_TO_PROOF_STORE,
        )
    } else {
        (
            FRAGMENT_TO_ID_STORE,
            ID_TO_FRAGMENT_STORE,
            ACCOUNT_TO_PROOF_STORE,
        )
    };

    let fragment_to_id: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&args.work_dir, forward)?);
    let id_to_fragment: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&args.work_dir, reverse)?);
    let index_store: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&args.work_dir, index_name)?);

    let proofs = ProofDb::new(fragment_to_id, id_to_fragment);
    let index = ProofIndex::new(index_store);

    let verified = verify_dedup(&index, &proofs)?;
    tracing::info!(verified, storage = args.storage, "Verification complete");
    Ok(())
}
