//! Dataset build pass.
//!
//! Expects the work directory's stores to be populated by the extraction
//! and ingest passes (accounts, fragment mappings, proof index); packs the
//! balanced bucket tables and the sharded account records into the output
//! directory.
//!
//! Usage:
//!   cargo run --bin build-dataset -- --config build.json

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use dataset_builder::{
    build_dataset, measure_store, Assigner, BuildOptions, VerifyContext, ACCOUNTS_STORE,
    ACCOUNT_TO_PROOF_STORE, FRAGMENT_TO_ID_STORE, ID_TO_FRAGMENT_STORE, LOCATION_INDEX_STORE,
};
use proofpir_core::store::KvStore;
use proofpir_core::{BucketMapper, BuildConfig, FlatMapper, ProofDb, ProofIndex, RocksStore};

#[derive(Parser, Debug)]
#[command(name = "build-dataset")]
#[command(about = "Pack deduplicated account proofs into balanced PIR bucket tables")]
struct Args {
    /// JSON build configuration
    #[arg(long)]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = BuildConfig::from_json_file(&args.config)?;
    if let Some(root) = cfg.state_root_bytes()? {
        tracing::info!(state_root = %hex::encode(root), "Building dataset");
    }

    std::fs::create_dir_all(&cfg.out_dir)?;

    let accounts: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&cfg.work_dir, ACCOUNTS_STORE)?);
    let fragment_to_id: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&cfg.work_dir, FRAGMENT_TO_ID_STORE)?);
    let id_to_fragment: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&cfg.work_dir, ID_TO_FRAGMENT_STORE)?);
    let account_to_proof: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&cfg.work_dir, ACCOUNT_TO_PROOF_STORE)?);
    let location_index: Arc<dyn KvStore> =
        Arc::new(RocksStore::open(&cfg.out_dir, LOCATION_INDEX_STORE)?);

    let accounts_metadata = measure_store(accounts.as_ref())?;
    let account_len = cfg.account_len.unwrap_or(accounts_metadata.record_len);
    let fragment_capacity = match cfg.fragment_capacity {
        Some(capacity) => capacity,
        None => measure_store(id_to_fragment.as_ref())?.record_len,
    };
    tracing::info!(
        accounts = accounts_metadata.n_records,
        account_len,
        fragment_capacity,
        "Measured stores"
    );

    let proofs = ProofDb::new(fragment_to_id, id_to_fragment.clone());
    let index = ProofIndex::new(account_to_proof.clone());

    let assigner = if cfg.ablation {
        Assigner::Flat(FlatMapper::open(
            &cfg.out_dir,
            fragment_capacity,
            cfg.max_proof_len,
            ProofIndex::new(account_to_proof.clone()),
            id_to_fragment.clone(),
        )?)
    } else {
        Assigner::Balanced(BucketMapper::open(
            &cfg.out_dir,
            cfg.n_tree_top,
            cfg.n_buckets,
            fragment_capacity,
            ProofIndex::new(account_to_proof.clone()),
            id_to_fragment.clone(),
            location_index,
        )?)
    };

    let verify = cfg.verify_every.map(|every| VerifyContext {
        proofs: &proofs,
        index: &index,
        every,
    });

    let opts = BuildOptions {
        out_dir: cfg.out_dir.clone(),
        n_account_shards: cfg.n_account_shards,
        max_proof_len: cfg.max_proof_len,
        account_len,
        n_accounts: accounts_metadata.n_records,
    };
    let report = build_dataset(accounts.as_ref(), assigner, verify, &opts)?;

    if let Some(stats) = &report.stats {
        tracing::info!(
            accounts = report.accounts,
            shards = report.shards,
            spread = stats.spread,
            "Done"
        );
    } else {
        tracing::info!(accounts = report.accounts, shards = report.shards, "Done (ablation)");
    }
    Ok(())
}
