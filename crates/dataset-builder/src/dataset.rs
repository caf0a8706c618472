//! The dataset build pass.
//!
//! One thread walks the account table in key order, assigns every proof id
//! a bucket location through one allocator instance, and packs
//! `[address_hash][account][locations]` records into sharded output
//! tables. The pass is deliberately sequential: balance quality depends on
//! one global load ordering, and the allocator's scratch state is not safe
//! for concurrent use.

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};

use proofpir_core::account::{pack_pir_record, pir_record_size};
use proofpir_core::bucket::{BucketLocation, BucketStats};
use proofpir_core::record_table::RecordTable;
use proofpir_core::store::KvStore;
use proofpir_core::{BucketMapper, Error, FlatMapper, ProofDb, ProofIndex, Result};

/// Shape of a store's values: record count and maximum value length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub n_records: u64,
    pub record_len: usize,
}

/// Scan a store to learn its record count and widest value. One linear
/// pass; configure the widths up front to skip it on huge stores.
pub fn measure_store(store: &dyn KvStore) -> Result<Metadata> {
    let mut metadata = Metadata {
        n_records: 0,
        record_len: 0,
    };
    for entry in store.scan(None)? {
        let (_, value) = entry?;
        metadata.record_len = metadata.record_len.max(value.len());
        metadata.n_records += 1;
        if metadata.n_records % 1_000_000 == 0 {
            tracing::info!(
                records = metadata.n_records,
                record_len = metadata.record_len,
                "Measuring store"
            );
        }
    }
    Ok(metadata)
}

/// Either the balanced bucket allocator or the flat ablation baseline.
pub enum Assigner {
    Balanced(BucketMapper),
    Flat(FlatMapper),
}

impl Assigner {
    fn assign_account(&mut self, address_hash: &[u8]) -> Result<Vec<BucketLocation>> {
        match self {
            Assigner::Balanced(mapper) => mapper.assign_account(address_hash),
            Assigner::Flat(mapper) => mapper.assign_account(address_hash),
        }
    }

    fn fetch_proof(&mut self, locations: &[BucketLocation]) -> Result<Option<Vec<Vec<u8>>>> {
        match self {
            Assigner::Balanced(mapper) => mapper.fetch_proof(locations).map(Some),
            // the flat baseline has no verification read path
            Assigner::Flat(_) => Ok(None),
        }
    }

    fn stats(&self) -> Option<BucketStats> {
        match self {
            Assigner::Balanced(mapper) => Some(mapper.stats()),
            Assigner::Flat(_) => None,
        }
    }

    fn close(self) -> Result<()> {
        match self {
            Assigner::Balanced(mapper) => mapper.close(),
            Assigner::Flat(mapper) => mapper.close(),
        }
    }
}

/// Round-trip context for sampled in-pass verification.
pub struct VerifyContext<'a> {
    pub proofs: &'a ProofDb,
    pub index: &'a ProofIndex,
    /// Check every Nth account.
    pub every: u64,
}

pub struct BuildOptions {
    pub out_dir: PathBuf,
    pub n_account_shards: usize,
    pub max_proof_len: usize,
    /// Account payload slot width in the packed record.
    pub account_len: usize,
    /// Accounts expected, used for shard sizing and progress reporting.
    pub n_accounts: u64,
}

pub struct BuildReport {
    pub accounts: u64,
    pub shards: usize,
    /// Bucket balance; `None` for the flat ablation baseline.
    pub stats: Option<BucketStats>,
}

/// Pack every account of the ordered account table into the sharded
/// dataset tables. Consumes the assigner so all partition tables are
/// flushed and their metadata persisted on success.
pub fn build_dataset(
    accounts: &dyn KvStore,
    mut assigner: Assigner,
    verify: Option<VerifyContext<'_>>,
    opts: &BuildOptions,
) -> Result<BuildReport> {
    std::fs::create_dir_all(&opts.out_dir)?;

    let record_size = pir_record_size(opts.account_len, opts.max_proof_len);
    let chunk_size = (opts.n_accounts.div_ceil(opts.n_account_shards as u64)).max(1);
    tracing::info!(
        record_size,
        chunk_size,
        shards = opts.n_account_shards,
        "Starting dataset build"
    );

    let progress = ProgressBar::new(opts.n_accounts);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40}] {pos}/{len} ({per_sec})")
            .expect("static template"),
    );

    let mut shard_number = 0usize;
    let mut shard = open_shard(opts, shard_number, record_size, chunk_size)?;
    shard_number += 1;

    let mut processed = 0u64;
    for entry in accounts.scan(None)? {
        let (address_hash, account) = entry?;

        let locations = assigner.assign_account(&address_hash)?;
        let record = pack_pir_record(
            &address_hash,
            &account,
            opts.account_len,
            &locations,
            opts.max_proof_len,
        )?;
        let row = shard.append(&record)?;

        if let Some(ctx) = &verify {
            if processed % ctx.every == 0 {
                verify_account(&mut assigner, &mut shard, row, &record, &address_hash, &locations, ctx)?;
            }
        }

        if processed > 0 && processed % chunk_size == 0 {
            shard.close()?;
            shard = open_shard(opts, shard_number, record_size, chunk_size)?;
            shard_number += 1;
        }

        processed += 1;
        if processed % 10_000 == 0 {
            progress.set_position(processed);
        }
    }
    shard.close()?;
    progress.finish_and_clear();

    let stats = assigner.stats();
    assigner.close()?;

    if let Some(stats) = &stats {
        for (bucket, &rows) in stats.rows.iter().enumerate() {
            tracing::debug!(bucket, rows, "Bucket size");
        }
        tracing::info!(
            tree_top_rows = stats.tree_top_rows,
            min = stats.min,
            max = stats.max,
            spread = stats.spread,
            "Bucket balance"
        );
    }
    tracing::info!(accounts = processed, shards = shard_number, "Dataset build complete");

    Ok(BuildReport {
        accounts: processed,
        shards: shard_number,
        stats,
    })
}

fn open_shard(
    opts: &BuildOptions,
    number: usize,
    record_size: usize,
    chunk_size: u64,
) -> Result<RecordTable> {
    // start_offset records the shard's first global row for decoders
    RecordTable::open(
        &opts.out_dir,
        &format!("accounts-pir-{number}"),
        record_size,
        number * chunk_size as usize,
    )
}

/// Re-read the packed record and cross-check the bucket tables against the
/// dedup engine's reverse mapping.
#[allow(clippy::too_many_arguments)]
fn verify_account(
    assigner: &mut Assigner,
    shard: &mut RecordTable,
    row: u32,
    record: &[u8],
    address_hash: &[u8],
    locations: &[BucketLocation],
    ctx: &VerifyContext<'_>,
) -> Result<()> {
    let read_back = shard.get(row)?;
    if read_back != record {
        return Err(Error::Verification(format!(
            "packed record for account {} did not round-trip",
            hex::encode(address_hash)
        )));
    }

    let Some(fetched) = assigner.fetch_proof(locations)? else {
        return Ok(());
    };
    let ids = ctx.index.get(address_hash)?;
    let expected = ctx.proofs.recover(&ids)?;
    if fetched != expected {
        return Err(Error::Verification(format!(
            "bucket tables disagree with the dedup store for account {}",
            hex::encode(address_hash)
        )));
    }
    Ok(())
}
