//! Build-run configuration, loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bucket::TREE_TOP_BUCKET_ID;
use crate::{Error, Result};

fn default_n_tree_top() -> usize {
    5
}

fn default_n_buckets() -> usize {
    64
}

fn default_max_proof_len() -> usize {
    64
}

fn default_n_account_shards() -> usize {
    8
}

fn default_n_ingest_workers() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory of the backing stores written by the ingest pass.
    pub work_dir: PathBuf,
    /// Directory receiving the dataset tables.
    pub out_dir: PathBuf,

    /// Hex state root of the snapshot the proofs were taken against;
    /// recorded for the logs only.
    #[serde(default)]
    pub state_root: Option<String>,

    #[serde(default = "default_n_tree_top")]
    pub n_tree_top: usize,
    #[serde(default = "default_n_buckets")]
    pub n_buckets: usize,
    /// Location slots per packed dataset record.
    #[serde(default = "default_max_proof_len")]
    pub max_proof_len: usize,
    /// Output shards for the packed account records.
    #[serde(default = "default_n_account_shards")]
    pub n_account_shards: usize,
    #[serde(default = "default_n_ingest_workers")]
    pub n_ingest_workers: usize,

    /// Maximum fragment length; measured from the store when absent.
    #[serde(default)]
    pub fragment_capacity: Option<usize>,
    /// Account payload slot width; measured from the store when absent.
    #[serde(default)]
    pub account_len: Option<usize>,

    /// Round-trip every Nth packed account against the bucket tables.
    #[serde(default)]
    pub verify_every: Option<u64>,
    /// Build the unconstrained single-table baseline instead of the
    /// balanced buckets.
    #[serde(default)]
    pub ablation: bool,
    /// Also ingest per-slot storage proofs.
    #[serde(default)]
    pub storage: bool,
}

impl BuildConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_buckets == 0 || self.n_buckets >= TREE_TOP_BUCKET_ID as usize {
            return Err(Error::Config(format!(
                "n_buckets must be in 1..{}, got {}",
                TREE_TOP_BUCKET_ID, self.n_buckets
            )));
        }
        if self.max_proof_len < self.n_tree_top {
            return Err(Error::Config(format!(
                "max_proof_len {} cannot hold the {} tree-top levels",
                self.max_proof_len, self.n_tree_top
            )));
        }
        if self.n_account_shards == 0 {
            return Err(Error::Config("n_account_shards must be positive".into()));
        }
        if self.n_ingest_workers == 0 || self.n_ingest_workers > 256 {
            return Err(Error::Config(format!(
                "n_ingest_workers must be in 1..=256, got {}",
                self.n_ingest_workers
            )));
        }
        if self.verify_every == Some(0) {
            return Err(Error::Config("verify_every must be positive".into()));
        }
        self.state_root_bytes()?;
        Ok(())
    }

    /// Decoded state root, if one was configured.
    pub fn state_root_bytes(&self) -> Result<Option<[u8; 32]>> {
        let Some(raw) = self.state_root.as_deref() else {
            return Ok(None);
        };
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw)
            .map_err(|e| Error::Config(format!("invalid state_root hex: {e}")))?;
        let root: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            Error::Config(format!("state_root must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Some(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> BuildConfig {
        let raw = format!(r#"{{"work_dir": "/tmp/work", "out_dir": "/tmp/out"{extra}}}"#);
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = minimal_config("");
        config.validate().unwrap();
        assert_eq!(config.n_tree_top, 5);
        assert_eq!(config.n_buckets, 64);
        assert_eq!(config.max_proof_len, 64);
        assert_eq!(config.n_account_shards, 8);
        assert_eq!(config.n_ingest_workers, 16);
        assert!(!config.ablation);
        assert!(config.fragment_capacity.is_none());
    }

    #[test]
    fn test_state_root_parsing() {
        let config = minimal_config(&format!(r#", "state_root": "0x{}""#, "11".repeat(32)));
        assert_eq!(config.state_root_bytes().unwrap(), Some([0x11u8; 32]));

        let bad = minimal_config(r#", "state_root": "0xzz""#);
        assert!(bad.validate().is_err());

        let short = minimal_config(r#", "state_root": "0011""#);
        assert!(matches!(short.state_root_bytes(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        assert!(minimal_config(r#", "n_buckets": 0"#).validate().is_err());
        assert!(minimal_config(r#", "n_buckets": 255"#).validate().is_err());
        assert!(minimal_config(r#", "max_proof_len": 3"#).validate().is_err());
        assert!(minimal_config(r#", "n_account_shards": 0"#).validate().is_err());
        assert!(minimal_config(r#", "n_ingest_workers": 300"#).validate().is_err());
        assert!(minimal_config(r#", "verify_every": 0"#).validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.json");
        std::fs::write(
            &path,
            r#"{"work_dir": "w", "out_dir": "o", "n_buckets": 32, "ablation": true}"#,
        )
        .unwrap();

        let config = BuildConfig::from_json_file(&path).unwrap();
        assert_eq!(config.n_buckets, 32);
        assert!(config.ablation);
    }
}
