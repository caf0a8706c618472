//! Fixed-width account payload and packed dataset record layouts.
//!
//! The account payload is a fixed 624-byte big-endian layout:
//!
//! ```text
//! [nonce:8][balance:32][storage_root:32][code_hash:32][code_id:8][proof_ids:64*8]
//! ```
//!
//! A packed dataset record prefixes the payload with the 32-byte address
//! hash and appends the account's packed bucket-location vector:
//!
//! ```text
//! [address_hash:32][account:account_len][locations:max_proof_len*5]
//! ```

use crate::bucket::{decode_locations, encode_locations, BucketLocation, LOCATION_SIZE};
use crate::{Error, Result};

pub const ADDRESS_HASH_SIZE: usize = 32;

/// Proof-id slots in the fixed account payload.
pub const MAX_PROOF_IDS: usize = 64;

const NONCE_OFFSET: usize = 0;
const BALANCE_OFFSET: usize = NONCE_OFFSET + 8;
const STORAGE_ROOT_OFFSET: usize = BALANCE_OFFSET + 32;
const CODE_HASH_OFFSET: usize = STORAGE_ROOT_OFFSET + 32;
const CODE_ID_OFFSET: usize = CODE_HASH_OFFSET + 32;
const PROOF_IDS_OFFSET: usize = CODE_ID_OFFSET + 8;

pub const ACCOUNT_RECORD_SIZE: usize = PROOF_IDS_OFFSET + MAX_PROOF_IDS * 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRecord {
    pub nonce: u64,
    /// Big-endian 256-bit balance.
    pub balance: [u8; 32],
    pub storage_root: [u8; 32],
    pub code_hash: [u8; 32],
    pub code_id: u64,
    pub proof_ids: Vec<u64>,
}

impl AccountRecord {
    pub fn to_bytes(&self) -> Result<[u8; ACCOUNT_RECORD_SIZE]> {
        if self.proof_ids.len() > MAX_PROOF_IDS {
            return Err(Error::Config(format!(
                "account carries {} proof ids, layout holds {}",
                self.proof_ids.len(),
                MAX_PROOF_IDS
            )));
        }

        let mut buf = [0u8; ACCOUNT_RECORD_SIZE];
        buf[NONCE_OFFSET..BALANCE_OFFSET].copy_from_slice(&self.nonce.to_be_bytes());
        buf[BALANCE_OFFSET..STORAGE_ROOT_OFFSET].copy_from_slice(&self.balance);
        buf[STORAGE_ROOT_OFFSET..CODE_HASH_OFFSET].copy_from_slice(&self.storage_root);
        buf[CODE_HASH_OFFSET..CODE_ID_OFFSET].copy_from_slice(&self.code_hash);
        buf[CODE_ID_OFFSET..PROOF_IDS_OFFSET].copy_from_slice(&self.code_id.to_be_bytes());
        for (i, id) in self.proof_ids.iter().enumerate() {
            let offset = PROOF_IDS_OFFSET + i * 8;
            buf[offset..offset + 8].copy_from_slice(&id.to_be_bytes());
        }
        Ok(buf)
    }

    /// Decode a fixed account payload. Fragment ids start at 1, so zeroed
    /// trailing proof-id slots are trimmed as unused.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ACCOUNT_RECORD_SIZE {
            return Err(Error::Truncated {
                expected: ACCOUNT_RECORD_SIZE,
                actual: bytes.len(),
            });
        }

        let mut proof_ids: Vec<u64> = (0..MAX_PROOF_IDS)
            .map(|i| {
                let offset = PROOF_IDS_OFFSET + i * 8;
                u64::from_be_bytes(bytes[offset..offset + 8].try_into().expect("8 bytes"))
            })
            .collect();
        while proof_ids.last() == Some(&0) {
            proof_ids.pop();
        }

        Ok(Self {
            nonce: u64::from_be_bytes(bytes[NONCE_OFFSET..BALANCE_OFFSET].try_into().expect("8 bytes")),
            balance: bytes[BALANCE_OFFSET..STORAGE_ROOT_OFFSET].try_into().expect("32 bytes"),
            storage_root: bytes[STORAGE_ROOT_OFFSET..CODE_HASH_OFFSET].try_into().expect("32 bytes"),
            code_hash: bytes[CODE_HASH_OFFSET..CODE_ID_OFFSET].try_into().expect("32 bytes"),
            code_id: u64::from_be_bytes(bytes[CODE_ID_OFFSET..PROOF_IDS_OFFSET].try_into().expect("8 bytes")),
            proof_ids,
        })
    }
}

/// Byte size of one packed dataset record.
pub fn pir_record_size(account_len: usize, max_proof_len: usize) -> usize {
    ADDRESS_HASH_SIZE + account_len + max_proof_len * LOCATION_SIZE
}

/// Pack one account's dataset record. `account` may be shorter than
/// `account_len`; the slot is zero-padded so every offset is fixed.
pub fn pack_pir_record(
    address_hash: &[u8],
    account: &[u8],
    account_len: usize,
    locations: &[BucketLocation],
    max_proof_len: usize,
) -> Result<Vec<u8>> {
    if address_hash.len() != ADDRESS_HASH_SIZE {
        return Err(Error::Truncated {
            expected: ADDRESS_HASH_SIZE,
            actual: address_hash.len(),
        });
    }
    if account.len() > account_len {
        return Err(Error::PayloadTooLarge {
            len: account.len(),
            capacity: account_len,
        });
    }

    let mut record = vec![0u8; pir_record_size(account_len, max_proof_len)];
    record[..ADDRESS_HASH_SIZE].copy_from_slice(address_hash);
    record[ADDRESS_HASH_SIZE..ADDRESS_HASH_SIZE + account.len()].copy_from_slice(account);
    let locations_offset = ADDRESS_HASH_SIZE + account_len;
    record[locations_offset..].copy_from_slice(&encode_locations(locations, max_proof_len)?);
    Ok(record)
}

/// Split a packed dataset record back into address hash, account slot, and
/// location vector.
pub fn unpack_pir_record(
    record: &[u8],
    account_len: usize,
    max_proof_len: usize,
) -> Result<(Vec<u8>, Vec<u8>, Vec<BucketLocation>)> {
    let expected = pir_record_size(account_len, max_proof_len);
    if record.len() < expected {
        return Err(Error::Truncated {
            expected,
            actual: record.len(),
        });
    }

    let address_hash = record[..ADDRESS_HASH_SIZE].to_vec();
    let account = record[ADDRESS_HASH_SIZE..ADDRESS_HASH_SIZE + account_len].to_vec();
    let locations = decode_locations(&record[ADDRESS_HASH_SIZE + account_len..], max_proof_len)?;
    Ok((address_hash, account, locations))
}
