//! Append-only tables of fixed-size, self-describing records.
//!
//! One record is laid out as:
//!
//! ```text
//! [pad_len: u16 LE][payload][pad_len zero bytes]
//! ```
//!
//! The full record length is the smallest multiple of 8 bytes holding
//! `capacity + 2`, fixed at open time, so row `n` always occupies
//! `[n*L, (n+1)*L)` of the data file and the exact payload is recoverable
//! without an external length index. Closing the table writes a
//! `<name>.metadata.json` sidecar with the record count, the full record
//! size, and a caller-supplied partition start offset.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Bytes reserved for the padding counter at the head of every record.
pub const PAD_COUNTER_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub n_records: u32,
    pub record_size: usize,
    pub start_offset: usize,
}

pub struct RecordTable {
    capacity: usize,
    full_record_size: usize,
    next_row: u32,
    start_offset: usize,
    metadata_path: PathBuf,
    writer: BufWriter<File>,
    reader: File,
    zeros: Vec<u8>,
}

impl RecordTable {
    /// Create `<dir>/<name>.bin` for appending, truncating any leftover
    /// data from an earlier run. `capacity` is the maximum payload length;
    /// `start_offset` is recorded verbatim in the metadata sidecar for
    /// sharded tables.
    pub fn open(dir: &Path, name: &str, capacity: usize, start_offset: usize) -> Result<Self> {
        let data_path = dir.join(format!("{name}.bin"));
        let metadata_path = dir.join(format!("{name}.metadata.json"));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&data_path)?;
        let reader = OpenOptions::new().read(true).open(&data_path)?;

        let full_record_size = (capacity + PAD_COUNTER_SIZE).div_ceil(8) * 8;

        Ok(Self {
            capacity,
            full_record_size,
            next_row: 0,
            start_offset,
            metadata_path,
            writer: BufWriter::new(file),
            reader,
            zeros: vec![0u8; full_record_size],
        })
    }

    /// Maximum payload length accepted by [`Self::append`].
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full on-disk record length, fixed at open time.
    pub fn full_record_size(&self) -> usize {
        self.full_record_size
    }

    /// Row id the next append will receive; doubles as the current row
    /// count.
    pub fn next_row(&self) -> u32 {
        self.next_row
    }

    pub fn len(&self) -> u32 {
        self.next_row
    }

    pub fn is_empty(&self) -> bool {
        self.next_row == 0
    }

    /// Append one payload, returning its row id. Row ids are dense,
    /// 0-based, and never reused.
    pub fn append(&mut self, payload: &[u8]) -> Result<u32> {
        if payload.len() > self.capacity {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                capacity: self.capacity,
            });
        }
        let padding = self.full_record_size - PAD_COUNTER_SIZE - payload.len();
        if padding > u16::MAX as usize {
            return Err(Error::PaddingOverflow { padding });
        }

        let row = self.next_row;
        self.next_row += 1;

        self.writer.write_all(&(padding as u16).to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.write_all(&self.zeros[..padding])?;
        Ok(row)
    }

    /// Append an empty record, consuming one row id. Keeps row ids 1:1
    /// with an external enumeration even for absent entries.
    pub fn write_blank(&mut self) -> Result<u32> {
        self.append(&[])
    }

    /// Read back the exact payload of `row`. Flushes the write buffer
    /// first; meant for offline verification, not a serving hot path.
    pub fn get(&mut self, row: u32) -> Result<Vec<u8>> {
        self.writer.flush()?;

        let offset = row as u64 * self.full_record_size as u64;
        self.reader.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; self.full_record_size];
        self.reader.read_exact(&mut buf)?;

        let padding = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        Ok(buf[PAD_COUNTER_SIZE..self.full_record_size - padding].to_vec())
    }

    /// Flush buffered appends and persist the metadata sidecar.
    pub fn close(mut self) -> Result<TableMetadata> {
        self.writer.flush()?;

        let metadata = TableMetadata {
            n_records: self.next_row,
            record_size: self.full_record_size,
            start_offset: self.start_offset,
        };
        let file = File::create(&self.metadata_path)?;
        serde_json::to_writer(file, &metadata)?;
        Ok(metadata)
    }
}
