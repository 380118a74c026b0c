//! Registry snapshot files
//!
//! ## File Format
//! ```text
//! ┌──────────┬────────────┬──────────────┬────────────┬─────────────────┐
//! │ "FSRG"   │ version    │ payload len  │ crc32      │ bincode payload │
//! │ 4 bytes  │ u16 LE     │ u32 LE       │ u32 LE     │ len bytes       │
//! └──────────┴────────────┴──────────────┴────────────┴─────────────────┘
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::schema::SchemaDecl;

pub(crate) const MAGIC: &[u8; 4] = b"FSRG";
pub(crate) const VERSION: u16 = 1;
pub(crate) const HEADER_SIZE: usize = 14;

/// Declarations and type ids of a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub declarations: Vec<SchemaDecl>,
    pub type_ids: Vec<(String, u32)>,
}

impl Snapshot {
    /// Frame the snapshot into bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::Serialization("snapshot payload exceeds 4 GiB".to_string()))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Verify framing and checksum, then decode
    pub fn decode(data: &[u8]) -> Result<Snapshot> {
        if data.len() < HEADER_SIZE {
            return Err(StoreError::SnapshotCorruption(format!(
                "file is {} bytes, header needs {}",
                data.len(),
                HEADER_SIZE
            )));
        }
        if &data[0..4] != MAGIC {
            return Err(StoreError::SnapshotCorruption("bad magic".to_string()));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != VERSION {
            return Err(StoreError::SnapshotCorruption(format!("unsupported version {version}")));
        }
        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let crc = u32::from_le_bytes([data[10], data[11], data[12], data[13]]);

        let payload = &data[HEADER_SIZE..];
        if payload.len() != len {
            return Err(StoreError::SnapshotCorruption(format!(
                "payload is {} bytes, header says {}",
                payload.len(),
                len
            )));
        }
        let actual = crc32fast::hash(payload);
        if actual != crc {
            return Err(StoreError::SnapshotCorruption(format!(
                "checksum mismatch: stored {crc:#010x}, computed {actual:#010x}"
            )));
        }
        Ok(bincode::deserialize(payload)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&self.encode()?)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Snapshot> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Snapshot::decode(&data)
    }
}
