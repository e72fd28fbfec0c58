use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher;
use crate::core::error::{Error, Result};

/// Records which schema version a secondary index's on-disk data was built with.
///
/// Layout: `[version: u32 LE][created_at_ms: i64 LE][crc32 of the first 12 bytes]`
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    pub version: u32,
    pub created_at_ms: i64,
}

impl VersionRecord {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.created_at_ms).single()
    }
}

impl VersionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        VersionFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<VersionRecord> {
        let data = fs::read(&self.path)?;
        if data.len() != 16 {
            return Err(Error::corrupted(format!("version file {:?} has {} bytes", self.path, data.len())));
        }
        let mut hasher = Hasher::new();
        hasher.update(&data[..12]);
        let stored = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        if hasher.finalize() != stored {
            return Err(Error::corrupted(format!("version file {:?} checksum mismatch", self.path)));
        }

        let version = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[4..12]);
        Ok(VersionRecord {
            version,
            created_at_ms: i64::from_le_bytes(ts),
        })
    }

    /// Absent or unreadable counts as different
    pub fn differs(&self, version: u32) -> bool {
        match self.read() {
            Ok(record) => record.version != version,
            Err(_) => true,
        }
    }

    pub fn rewrite(&self, version: u32) -> Result<VersionRecord> {
        let record = VersionRecord {
            version,
            created_at_ms: Utc::now().timestamp_millis(),
        };

        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&record.version.to_le_bytes());
        data.extend_from_slice(&record.created_at_ms.to_le_bytes());
        let mut hasher = Hasher::new();
        hasher.update(&data);
        data.extend_from_slice(&hasher.finalize().to_le_bytes());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("ver.tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(record)
    }
}
