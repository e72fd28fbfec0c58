use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::core::types::FileType;
use crate::stub::builder::BuilderRegistry;
use crate::stub::element::ElementTypeRegistry;

const TABLE_MAGIC: u32 = 0x4D56_5453; // "STVM"

/// Stamp recorded for files whose type has no stub builder
pub const NO_BUILDER_STAMP: i64 = i64::MIN;

/// A producer of stub data and the fingerprint of its current schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerVersion {
    pub name: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionChanges {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl VersionChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProducerEntry {
    fingerprint: String,
    stamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionTable {
    created_at_ms: i64,
    entries: BTreeMap<String, ProducerEntry>,
}

impl VersionTable {
    fn fresh() -> Self {
        VersionTable {
            created_at_ms: Utc::now().timestamp_millis(),
            entries: BTreeMap::new(),
        }
    }
}

/// Producer -> (fingerprint, stamp) registry persisted next to the forward index.
///
/// Stamps count down from the table's creation time, so a new or changed
/// producer always gets a stamp below every stamp handed out before. Data
/// stamped by an older producer generation can never match it.
pub struct VersionMap {
    path: PathBuf,
    table: VersionTable,
    trusted: bool,
}

impl VersionMap {
    pub fn load(path: &Path, producers: &[ProducerVersion]) -> Result<(Self, VersionChanges)> {
        let (table, trusted) = match read_table(path) {
            Ok(Some(table)) => (table, true),
            Ok(None) => (VersionTable::fresh(), true),
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "version map unreadable, every file counts as not indexed");
                (VersionTable::fresh(), false)
            }
        };

        let mut map = VersionMap {
            path: path.to_path_buf(),
            table,
            trusted,
        };
        let changes = map.check_and_update(producers)?;
        Ok((map, changes))
    }

    /// Compare the live producers with the table, assign stamps to added and
    /// changed ones, forget removed ones. Writes only when something changed.
    pub fn check_and_update(&mut self, producers: &[ProducerVersion]) -> Result<VersionChanges> {
        let mut changes = VersionChanges::default();

        for producer in producers {
            let known = self.table.entries.get(&producer.name).map(|e| e.fingerprint == producer.fingerprint);
            match known {
                Some(true) => {}
                Some(false) => changes.changed.push(producer.name.clone()),
                None => changes.added.push(producer.name.clone()),
            }
            if known != Some(true) {
                let stamp = self.next_stamp();
                self.table.entries.insert(producer.name.clone(), ProducerEntry {
                    fingerprint: producer.fingerprint.clone(),
                    stamp,
                });
            }
        }

        let live: Vec<&str> = producers.iter().map(|p| p.name.as_str()).collect();
        let removed: Vec<String> = self.table.entries.keys()
            .filter(|name| !live.contains(&name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            self.table.entries.remove(&name);
            changes.removed.push(name);
        }

        if !changes.is_empty() || !self.path.exists() {
            tracing::info!(
                added = changes.added.len(),
                changed = changes.changed.len(),
                removed = changes.removed.len(),
                "producer versions changed"
            );
            self.persist()?;
        }
        Ok(changes)
    }

    pub fn stamp_for(&self, producer: &str) -> Option<i64> {
        self.table.entries.get(producer).map(|e| e.stamp)
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Called once everything indexed under the unreadable table is gone
    pub fn mark_trusted(&mut self) {
        self.trusted = true;
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.table.created_at_ms).single()
    }

    fn next_stamp(&self) -> i64 {
        let lowest = self.table.entries.values()
            .map(|e| e.stamp)
            .min()
            .unwrap_or(self.table.created_at_ms)
            .min(self.table.created_at_ms);
        let mut candidate = lowest - 1;
        while self.table.entries.values().any(|e| e.stamp == candidate) {
            candidate -= 1;
        }
        candidate
    }

    // [ MAGIC ][ crc32 of body ][ bincode body ]
    fn persist(&self) -> Result<()> {
        let body = bincode::serialize(&self.table)?;
        let mut hasher = Hasher::new();
        hasher.update(&body);

        let mut data = Vec::with_capacity(body.len() + 8);
        data.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        data.extend_from_slice(&hasher.finalize().to_le_bytes());
        data.extend_from_slice(&body);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("bin.tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<Option<VersionTable>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    if data.len() < 8 {
        return Err(Error::corrupted("version map too small"));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if magic != TABLE_MAGIC {
        return Err(Error::corrupted(format!("version map magic {:#x}", magic)));
    }
    let mut hasher = Hasher::new();
    hasher.update(&data[8..]);
    if hasher.finalize() != checksum {
        return Err(Error::corrupted("version map checksum mismatch"));
    }
    Ok(Some(bincode::deserialize(&data[8..])?))
}

pub fn builder_producer(file_type: &FileType) -> String {
    format!("builder:{}", file_type)
}

pub fn element_producer(name: &str) -> String {
    format!("element:{}", name)
}

/// Every builder and element type currently registered. A builder's
/// fingerprint also covers the versions of the element types it emits, so
/// bumping an element type invalidates the files built with it.
pub fn producers(builders: &BuilderRegistry, elements: &ElementTypeRegistry) -> Vec<ProducerVersion> {
    let mut out = Vec::new();
    for (file_type, builder) in builders.iter() {
        let mut fingerprint = format!("{}@{}", builder.name(), builder.version());
        let mut element_types = builder.element_types();
        element_types.sort();
        for id in element_types {
            match elements.get(id) {
                Some(element) => fingerprint.push_str(&format!(";{}@{}", element.name(), element.version())),
                None => fingerprint.push_str(&format!(";{}@?", id)),
            }
        }
        out.push(ProducerVersion {
            name: builder_producer(file_type),
            fingerprint,
        });
    }
    for element in elements.iter() {
        out.push(ProducerVersion {
            name: element_producer(element.name()),
            fingerprint: element.version().to_string(),
        });
    }
    out
}
