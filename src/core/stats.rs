use serde::{Serialize, Deserialize};

/// Stub index statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubIndexStats {
    // Forward index
    pub forward_entries: usize,
    pub generation: u64,
    pub pending_files: usize,
    pub rebuild_pending: bool,
    pub version_map_trusted: bool,

    // Secondary indices, sorted by name
    pub indices: Vec<SecondaryIndexStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryIndexStats {
    pub name: String,
    pub version: u32,
    pub key_count: usize,
    pub modification_stamp: u64,
}

/// Health as seen by callers: never "broken", at worst "catching up"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl StubIndexStats {
    pub fn health(&self) -> HealthStatus {
        if self.rebuild_pending {
            HealthStatus::Degraded("full reindex in progress".to_string())
        } else if !self.version_map_trusted {
            HealthStatus::Degraded("producer versions unreadable, reindexing".to_string())
        } else if self.pending_files > 0 {
            HealthStatus::Degraded(format!("{} files waiting for reindex", self.pending_files))
        } else {
            HealthStatus::Healthy
        }
    }
}
