use std::path::{Path, PathBuf};
use std::fs;
use crate::core::error::Result;

/// Directory structure for stub index files
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub forward_dir: PathBuf,   // Forward index: file id -> serialized stub
    pub indices_dir: PathBuf,   // One sub-directory per key-type
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let forward_dir = base_dir.join("forward");
        let indices_dir = base_dir.join("indices");

        fs::create_dir_all(&forward_dir)?;
        fs::create_dir_all(&indices_dir)?;

        Ok(StorageLayout {
            base_dir,
            forward_dir,
            indices_dir,
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }

    pub fn version_map_path(&self) -> PathBuf {
        self.forward_dir.join("versions.bin")
    }

    pub fn registered_indices_path(&self) -> PathBuf {
        self.indices_dir.join("registered.json")
    }

    pub fn index_dir(&self, name: &str) -> PathBuf {
        self.indices_dir.join(sanitize(name))
    }

    pub fn index_version_path(&self, name: &str) -> PathBuf {
        self.index_dir(name).join(format!("{}.ver", sanitize(name)))
    }

    pub fn index_has_data(&self, name: &str) -> bool {
        dir_has_children(&self.index_dir(name))
    }

    /// Delete an index directory by renaming it away first, so a crash half
    /// way through never leaves a partially deleted index under the live name
    pub fn delete_index_dir(&self, name: &str) -> Result<()> {
        let dir = self.index_dir(name);
        if !dir.exists() {
            return Ok(());
        }
        let doomed = self.indices_dir.join(format!(
            ".{}.deleted-{}", sanitize(name), chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        fs::rename(&dir, &doomed)?;
        fs::remove_dir_all(&doomed)?;
        Ok(())
    }

    /// Drop every forward store, version map included, and start empty
    pub fn reset_forward_dir(&self) -> Result<()> {
        if self.forward_dir.exists() {
            fs::remove_dir_all(&self.forward_dir)?;
        }
        fs::create_dir_all(&self.forward_dir)?;
        Ok(())
    }
}

fn dir_has_children(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

// Key-type names are chosen by extension authors. Lowercase ASCII letters,
// digits, '-' and non-leading '.' pass through; every other byte becomes
// `_xx`, so two names never share a directory, not even on a case-insensitive
// file system. The empty name is `_`, which no other name encodes to.
fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(name.len());
    for (i, b) in name.bytes().enumerate() {
        let plain = b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || (b == b'.' && i > 0);
        if plain {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{:02x}", b));
        }
    }
    out
}
