use std::path::PathBuf;
use crate::compression::compress::CompressionType;

/// When secondary index registration runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Eager,       // Register inside open()
    Background,  // Register on a worker thread, first query waits for it
    Lazy,        // Register on first access
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,

    // Build-wide record format of the forward index, never mixed per record
    pub stub_compression: CompressionType,

    pub initialization: InitMode,
    pub force_clean: bool,

    pub stub_id_cache_size: usize,    // QueryContext LRU entries
    pub flush_every_updates: usize,   // 0 = flush only on demand
}

impl Config {
    pub fn with_storage_path(path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: path.into(),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./stub-index"),
            stub_compression: CompressionType::LZ4,
            initialization: InitMode::Eager,
            force_clean: false,
            stub_id_cache_size: 4096,
            flush_every_updates: 0,
        }
    }
}
