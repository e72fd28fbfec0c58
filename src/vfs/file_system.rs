use std::collections::BTreeMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::types::{FileId, FileType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub file_type: FileType,
    pub text: Arc<str>,
}

impl FileContent {
    pub fn new(file_type: FileType, text: impl Into<Arc<str>>) -> Self {
        FileContent {
            file_type,
            text: text.into(),
        }
    }
}

/// The file id space the index reads from. Ids are owned here; the index
/// only learns about changes through `StubIndex::file_changed`/`file_deleted`.
pub trait VirtualFileSystem: Send + Sync {
    fn is_valid(&self, file: FileId) -> bool;
    fn file_type(&self, file: FileId) -> Option<FileType>;
    fn content(&self, file: FileId) -> Option<FileContent>;
    fn file_ids(&self) -> Vec<FileId>;
}

#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    files: RwLock<BTreeMap<FileId, FileContent>>,
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: FileId, file_type: FileType, text: impl Into<Arc<str>>) {
        self.files.write().insert(file, FileContent::new(file_type, text));
    }

    pub fn remove(&self, file: FileId) -> bool {
        self.files.write().remove(&file).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl VirtualFileSystem for InMemoryFileSystem {
    fn is_valid(&self, file: FileId) -> bool {
        self.files.read().contains_key(&file)
    }

    fn file_type(&self, file: FileId) -> Option<FileType> {
        self.files.read().get(&file).map(|f| f.file_type.clone())
    }

    fn content(&self, file: FileId) -> Option<FileContent> {
        self.files.read().get(&file).cloned()
    }

    fn file_ids(&self) -> Vec<FileId> {
        self.files.read().keys().copied().collect()
    }
}
