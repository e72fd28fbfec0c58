use roaring::RoaringBitmap;
use crate::core::types::FileId;

/// Which files a query may see
pub trait SearchScope: Send + Sync {
    fn contains(&self, file: FileId) -> bool;

    fn is_global(&self) -> bool {
        false
    }
}

/// Extra per-file predicate supplied by the caller
pub trait IdFilter {
    fn accepts(&self, file: FileId) -> bool;
}

impl<F: Fn(FileId) -> bool> IdFilter for F {
    fn accepts(&self, file: FileId) -> bool {
        self(file)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalSearchScope;

impl SearchScope for GlobalSearchScope {
    fn contains(&self, _file: FileId) -> bool {
        true
    }

    fn is_global(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileSetScope {
    files: RoaringBitmap,
}

impl FileSetScope {
    pub fn new(files: impl IntoIterator<Item = FileId>) -> Self {
        FileSetScope {
            files: files.into_iter().map(|f| f.value()).collect(),
        }
    }
}

impl SearchScope for FileSetScope {
    fn contains(&self, file: FileId) -> bool {
        self.files.contains(file.value())
    }
}

/// A named subset of the file system; `files: None` means every file
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    files: Option<RoaringBitmap>,
}

impl Project {
    pub fn all(name: impl Into<String>) -> Self {
        Project {
            name: name.into(),
            files: None,
        }
    }

    pub fn with_files(name: impl Into<String>, files: impl IntoIterator<Item = FileId>) -> Self {
        Project {
            name: name.into(),
            files: Some(files.into_iter().map(|f| f.value()).collect()),
        }
    }

    pub fn contains(&self, file: FileId) -> bool {
        match &self.files {
            Some(files) => files.contains(file.value()),
            None => true,
        }
    }
}
