use std::collections::BTreeMap;
use parking_lot::Mutex;
use crate::core::types::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyKind {
    Changed,
    Deleted,
    /// Reindex without trusting the old payload: every secondary index drops
    /// the file before the new keys go in
    Damaged,
}

/// Files waiting to be brought up to date, latest mark wins
#[derive(Debug, Default)]
pub struct DirtyFiles {
    files: Mutex<BTreeMap<FileId, DirtyKind>>,
}

impl DirtyFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_changed(&self, file: FileId) {
        let mut files = self.files.lock();
        // A damaged file stays damaged until it is reindexed
        let kind = match files.get(&file) {
            Some(DirtyKind::Damaged) => DirtyKind::Damaged,
            _ => DirtyKind::Changed,
        };
        files.insert(file, kind);
    }

    pub fn mark_deleted(&self, file: FileId) {
        self.files.lock().insert(file, DirtyKind::Deleted);
    }

    pub fn mark_damaged(&self, file: FileId) {
        self.files.lock().insert(file, DirtyKind::Damaged);
    }

    /// Remove and return the files `pred` selects, in id order
    pub fn take_matching(&self, mut pred: impl FnMut(FileId) -> bool) -> Vec<(FileId, DirtyKind)> {
        let mut files = self.files.lock();
        let taken: Vec<(FileId, DirtyKind)> = files.iter()
            .filter(|(file, _)| pred(**file))
            .map(|(file, kind)| (*file, *kind))
            .collect();
        for (file, _) in &taken {
            files.remove(file);
        }
        taken
    }

    /// Put back files whose processing did not happen. Marks made in the
    /// meantime are newer and stay.
    pub fn restore(&self, taken: &[(FileId, DirtyKind)]) {
        let mut files = self.files.lock();
        for (file, kind) in taken {
            files.entry(*file).or_insert(*kind);
        }
    }

    pub fn contains(&self, file: FileId) -> bool {
        self.files.lock().contains_key(&file)
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }

    pub fn clear(&self) {
        self.files.lock().clear();
    }
}
