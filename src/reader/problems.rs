use std::collections::BTreeSet;
use crate::core::types::FileId;
use crate::reader::inconsistency::IndexInconsistency;

/// Files found inconsistent during one query, reported once each
#[derive(Debug, Default)]
pub struct ProblemFiles {
    seen: BTreeSet<FileId>,
    pending: Vec<FileId>,
    inconsistencies: Vec<IndexInconsistency>,
}

impl ProblemFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for a file already reported through this accumulator
    pub fn report(&mut self, problem: IndexInconsistency) -> bool {
        let file = problem.file();
        if !self.seen.insert(file) {
            return false;
        }
        tracing::error!(file_id = %file, error = %problem, "stub index inconsistency, file queued for reindex");
        self.pending.push(file);
        self.inconsistencies.push(problem);
        true
    }

    pub fn contains(&self, file: FileId) -> bool {
        self.seen.contains(&file)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Files reported since the last call, for healing
    pub(crate) fn take_pending(&mut self) -> Vec<FileId> {
        std::mem::take(&mut self.pending)
    }

    pub fn inconsistencies(&self) -> &[IndexInconsistency] {
        &self.inconsistencies
    }

    pub fn take_inconsistencies(&mut self) -> Vec<IndexInconsistency> {
        std::mem::take(&mut self.inconsistencies)
    }
}
