use std::iter::FusedIterator;
use std::vec;
use crate::core::types::FileId;

/// Forward-only, finite iterator over the file ids of one posting, in
/// ascending order. Running the query again restarts it.
#[derive(Debug, Clone)]
pub struct IdIterator {
    ids: vec::IntoIter<FileId>,
}

impl IdIterator {
    pub fn new(ids: Vec<FileId>) -> Self {
        IdIterator { ids: ids.into_iter() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for IdIterator {
    type Item = FileId;

    fn next(&mut self) -> Option<FileId> {
        self.ids.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for IdIterator {}

impl FusedIterator for IdIterator {}
