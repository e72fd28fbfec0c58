use crate::core::types::{ElementKind, FileId};

/// Index and file disagree. Raised per file for upstream reporting; the file
/// is queued for reindexing and the rest of the query goes on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexInconsistency {
    #[error("file {file} has no readable stub")]
    MissingStub { file: FileId },

    #[error("file {file} is listed under key {key:?} of {index} but its stub does not declare it")]
    KeyNotInStub {
        file: FileId,
        index: String,
        key: String,
    },

    #[error("ordinal {ordinal} of file {file} is past the {node_count} nodes of its stub")]
    OrdinalOutOfRange {
        file: FileId,
        ordinal: u32,
        node_count: usize,
    },

    #[error("file {file} ordinal {ordinal}: expected {expected}, found {actual} (stub from text differs from index: {text_differs})")]
    KindMismatch {
        file: FileId,
        ordinal: u32,
        expected: ElementKind,
        actual: String,
        indexed_stub: String,
        text_stub: Option<String>,
        text_differs: bool,
    },
}

impl IndexInconsistency {
    pub fn file(&self) -> FileId {
        match self {
            IndexInconsistency::MissingStub { file }
            | IndexInconsistency::KeyNotInStub { file, .. }
            | IndexInconsistency::OrdinalOutOfRange { file, .. }
            | IndexInconsistency::KindMismatch { file, .. } => *file,
        }
    }
}
