use bytes::Bytes;

/// One forward index value: encoded trees plus encoded index payload.
/// Both halves are immutable and cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedStub {
    pub tree: Bytes,
    pub index_payload: Bytes,
}

impl SerializedStub {
    pub fn new(tree: impl Into<Bytes>, index_payload: impl Into<Bytes>) -> Self {
        SerializedStub {
            tree: tree.into(),
            index_payload: index_payload.into(),
        }
    }

    pub fn tree_len(&self) -> usize {
        self.tree.len()
    }

    pub fn payload_len(&self) -> usize {
        self.index_payload.len()
    }
}
