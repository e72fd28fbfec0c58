use std::collections::BTreeMap;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ElementKind, ElementTypeId};
use crate::stub::payload::IndexSink;
use crate::stub::tree::{NodeId, StubTree};

/// Producer of one node type. Knows which domain keys its nodes declare.
pub trait StubElementType: Send + Sync {
    fn id(&self) -> ElementTypeId;
    fn name(&self) -> &str;
    fn kind(&self) -> ElementKind;

    /// Bumped whenever the node data layout or the keys it emits change
    fn version(&self) -> u32 {
        0
    }

    /// Report the keys `node` declares into `sink`
    fn index_stub(&self, tree: &StubTree, node: NodeId, sink: &mut IndexSink);
}

#[derive(Default, Clone)]
pub struct ElementTypeRegistry {
    by_id: BTreeMap<ElementTypeId, Arc<dyn StubElementType>>,
}

impl ElementTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, element: Arc<dyn StubElementType>) -> Result<()> {
        let id = element.id();
        if let Some(existing) = self.by_id.get(&id) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("{} already registered by {}", id, existing.name()),
            ));
        }
        self.by_id.insert(id, element);
        Ok(())
    }

    pub fn get(&self, id: ElementTypeId) -> Option<&Arc<dyn StubElementType>> {
        self.by_id.get(&id)
    }

    pub fn kind_of(&self, id: ElementTypeId) -> Option<ElementKind> {
        self.by_id.get(&id).map(|element| element.kind())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StubElementType>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
