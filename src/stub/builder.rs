use std::collections::BTreeMap;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ElementTypeId, FileType};
use crate::stub::tree::StubTree;
use crate::vfs::file_system::FileContent;

/// Turns file content into stub trees. Opaque to the index apart from its
/// name and version, which feed the version map.
pub trait StubBuilder: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> u32;

    /// Element types this builder may emit
    fn element_types(&self) -> Vec<ElementTypeId>;

    /// `None` for content that has no structure (binary, unparsable)
    fn build_stub(&self, file: &FileContent) -> Option<StubTree>;

    /// Trees for languages embedded in the file, spined after the primary tree
    fn build_embedded_stubs(&self, _file: &FileContent) -> Vec<StubTree> {
        Vec::new()
    }
}

#[derive(Default, Clone)]
pub struct BuilderRegistry {
    by_type: BTreeMap<FileType, Arc<dyn StubBuilder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file_type: FileType, builder: Arc<dyn StubBuilder>) -> Result<()> {
        if self.by_type.contains_key(&file_type) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("file type {} already has a stub builder", file_type),
            ));
        }
        self.by_type.insert(file_type, builder);
        Ok(())
    }

    pub fn for_file_type(&self, file_type: &FileType) -> Option<&Arc<dyn StubBuilder>> {
        self.by_type.get(file_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileType, &Arc<dyn StubBuilder>)> {
        self.by_type.iter()
    }

    /// Primary tree followed by embedded ones; `None` when the file has no
    /// builder or the builder produced nothing
    pub fn build_all(&self, file: &FileContent) -> Option<Vec<StubTree>> {
        let builder = self.by_type.get(&file.file_type)?;
        let primary = builder.build_stub(file)?;
        let mut trees = vec![primary];
        trees.extend(builder.build_embedded_stubs(file));
        Some(trees)
    }
}
