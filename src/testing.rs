//! Unit test fixtures: a line-based "java" builder with file/class/method
//! element types and two string-keyed indices.

use std::path::Path;
use std::sync::Arc;
use crate::core::config::Config;
use crate::core::types::{ElementKind, ElementTypeId, FileId, FileType};
use crate::compression::compress::CompressionType;
use crate::index::key::StubIndexKey;
use crate::index::registration::IndexExtension;
use crate::index::stub_index::StubIndex;
use crate::stub::builder::{BuilderRegistry, StubBuilder};
use crate::stub::element::{ElementTypeRegistry, StubElementType};
use crate::stub::payload::IndexSink;
use crate::stub::tree::{NodeId, StubTree};
use crate::vfs::file_system::{FileContent, InMemoryFileSystem};

pub(crate) const FILE: ElementTypeId = ElementTypeId(0);
pub(crate) const CLASS: ElementTypeId = ElementTypeId(1);
pub(crate) const METHOD: ElementTypeId = ElementTypeId(2);

pub(crate) const CLASS_NAMES: &str = "java.class.name";
pub(crate) const METHOD_NAMES: &str = "java.method.name";

pub(crate) fn java() -> FileType {
    FileType::new("java")
}

pub(crate) fn class_names() -> StubIndexKey<String> {
    class_names_v(1)
}

pub(crate) fn class_names_v(version: u32) -> StubIndexKey<String> {
    StubIndexKey::string(CLASS_NAMES, version, ElementKind("class"))
}

pub(crate) fn method_names() -> StubIndexKey<String> {
    StubIndexKey::string(METHOD_NAMES, 1, ElementKind("method"))
}

struct FileElement;

impl StubElementType for FileElement {
    fn id(&self) -> ElementTypeId {
        FILE
    }

    fn name(&self) -> &str {
        "java.FILE"
    }

    fn kind(&self) -> ElementKind {
        ElementKind("file")
    }

    fn index_stub(&self, _tree: &StubTree, _node: NodeId, _sink: &mut IndexSink) {}
}

struct NamedElement {
    id: ElementTypeId,
    name: &'static str,
    kind: ElementKind,
    key: StubIndexKey<String>,
}

impl StubElementType for NamedElement {
    fn id(&self) -> ElementTypeId {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn index_stub(&self, tree: &StubTree, node: NodeId, sink: &mut IndexSink) {
        if let Some(node) = tree.node(node) {
            sink.occurrence(&self.key, node.text());
        }
    }
}

pub(crate) fn elements() -> ElementTypeRegistry {
    let mut registry = ElementTypeRegistry::new();
    registry.register(Arc::new(FileElement)).unwrap();
    registry.register(Arc::new(NamedElement {
        id: CLASS,
        name: "java.CLASS",
        kind: ElementKind("class"),
        key: class_names(),
    })).unwrap();
    registry.register(Arc::new(NamedElement {
        id: METHOD,
        name: "java.METHOD",
        kind: ElementKind("method"),
        key: method_names(),
    })).unwrap();
    registry
}

/// `class X` opens a class under the file root, `method m` goes under the
/// last class. Lines prefixed with `@` form one embedded tree. Text starting
/// with `binary` has no stub.
pub(crate) struct LineBuilder {
    pub version: u32,
}

impl LineBuilder {
    fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> StubTree {
        let mut tree = StubTree::new(FILE, "");
        let mut last_class = None;
        for line in lines {
            if let Some(name) = line.strip_prefix("class ") {
                last_class = Some(tree.add_child(tree.root(), CLASS, name.trim()));
            } else if let Some(name) = line.strip_prefix("method ") {
                let parent = last_class.unwrap_or(tree.root());
                tree.add_child(parent, METHOD, name.trim());
            }
        }
        tree
    }
}

impl StubBuilder for LineBuilder {
    fn name(&self) -> &str {
        "lines"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn element_types(&self) -> Vec<ElementTypeId> {
        vec![FILE, CLASS, METHOD]
    }

    fn build_stub(&self, file: &FileContent) -> Option<StubTree> {
        if file.text.starts_with("binary") {
            return None;
        }
        Some(Self::parse(file.text.lines().filter(|l| !l.starts_with('@'))))
    }

    fn build_embedded_stubs(&self, file: &FileContent) -> Vec<StubTree> {
        let embedded: Vec<&str> = file.text.lines().filter_map(|l| l.strip_prefix('@')).collect();
        if embedded.is_empty() {
            return Vec::new();
        }
        vec![Self::parse(embedded.into_iter())]
    }
}

pub(crate) fn builders(version: u32) -> BuilderRegistry {
    let mut registry = BuilderRegistry::new();
    registry.register(java(), Arc::new(LineBuilder { version })).unwrap();
    registry
}

pub(crate) fn build(text: &str) -> Vec<StubTree> {
    builders(1).build_all(&FileContent::new(java(), text)).unwrap()
}

pub(crate) fn keys(class_version: u32) -> Vec<Arc<dyn IndexExtension>> {
    vec![
        Arc::new(class_names_v(class_version)) as Arc<dyn IndexExtension>,
        Arc::new(method_names()) as Arc<dyn IndexExtension>,
    ]
}

pub(crate) fn config(dir: &Path) -> Config {
    Config {
        stub_compression: CompressionType::LZ4,
        ..Config::with_storage_path(dir)
    }
}

pub(crate) fn open_index(dir: &Path, vfs: &Arc<InMemoryFileSystem>) -> StubIndex {
    open_index_with(config(dir), vfs, 1, 1)
}

pub(crate) fn open_index_with(
    config: Config,
    vfs: &Arc<InMemoryFileSystem>,
    builder_version: u32,
    class_version: u32,
) -> StubIndex {
    StubIndex::open(
        config,
        vfs.clone(),
        elements(),
        builders(builder_version),
        keys(class_version),
    ).unwrap()
}

pub(crate) fn add_file(vfs: &InMemoryFileSystem, id: u32, text: &str) -> FileId {
    let file = FileId(id);
    vfs.insert(file, java(), text);
    file
}
