use std::sync::Arc;
use crate::core::types::{ElementKind, ElementTypeId, FileId};
use crate::reader::inconsistency::IndexInconsistency;
use crate::reader::problems::ProblemFiles;
use crate::stub::builder::BuilderRegistry;
use crate::stub::codec::StubCodec;
use crate::stub::element::ElementTypeRegistry;
use crate::stub::id_list::StubIdList;
use crate::stub::serialized::SerializedStub;
use crate::stub::tree::{NodeId, Spine, StubTree};
use crate::vfs::file_system::VirtualFileSystem;

/// A stub node a query resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubElement {
    pub file: FileId,
    pub ordinal: u32,
    pub element_type: ElementTypeId,
    pub kind: ElementKind,
    pub data: Vec<u8>,
}

impl StubElement {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Turns `(file, ordinals)` from a posting into live elements, checking each
/// against the kind the caller expects
pub struct StubResolver {
    vfs: Arc<dyn VirtualFileSystem>,
    builders: Arc<BuilderRegistry>,
    elements: Arc<ElementTypeRegistry>,
    codec: StubCodec,
}

impl StubResolver {
    pub fn new(
        vfs: Arc<dyn VirtualFileSystem>,
        builders: Arc<BuilderRegistry>,
        elements: Arc<ElementTypeRegistry>,
        codec: StubCodec,
    ) -> Self {
        StubResolver { vfs, builders, elements, codec }
    }

    /// Visit the elements `ids` points at in `file`.
    ///
    /// Returns false only when `visit` asked to stop. Any inconsistency is
    /// reported into `problems` and ends resolution for this file alone.
    pub fn process_stubs_in_file(
        &self,
        file: FileId,
        stub: Option<&SerializedStub>,
        ids: &StubIdList,
        required: ElementKind,
        problems: &mut ProblemFiles,
        visit: &mut dyn FnMut(&StubElement) -> bool,
    ) -> bool {
        let trees = match stub {
            Some(stub) if self.vfs.is_valid(file) => self.codec.decode_trees(&stub.tree).ok(),
            _ => None,
        };
        let Some(trees) = trees.filter(|trees| !trees.is_empty()) else {
            problems.report(IndexInconsistency::MissingStub { file });
            return true;
        };

        if ids.is_file_root() {
            let root = trees[0].root();
            return match self.check(file, 0, &trees, 0, root, required, problems) {
                Some(element) => visit(&element),
                None => true,
            };
        }

        let spines: Vec<Spine> = trees.iter().map(StubTree::spine).collect();
        for &ordinal in ids.ordinals() {
            let Some((tree, node)) = locate(&spines, ordinal) else {
                problems.report(IndexInconsistency::OrdinalOutOfRange {
                    file,
                    ordinal,
                    node_count: spines.iter().map(Spine::len).sum(),
                });
                return true;
            };
            let Some(element) = self.check(file, ordinal, &trees, tree, node, required, problems) else {
                return true;
            };
            if !visit(&element) {
                return false;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn check(
        &self,
        file: FileId,
        ordinal: u32,
        trees: &[StubTree],
        tree: usize,
        node: NodeId,
        required: ElementKind,
        problems: &mut ProblemFiles,
    ) -> Option<StubElement> {
        let stub_node = trees[tree].node(node)?;
        let kind = self.elements.kind_of(stub_node.element_type);
        if kind == Some(required) {
            return Some(StubElement {
                file,
                ordinal,
                element_type: stub_node.element_type,
                kind: required,
                data: stub_node.data.clone(),
            });
        }

        // Tell a stale index from a broken one: rebuild the stub from text
        let text_trees = self.vfs.content(file).and_then(|content| self.builders.build_all(&content));
        problems.report(IndexInconsistency::KindMismatch {
            file,
            ordinal,
            expected: required,
            actual: kind.map(|k| k.to_string()).unwrap_or_else(|| stub_node.element_type.to_string()),
            indexed_stub: dump(trees),
            text_differs: text_trees.as_deref() != Some(trees),
            text_stub: text_trees.as_deref().map(dump),
        });
        None
    }
}

/// Ordinals count through the spines in order
fn locate(spines: &[Spine], ordinal: u32) -> Option<(usize, NodeId)> {
    let mut rest = ordinal as usize;
    for (tree, spine) in spines.iter().enumerate() {
        if rest < spine.len() {
            return Some((tree, spine.node_at(rest)?));
        }
        rest -= spine.len();
    }
    None
}

fn dump(trees: &[StubTree]) -> String {
    trees.iter().map(StubTree::dump).collect::<Vec<_>>().join("---\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress::CompressionType;
    use crate::stub::payload::IndexPayload;
    use crate::testing;
    use crate::vfs::file_system::InMemoryFileSystem;

    struct Setup {
        vfs: Arc<InMemoryFileSystem>,
        resolver: StubResolver,
        codec: StubCodec,
    }

    fn setup() -> Setup {
        let vfs = Arc::new(InMemoryFileSystem::new());
        let codec = StubCodec::new(CompressionType::None);
        let resolver = StubResolver::new(
            vfs.clone(),
            Arc::new(testing::builders(1)),
            Arc::new(testing::elements()),
            codec,
        );
        Setup { vfs, resolver, codec }
    }

    fn stub_of(codec: &StubCodec, text: &str) -> SerializedStub {
        let trees = testing::build(text);
        codec.serialize(&trees, &IndexPayload::extract(&trees, &testing::elements()))
    }

    fn collect(
        setup: &Setup,
        file: FileId,
        stub: Option<&SerializedStub>,
        ids: &StubIdList,
        kind: &'static str,
        problems: &mut ProblemFiles,
    ) -> Vec<String> {
        let mut seen = Vec::new();
        setup.resolver.process_stubs_in_file(file, stub, ids, ElementKind(kind), problems, &mut |e| {
            seen.push(e.text());
            true
        });
        seen
    }

    #[test]
    fn ordinals_resolve_across_embedded_spines() {
        let s = setup();
        let text = "class A\nmethod run\n@class B\n";
        let file = testing::add_file(&s.vfs, 1, text);
        let stub = stub_of(&s.codec, text);
        let mut problems = ProblemFiles::new();

        // root=0 A=1 run=2 | root=3 B=4
        let ids = StubIdList::from_ordinals(vec![1, 4]);
        assert_eq!(collect(&s, file, Some(&stub), &ids, "class", &mut problems), vec!["A", "B"]);
        assert!(problems.is_empty());

        let root = collect(&s, file, Some(&stub), &StubIdList::FILE_ROOT, "file", &mut problems);
        assert_eq!(root, vec![""]);
    }

    #[test]
    fn visitor_can_stop_the_walk() {
        let s = setup();
        let text = "class A\nclass B\nclass C\n";
        let file = testing::add_file(&s.vfs, 1, text);
        let stub = stub_of(&s.codec, text);
        let mut visited = 0;
        let go_on = s.resolver.process_stubs_in_file(
            file, Some(&stub), &StubIdList::from_ordinals(vec![1, 2, 3]), ElementKind("class"),
            &mut ProblemFiles::new(), &mut |_| { visited += 1; visited < 2 },
        );
        assert!(!go_on);
        assert_eq!(visited, 2);
    }

    #[test]
    fn kind_mismatch_is_reported_with_both_snapshots() {
        let s = setup();
        let file = testing::add_file(&s.vfs, 7, "class A\nmethod run\n");
        let stub = stub_of(&s.codec, "class A\nmethod run\n");
        let mut problems = ProblemFiles::new();

        let seen = collect(&s, file, Some(&stub), &StubIdList::from_ordinals(vec![1, 2]), "class", &mut problems);
        assert_eq!(seen, vec!["A"]);
        match &problems.inconsistencies()[0] {
            IndexInconsistency::KindMismatch { ordinal, actual, text_differs, text_stub, .. } => {
                assert_eq!(*ordinal, 2);
                assert_eq!(actual, "method");
                assert!(!text_differs);
                assert!(text_stub.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }

        // Text moved on since indexing
        s.vfs.insert(file, testing::java(), "class Other\n");
        let mut problems = ProblemFiles::new();
        collect(&s, file, Some(&stub), &StubIdList::Single(2), "class", &mut problems);
        assert!(matches!(problems.inconsistencies()[0], IndexInconsistency::KindMismatch { text_differs: true, .. }));
    }

    #[test]
    fn missing_files_and_bad_ordinals_do_not_stop_the_query() {
        let s = setup();
        let stub = stub_of(&s.codec, "class A\n");
        let mut problems = ProblemFiles::new();

        assert!(s.resolver.process_stubs_in_file(
            FileId(9), Some(&stub), &StubIdList::Single(1), ElementKind("class"), &mut problems, &mut |_| false,
        ));
        let file = testing::add_file(&s.vfs, 10, "class A\n");
        assert!(s.resolver.process_stubs_in_file(
            file, Some(&stub), &StubIdList::Single(40), ElementKind("class"), &mut problems, &mut |_| false,
        ));
        assert!(matches!(problems.inconsistencies()[0], IndexInconsistency::MissingStub { .. }));
        assert!(matches!(problems.inconsistencies()[1], IndexInconsistency::OrdinalOutOfRange { node_count: 2, .. }));
    }
}
