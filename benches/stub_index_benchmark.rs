use criterion::{black_box, criterion_group, criterion_main, Criterion, BenchmarkId};
use rand::Rng;
use std::sync::Arc;
use stubdex::compression::compress::CompressionType;
use stubdex::index::registration::IndexExtension;
use stubdex::stub::builder::{BuilderRegistry, StubBuilder};
use stubdex::stub::codec::StubCodec;
use stubdex::stub::element::{ElementTypeRegistry, StubElementType};
use stubdex::stub::payload::{IndexPayload, IndexSink};
use stubdex::stub::tree::{NodeId, StubTree};
use stubdex::vfs::file_system::{FileContent, InMemoryFileSystem};
use stubdex::vfs::scope::{GlobalSearchScope, Project};
use stubdex::{Config, ElementKind, ElementTypeId, FileId, FileType, StubIndex, StubIndexKey};

const FILE: ElementTypeId = ElementTypeId(0);
const CLASS: ElementTypeId = ElementTypeId(1);

fn class_key() -> StubIndexKey<String> {
    StubIndexKey::string("bench.class", 1, ElementKind("class"))
}

struct FileElement;

impl StubElementType for FileElement {
    fn id(&self) -> ElementTypeId {
        FILE
    }

    fn name(&self) -> &str {
        "bench.FILE"
    }

    fn kind(&self) -> ElementKind {
        ElementKind("file")
    }

    fn index_stub(&self, _tree: &StubTree, _node: NodeId, _sink: &mut IndexSink) {}
}

struct ClassElement(StubIndexKey<String>);

impl StubElementType for ClassElement {
    fn id(&self) -> ElementTypeId {
        CLASS
    }

    fn name(&self) -> &str {
        "bench.CLASS"
    }

    fn kind(&self) -> ElementKind {
        ElementKind("class")
    }

    fn index_stub(&self, tree: &StubTree, node: NodeId, sink: &mut IndexSink) {
        if let Some(node) = tree.node(node) {
            sink.occurrence(&self.0, node.text());
        }
    }
}

/// One class per line
struct ClassPerLine;

impl StubBuilder for ClassPerLine {
    fn name(&self) -> &str {
        "class-per-line"
    }

    fn version(&self) -> u32 {
        1
    }

    fn element_types(&self) -> Vec<ElementTypeId> {
        vec![FILE, CLASS]
    }

    fn build_stub(&self, file: &FileContent) -> Option<StubTree> {
        let mut tree = StubTree::new(FILE, "");
        for line in file.text.lines() {
            tree.add_child(tree.root(), CLASS, line.trim());
        }
        Some(tree)
    }
}

fn registries() -> (ElementTypeRegistry, BuilderRegistry) {
    let mut elements = ElementTypeRegistry::new();
    elements.register(Arc::new(FileElement)).unwrap();
    elements.register(Arc::new(ClassElement(class_key()))).unwrap();
    let mut builders = BuilderRegistry::new();
    builders.register(FileType::new("bench"), Arc::new(ClassPerLine)).unwrap();
    (elements, builders)
}

/// Helper to generate file text with `classes` random names out of 500
fn random_file(classes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..classes)
        .map(|_| format!("Class{}", rng.gen_range(0..500)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn populated_index(dir: &std::path::Path, files: u32) -> (Arc<InMemoryFileSystem>, StubIndex) {
    let vfs = Arc::new(InMemoryFileSystem::new());
    for id in 0..files {
        vfs.insert(FileId(id), FileType::new("bench"), random_file(20));
    }
    let (elements, builders) = registries();
    let keys = vec![Arc::new(class_key()) as Arc<dyn IndexExtension>];
    let index = StubIndex::open(Config::with_storage_path(dir), vfs.clone(), elements, builders, keys).unwrap();
    index.ensure_up_to_date(&Project::all("bench"), &GlobalSearchScope, None).unwrap();
    (vfs, index)
}

/// Benchmark the stub record codec per compression type
fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("stub_codec");
    let (elements, builders) = registries();
    let trees = builders.build_all(&FileContent::new(FileType::new("bench"), random_file(200))).unwrap();
    let payload = IndexPayload::extract(&trees, &elements);

    for compression in [CompressionType::None, CompressionType::LZ4, CompressionType::Zstd, CompressionType::Snappy] {
        let codec = StubCodec::new(compression);
        let record = codec.write_record(&codec.serialize(&trees, &payload)).unwrap();
        group.bench_with_input(BenchmarkId::new("round_trip", format!("{:?}", compression)), &record, |b, record| {
            b.iter(|| {
                let stub = codec.read_record(black_box(record)).unwrap();
                black_box(codec.decode_trees(&stub.tree).unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark the first catch-up of a fresh index
fn bench_initial_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_indexing");
    group.sample_size(10);

    for files in [100u32, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(files), &files, |b, &files| {
            b.iter(|| {
                let tmp = tempfile::tempdir().unwrap();
                let (_vfs, index) = populated_index(tmp.path(), files);
                index.dispose().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark incremental reindexing of one edited file
fn bench_incremental_update(c: &mut Criterion) {
    let tmp = tempfile::tempdir().unwrap();
    let (vfs, index) = populated_index(tmp.path(), 1000);
    let project = Project::all("bench");

    c.bench_function("reindex_one_file", |b| {
        let mut round = 0u32;
        b.iter(|| {
            let file = FileId(round % 1000);
            vfs.insert(file, FileType::new("bench"), random_file(20));
            index.file_changed(file);
            index.ensure_up_to_date(&project, &GlobalSearchScope, None).unwrap();
            round += 1;
        });
    });
}

/// Benchmark posting lookups and element resolution
fn bench_queries(c: &mut Criterion) {
    let tmp = tempfile::tempdir().unwrap();
    let (_vfs, index) = populated_index(tmp.path(), 1000);
    let project = Project::all("bench");
    let key = class_key();
    let mut rng = rand::thread_rng();

    c.bench_function("containing_file_ids", |b| {
        b.iter(|| {
            let name = format!("Class{}", rng.gen_range(0..500));
            let ids = index.containing_file_ids(&key, &name, &project, &GlobalSearchScope, None).unwrap();
            black_box(ids.count());
        });
    });

    let mut ctx = index.query_context();
    c.bench_function("process_elements", |b| {
        b.iter(|| {
            let name = format!("Class{}", rng.gen_range(0..500));
            let mut found = 0;
            index.process_elements(&key, &name, &project, &GlobalSearchScope, None, &mut ctx, |_| {
                found += 1;
                true
            }).unwrap();
            black_box(found);
        });
    });
}

criterion_group!(
    benches,
    bench_codec,
    bench_initial_indexing,
    bench_incremental_update,
    bench_queries
);
criterion_main!(benches);
