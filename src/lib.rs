pub mod core;
pub mod compression;
pub mod storage;
pub mod stub;
pub mod version;
pub mod vfs;
pub mod index;
pub mod reader;
pub mod writer;

#[cfg(test)]
mod testing;

pub use crate::core::config::{Config, InitMode};
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{ElementKind, ElementTypeId, FileId, FileType};
pub use crate::index::key::StubIndexKey;
pub use crate::index::stub_index::StubIndex;
pub use crate::reader::context::QueryContext;
pub use crate::reader::resolver::StubElement;

/*
┌──────────────────────────────────── STUBDEX STRUCTURE ──────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                               struct StubIndex                                      │    │
│  │ config: Config                     // Storage path, compression, init mode          │    │
│  │ vfs: Arc<dyn VirtualFileSystem>    // File ids, types and text (not owned)          │    │
│  │ forward: Arc<ForwardIndex>         // file id -> SerializedStub + producer stamp    │    │
│  │ updater: StubUpdater               // Dirty files -> forward + secondary indices    │    │
│  │ resolver: StubResolver             // (file, ordinals) -> StubElement               │    │
│  │ init: IndexInit                    // Registration: eager / background / lazy       │    │
│  │ _lock: FileLock                    // One process per storage dir                  │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                              │
│  ┌────────────────────────┐  ┌──────────────────────────┐  ┌──────────────────────────┐    │
│  │ struct ForwardIndex    │  │ struct SecondaryIndex<K> │  │ struct VersionMap        │    │
│  │ • records: stubs.map   │  │ • key: StubIndexKey<K>   │  │ • producer -> (fp, stamp)│    │
│  │ • stamps: stamps.map   │  │ • store: postings.map    │  │ • stamps count down      │    │
│  │ • lock: RwLock<()>     │  │   canonical key ->       │  │ • trusted: bool          │    │
│  │ • modifications: u64   │  │   (key, RoaringBitmap)   │  └──────────────────────────┘    │
│  └────────────────────────┘  └──────────────────────────┘                                  │
│                                                                                              │
│  ┌────────────────────────┐  ┌──────────────────────────┐  ┌──────────────────────────┐    │
│  │ struct SerializedStub  │  │ struct IndexPayload      │  │ enum StubIdList          │    │
│  │ • tree: Bytes          │  │ • blocks: index name ->  │  │ • Empty  (i32::MAX)      │    │
│  │ • index_payload: Bytes │  │   [key, StubIdList]*     │  │ • Single (ordinal)       │    │
│  └────────────────────────┘  └──────────────────────────┘  │ • Many   (-n, ordinals)  │    │
│                                                             └──────────────────────────┘    │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── RELATIONSHIPS ────────────────────────────────────────────┐
│                                                                                              │
│  StubIndex ──query──> StubUpdater.ensure_up_to_date ──builds──> StubTree (rayon)            │
│     │                       │                                                               │
│     │                       └──under forward write lock──> ForwardIndex.put                 │
│     │                                                   └──> Registered (IndexUpdateSink)   │
│     │                                                          └──diff──> SecondaryIndex    │
│     │                                                                                       │
│     ├──posting──> SecondaryIndex ──file ids──> IdIterator                                  │
│     │                                                                                       │
│     └──elements──> ForwardIndex.get ──payload──> StubIdList ──> StubResolver               │
│                                                                  └──problems──> heal        │
│                                                                                              │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/
