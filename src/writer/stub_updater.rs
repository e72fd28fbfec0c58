use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use parking_lot::Mutex;
use rayon::prelude::*;
use crate::core::cancel::{CancellationToken, check_cancelled};
use crate::core::error::{ErrorKind, Result};
use crate::core::types::{FileId, FileType};
use crate::index::forward::{ForwardIndex, without_up_to_date_check};
use crate::stub::builder::BuilderRegistry;
use crate::stub::element::ElementTypeRegistry;
use crate::stub::payload::IndexPayload;
use crate::stub::serialized::SerializedStub;
use crate::version::version_map::{NO_BUILDER_STAMP, VersionMap, builder_producer};
use crate::vfs::file_system::VirtualFileSystem;
use crate::vfs::scope::{Project, SearchScope};
use crate::writer::IndexUpdateSink;
use crate::writer::dirty::{DirtyFiles, DirtyKind};

/// Files built in parallel before their results are applied one by one
const BUILD_CHUNK: usize = 64;

enum Built {
    Stub { stub: SerializedStub, payload: IndexPayload },
    NoStub,
    Gone,
}

struct Prepared {
    file: FileId,
    kind: DirtyKind,
    stamp: i64,
    built: Built,
}

/// Brings the forward index, and through the sink the secondary indices, up
/// to date with the file system for the files a query is about to look at.
pub struct StubUpdater {
    forward: Arc<ForwardIndex>,
    vfs: Arc<dyn VirtualFileSystem>,
    builders: Arc<BuilderRegistry>,
    elements: Arc<ElementTypeRegistry>,
    versions: Mutex<VersionMap>,
    dirty: DirtyFiles,
    rebuild_requested: AtomicBool,
    gate: Mutex<()>,
    updates_since_flush: AtomicUsize,
    flush_every: usize,
}

impl StubUpdater {
    pub fn new(
        forward: Arc<ForwardIndex>,
        vfs: Arc<dyn VirtualFileSystem>,
        builders: Arc<BuilderRegistry>,
        elements: Arc<ElementTypeRegistry>,
        versions: VersionMap,
        flush_every: usize,
    ) -> Self {
        StubUpdater {
            forward,
            vfs,
            builders,
            elements,
            versions: Mutex::new(versions),
            dirty: DirtyFiles::new(),
            rebuild_requested: AtomicBool::new(false),
            gate: Mutex::new(()),
            updates_since_flush: AtomicUsize::new(0),
            flush_every,
        }
    }

    pub fn file_changed(&self, file: FileId) {
        self.dirty.mark_changed(file);
    }

    pub fn file_deleted(&self, file: FileId) {
        self.dirty.mark_deleted(file);
    }

    /// Reindex `file` without trusting what the indices hold for it
    pub fn file_damaged(&self, file: FileId) {
        self.dirty.mark_damaged(file);
    }

    /// Drop everything on the next catch-up and index every file again
    pub fn request_rebuild(&self, reason: &str) {
        if !self.rebuild_requested.swap(true, Ordering::AcqRel) {
            tracing::warn!(reason, "full stub index rebuild scheduled");
        }
    }

    pub fn is_rebuild_requested(&self) -> bool {
        self.rebuild_requested.load(Ordering::Acquire)
    }

    pub fn pending_files(&self) -> usize {
        self.dirty.len()
    }

    pub fn versions_trusted(&self) -> bool {
        self.versions.lock().is_trusted()
    }

    /// Stamp a file of this type is indexed with today
    pub fn current_stamp(&self, file_type: &FileType) -> Option<i64> {
        if self.builders.for_file_type(file_type).is_none() {
            return Some(NO_BUILDER_STAMP);
        }
        self.versions.lock().stamp_for(&builder_producer(file_type))
    }

    pub fn is_up_to_date(&self, file: FileId, file_type: &FileType) -> Result<bool> {
        if !self.versions_trusted() {
            return Ok(false);
        }
        let indexed = self.forward.indexed_stamp(file)?;
        Ok(indexed.is_some() && indexed == self.current_stamp(file_type))
    }

    /// Mark every file whose forward entry is missing or stale. Returns the
    /// number of files marked.
    pub fn scan_outdated(&self) -> Result<usize> {
        let mut marked = 0;
        for file in self.vfs.file_ids() {
            let Some(file_type) = self.vfs.file_type(file) else {
                continue;
            };
            if !self.is_up_to_date(file, &file_type)? {
                self.dirty.mark_changed(file);
                marked += 1;
            }
        }
        for file in self.forward.file_ids()? {
            if !self.vfs.is_valid(file) {
                self.dirty.mark_deleted(file);
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Index every pending file inside `project` and `scope`.
    ///
    /// Cancellation is checked between chunks; files not reached stay pending.
    pub fn ensure_up_to_date(
        &self,
        project: &Project,
        scope: &dyn SearchScope,
        sink: &dyn IndexUpdateSink,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let _gate = self.gate.lock();
        if self.rebuild_requested.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.rebuild(sink) {
                self.rebuild_requested.store(true, Ordering::Release);
                return Err(e);
            }
        }

        let pending = self.dirty.take_matching(|file| project.contains(file) && scope.contains(file));
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(files = pending.len(), project = %project.name, "bringing stubs up to date");

        for (done, chunk) in pending.chunks(BUILD_CHUNK).enumerate() {
            if let Err(e) = check_cancelled(cancel) {
                self.dirty.restore(&pending[done * BUILD_CHUNK..]);
                return Err(e);
            }

            let prepared: Vec<Prepared> = chunk.par_iter()
                .map(|&(file, kind)| self.prepare(file, kind))
                .collect();
            for (offset, item) in prepared.into_iter().enumerate() {
                if let Err(e) = self.apply(item, sink) {
                    self.dirty.restore(&pending[done * BUILD_CHUNK + offset..]);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn prepare(&self, file: FileId, kind: DirtyKind) -> Prepared {
        let content = match kind {
            DirtyKind::Deleted => None,
            _ if !self.vfs.is_valid(file) => None,
            _ => self.vfs.content(file),
        };
        let Some(content) = content else {
            return Prepared { file, kind, stamp: NO_BUILDER_STAMP, built: Built::Gone };
        };

        let stamp = self.current_stamp(&content.file_type).unwrap_or(NO_BUILDER_STAMP);
        let built = match self.builders.build_all(&content) {
            Some(trees) => {
                let payload = IndexPayload::extract(&trees, &self.elements);
                let stub = self.forward.codec().serialize(&trees, &payload);
                Built::Stub { stub, payload }
            }
            None => Built::NoStub,
        };
        Prepared { file, kind, stamp, built }
    }

    fn apply(&self, item: Prepared, sink: &dyn IndexUpdateSink) -> Result<()> {
        let file = item.file;
        let _guard = self.forward.write();

        let (old, old_usable) = match self.old_payload(file) {
            Ok(old) => (old, true),
            Err(e) => {
                if e.kind == ErrorKind::DuplicateEntry {
                    tracing::error!(file_id = %file, error = %e, "twin forward entries, overwriting");
                } else {
                    tracing::warn!(file_id = %file, error = %e, "old stub unreadable, dropping file from every index");
                }
                (None, false)
            }
        };

        without_up_to_date_check(|| {
            let new = match &item.built {
                Built::Stub { stub, payload } => {
                    self.forward.put(file, stub, item.stamp)?;
                    Some(payload)
                }
                Built::NoStub => {
                    self.forward.put_empty(file, item.stamp)?;
                    None
                }
                Built::Gone => {
                    self.forward.remove(file)?;
                    None
                }
            };
            if !old_usable || item.kind == DirtyKind::Damaged {
                sink.forget_file(file)?;
                sink.payload_changed(file, None, new)
            } else {
                sink.payload_changed(file, old.as_ref(), new)
            }
        })?;

        self.after_update(sink)
    }

    fn old_payload(&self, file: FileId) -> Result<Option<IndexPayload>> {
        match self.forward.get(file)? {
            Some(stub) => Ok(Some(IndexPayload::from_bytes(&stub.index_payload)?)),
            None => Ok(None),
        }
    }

    fn after_update(&self, sink: &dyn IndexUpdateSink) -> Result<()> {
        if self.flush_every == 0 {
            return Ok(());
        }
        let count = self.updates_since_flush.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.flush_every {
            self.updates_since_flush.store(0, Ordering::Release);
            self.forward.flush()?;
            sink.flush_all()?;
        }
        Ok(())
    }

    fn rebuild(&self, sink: &dyn IndexUpdateSink) -> Result<()> {
        self.clear_all(sink)?;
        self.versions.lock().mark_trusted();
        tracing::info!(files = self.dirty.len(), "stub index cleared for rebuild");
        Ok(())
    }

    /// Empty the forward and secondary indices; every file becomes pending
    pub fn clear_all(&self, sink: &dyn IndexUpdateSink) -> Result<()> {
        let _guard = self.forward.write();
        without_up_to_date_check(|| {
            self.forward.clear()?;
            sink.clear_all()
        })?;
        self.dirty.clear();
        for file in self.vfs.file_ids() {
            self.dirty.mark_changed(file);
        }
        Ok(())
    }

    pub fn flush(&self, sink: &dyn IndexUpdateSink) -> Result<()> {
        let _guard = self.forward.read();
        self.updates_since_flush.store(0, Ordering::Release);
        self.forward.flush()?;
        sink.flush_all()
    }
}
