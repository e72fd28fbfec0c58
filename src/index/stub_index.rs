use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::core::cancel::{CancellationToken, check_cancelled};
use crate::core::config::{Config, InitMode};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::StubIndexStats;
use crate::core::types::{ElementKind, FileId};
use crate::index::diff::{KeyUpdate, diff_key_maps, diff_payloads};
use crate::index::forward::{ForwardIndex, in_update_section};
use crate::index::id_iterator::IdIterator;
use crate::index::init::IndexInit;
use crate::index::key::StubIndexKey;
use crate::index::key_map::KeyMap;
use crate::index::registration::{IndexExtension, Registered, RegistrationResult};
use crate::index::secondary::{SecondaryIndex, downcast};
use crate::reader::context::QueryContext;
use crate::reader::inconsistency::IndexInconsistency;
use crate::reader::problems::ProblemFiles;
use crate::reader::resolver::{StubElement, StubResolver};
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::stub::builder::BuilderRegistry;
use crate::stub::codec::StubCodec;
use crate::stub::element::ElementTypeRegistry;
use crate::stub::id_list::StubIdList;
use crate::stub::payload::IndexPayload;
use crate::stub::serialized::SerializedStub;
use crate::version::version_map::{VersionMap, producers};
use crate::vfs::file_system::VirtualFileSystem;
use crate::vfs::scope::{GlobalSearchScope, IdFilter, Project, SearchScope};
use crate::writer::stub_updater::StubUpdater;

/// The stub index: one forward index of serialized stubs plus one secondary
/// index per registered key type, kept in agreement by the updater.
///
/// Every query first brings the forward index up to date for the files it
/// can see. Storage failures met by a query schedule a full rebuild and the
/// query answers as if nothing matched.
pub struct StubIndex {
    config: Config,
    layout: StorageLayout,
    vfs: Arc<dyn VirtualFileSystem>,
    forward: Arc<ForwardIndex>,
    updater: StubUpdater,
    resolver: StubResolver,
    init: IndexInit,
    registration_checked: AtomicBool,
    _lock: FileLock,
}

impl StubIndex {
    pub fn open(
        config: Config,
        vfs: Arc<dyn VirtualFileSystem>,
        elements: ElementTypeRegistry,
        builders: BuilderRegistry,
        keys: Vec<Arc<dyn IndexExtension>>,
    ) -> Result<Self> {
        let layout = StorageLayout::new(config.storage_path.clone())?;
        let lock = FileLock::acquire(&layout)?;
        let codec = StubCodec::new(config.stub_compression);
        let elements = Arc::new(elements);
        let builders = Arc::new(builders);

        let (forward, wiped) = match ForwardIndex::open(&layout, codec) {
            Ok(forward) => (forward, false),
            Err(e) if e.is_storage_related() => {
                tracing::warn!(path = ?layout.forward_dir, error = %e, "forward index unreadable, starting empty");
                layout.reset_forward_dir()?;
                (ForwardIndex::open(&layout, codec)?, true)
            }
            Err(e) => return Err(e),
        };
        let forward = Arc::new(forward);

        let (versions, changes) = VersionMap::load(&layout.version_map_path(), &producers(&builders, &elements))?;
        let trusted = versions.is_trusted();
        let updater = StubUpdater::new(
            Arc::clone(&forward),
            Arc::clone(&vfs),
            Arc::clone(&builders),
            Arc::clone(&elements),
            versions,
            config.flush_every_updates,
        );
        if wiped {
            updater.request_rebuild("forward index storage unreadable");
        }
        if !trusted {
            updater.request_rebuild("producer versions unreadable");
        }

        let outdated = match updater.scan_outdated() {
            Ok(count) => count,
            Err(e) if e.is_storage_related() => {
                updater.request_rebuild(&e.to_string());
                0
            }
            Err(e) => return Err(e),
        };
        tracing::info!(
            path = ?config.storage_path,
            stubs = forward.len(),
            outdated,
            producers_changed = changes.added.len() + changes.changed.len() + changes.removed.len(),
            "stub index opened"
        );

        let resolver = StubResolver::new(Arc::clone(&vfs), builders, elements, codec);
        let init = IndexInit::new(layout.clone(), keys, config.force_clean);
        let index = StubIndex {
            config,
            layout,
            vfs,
            forward,
            updater,
            resolver,
            init,
            registration_checked: AtomicBool::new(false),
            _lock: lock,
        };

        match index.config.initialization {
            InitMode::Eager => {
                index.registered()?;
            }
            InitMode::Background => index.init.start_background()?,
            InitMode::Lazy => {}
        }
        Ok(index)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// A fresh per-query context with the configured stub id cache size
    pub fn query_context(&self) -> QueryContext {
        QueryContext::new(self.config.stub_id_cache_size)
    }

    fn registered(&self) -> Result<Arc<Registered>> {
        let registered = self.init.get()?;
        // Indices that start empty next to a populated forward index never
        // see the old files again unless everything is reindexed
        if !self.registration_checked.swap(true, Ordering::AcqRel)
            && registered.result.any_initially_built()
            && !self.forward.is_empty()
        {
            self.updater.request_rebuild("secondary index created from scratch");
        }
        Ok(registered)
    }

    fn prepare(
        &self,
        project: &Project,
        scope: &dyn SearchScope,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Registered>> {
        let registered = self.registered()?;
        if !in_update_section() {
            self.updater.ensure_up_to_date(project, scope, registered.as_ref(), cancel)?;
        }
        Ok(registered)
    }

    fn recover<T>(&self, result: Result<T>, empty: impl FnOnce() -> T) -> Result<T> {
        match result {
            Err(e) if e.is_storage_related() => {
                tracing::warn!(error = %e, "stub index query hit unreadable storage");
                self.updater.request_rebuild(&e.to_string());
                Ok(empty())
            }
            other => other,
        }
    }

    fn typed<'a, K: Clone + Send + Sync + 'static>(
        registered: &'a Registered,
        key: &StubIndexKey<K>,
    ) -> Result<&'a SecondaryIndex<K>> {
        let index = registered.get(key.name()).ok_or_else(|| Error::new(
            ErrorKind::NotFound,
            format!("index {} is not registered", key.name()),
        ))?;
        downcast(index.as_ref(), key)
    }

    fn visible(
        files: impl Iterator<Item = u32>,
        project: &Project,
        scope: &dyn SearchScope,
        filter: Option<&dyn IdFilter>,
    ) -> Vec<FileId> {
        files.map(FileId)
            .filter(|&file| project.contains(file) && scope.contains(file))
            .filter(|&file| filter.is_none_or(|f| f.accepts(file)))
            .collect()
    }

    /// Files whose stub declares `value` under `key`, restricted to `project`,
    /// `scope` and `filter`
    pub fn containing_file_ids<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        value: &K,
        project: &Project,
        scope: &dyn SearchScope,
        filter: Option<&dyn IdFilter>,
    ) -> Result<IdIterator> {
        let result = self.prepare(project, scope, None).and_then(|registered| {
            let posting = Self::typed(&registered, key)?.posting(value)?;
            Ok(IdIterator::new(Self::visible(posting.iter(), project, scope, filter)))
        });
        self.recover(result, IdIterator::empty)
    }

    pub fn all_keys<K: Clone + Send + Sync + 'static>(&self, key: &StubIndexKey<K>, project: &Project) -> Result<Vec<K>> {
        let mut keys = Vec::new();
        self.process_all_keys(key, project, &GlobalSearchScope, None, |k| {
            keys.push(k.clone());
            true
        })?;
        Ok(keys)
    }

    /// Visit every key with at least one visible file until `processor`
    /// returns false; returns false in that case
    pub fn process_all_keys<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        project: &Project,
        scope: &dyn SearchScope,
        filter: Option<&dyn IdFilter>,
        mut processor: impl FnMut(&K) -> bool,
    ) -> Result<bool> {
        let result = self.prepare(project, &GlobalSearchScope, None).and_then(|registered| {
            Self::typed(&registered, key)?.process_keys(|k, files| {
                if Self::visible(files.iter(), project, scope, filter).is_empty() {
                    true
                } else {
                    processor(k)
                }
            })
        });
        self.recover(result, || true)
    }

    /// Visit the elements of the key's own kind declaring `value`
    #[allow(clippy::too_many_arguments)]
    pub fn process_elements<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        value: &K,
        project: &Project,
        scope: &dyn SearchScope,
        filter: Option<&dyn IdFilter>,
        ctx: &mut QueryContext,
        visit: impl FnMut(&StubElement) -> bool,
    ) -> Result<bool> {
        self.process_elements_with(key, value, project, scope, filter, key.element_kind(), ctx, visit)
    }

    /// Visit every element declaring `value` under `key`, checked against
    /// `required`. Returns false once `visit` asks to stop.
    ///
    /// Inconsistent files are collected in `ctx`, queued for reindexing and
    /// their postings for `value` removed when the forward lock is free.
    #[allow(clippy::too_many_arguments)]
    pub fn process_elements_with<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        value: &K,
        project: &Project,
        scope: &dyn SearchScope,
        filter: Option<&dyn IdFilter>,
        required: ElementKind,
        ctx: &mut QueryContext,
        mut visit: impl FnMut(&StubElement) -> bool,
    ) -> Result<bool> {
        let cancel = ctx.cancellation().cloned();
        let result = self.prepare(project, scope, cancel.as_ref()).and_then(|registered| {
            let index = Self::typed(&registered, key)?;
            let files = Self::visible(index.posting(value)?.iter(), project, scope, filter);
            let outcome = self.visit_files(key, value, &files, required, ctx, cancel.as_ref(), &mut visit);
            self.heal(index, value, &mut ctx.problems);
            outcome
        });
        self.recover(result, || true)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_files<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        value: &K,
        files: &[FileId],
        required: ElementKind,
        ctx: &mut QueryContext,
        cancel: Option<&CancellationToken>,
        visit: &mut dyn FnMut(&StubElement) -> bool,
    ) -> Result<bool> {
        let canonical = key.encode_key(value);
        for &file in files {
            check_cancelled(cancel)?;
            let Some((stub, generation)) = self.read_stub(file)? else {
                ctx.problems.report(IndexInconsistency::MissingStub { file });
                continue;
            };

            let ids = match ctx.cache.get(generation, key.name(), &canonical, file) {
                Some(ids) => ids,
                None => match Self::ids_in_stub(&stub, key, value) {
                    Some(ids) => {
                        ctx.cache.put(generation, key.name(), &canonical, file, ids.clone());
                        ids
                    }
                    None => {
                        ctx.problems.report(IndexInconsistency::KeyNotInStub {
                            file,
                            index: key.name().to_string(),
                            key: String::from_utf8_lossy(&canonical).into_owned(),
                        });
                        continue;
                    }
                },
            };

            if !self.resolver.process_stubs_in_file(file, Some(&stub), &ids, required, &mut ctx.problems, visit) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// One forward record with the generation it belongs to; an unreadable
    /// one counts as missing and schedules a rebuild, twin records are an
    /// error. Both are read under one read guard so ids decoded from the
    /// record are never cached under a later generation.
    fn read_stub(&self, file: FileId) -> Result<Option<(SerializedStub, u64)>> {
        let _read = (!in_update_section()).then(|| self.forward.read());
        let generation = self.forward.modification_stamp();
        match self.forward.get(file) {
            Ok(stub) => Ok(stub.map(|stub| (stub, generation))),
            Err(e) if e.is_storage_related() => {
                tracing::warn!(file_id = %file, error = %e, "forward record unreadable");
                self.updater.request_rebuild(&e.to_string());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn ids_in_stub<K>(stub: &SerializedStub, key: &StubIndexKey<K>, value: &K) -> Option<StubIdList> {
        let payload = IndexPayload::from_bytes(&stub.index_payload).ok()?;
        let keys = payload.decode(key, Some(value)).ok()?;
        keys.get(value).cloned()
    }

    /// Queue reported files for reindexing and drop the posting that led to
    /// them. The wipe is skipped when the forward lock is held, including by
    /// this thread.
    fn heal<K: Clone + Send + Sync + 'static>(&self, index: &SecondaryIndex<K>, value: &K, problems: &mut ProblemFiles) {
        let files = problems.take_pending();
        if files.is_empty() {
            return;
        }
        for &file in &files {
            if self.vfs.is_valid(file) {
                self.updater.file_damaged(file);
            } else {
                self.updater.file_deleted(file);
            }
        }

        let Some(_guard) = self.forward.try_write() else {
            tracing::debug!(index = index.key().name(), files = files.len(), "forward index busy, posting wipe skipped");
            return;
        };
        for file in files {
            if let Err(e) = index.remove(file, value) {
                tracing::warn!(index = index.key().name(), file_id = %file, error = %e, "posting wipe failed");
            }
        }
    }

    /// Apply the key difference between two key maps of `file` to one index
    pub fn update_index<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        file: FileId,
        old: &KeyMap<K, StubIdList>,
        new: &KeyMap<K, StubIdList>,
    ) -> Result<()> {
        let registered = self.registered()?;
        let index = Self::typed(&registered, key)?;
        let updates = diff_key_maps(old, new);
        let _guard = (!in_update_section()).then(|| self.forward.write());
        index.apply(file, &updates)
    }

    /// Key updates `key`'s index needs when a file's payload goes from `old`
    /// to `new`
    pub fn diff_old_new<K: Clone>(
        &self,
        key: &StubIndexKey<K>,
        old: Option<&IndexPayload>,
        new: Option<&IndexPayload>,
    ) -> Result<Vec<KeyUpdate<K>>> {
        diff_payloads(key, old, new)
    }

    pub fn file_changed(&self, file: FileId) {
        self.updater.file_changed(file);
    }

    pub fn file_deleted(&self, file: FileId) {
        self.updater.file_deleted(file);
    }

    pub fn ensure_up_to_date(
        &self,
        project: &Project,
        scope: &dyn SearchScope,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        match self.prepare(project, scope, cancel) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_storage_related() {
                    self.updater.request_rebuild(&e.to_string());
                }
                Err(e)
            }
        }
    }

    pub fn request_rebuild(&self) {
        self.updater.request_rebuild("requested");
    }

    pub fn flush(&self) -> Result<()> {
        match self.init.try_get() {
            Some(registered) => self.updater.flush(registered.as_ref()),
            None => self.forward.flush(),
        }
    }

    /// Empty every index; all files are indexed again by the next query
    pub fn clear_all_indices(&self) -> Result<()> {
        let registered = self.registered()?;
        self.updater.clear_all(registered.as_ref())
    }

    pub fn dispose(self) -> Result<()> {
        self.flush()?;
        tracing::info!(path = ?self.config.storage_path, "stub index closed");
        Ok(())
    }

    pub fn registration_result(&self) -> Result<RegistrationResult> {
        Ok(self.registered()?.result.clone())
    }

    /// Changes whenever the index behind `key` changes, once the forward
    /// index is current for `project`
    pub fn index_modification_stamp<K: Clone + Send + Sync + 'static>(
        &self,
        key: &StubIndexKey<K>,
        project: &Project,
    ) -> Result<u64> {
        let result = self.prepare(project, &GlobalSearchScope, None)
            .and_then(|registered| Ok(Self::typed(&registered, key)?.modification_stamp()));
        self.recover(result, || 0)
    }

    /// `None` after asking for a clean start, possible only while
    /// registration has not begun
    pub fn instance_or_invalidate(&self) -> Option<&Self> {
        if self.init.request_clean() {
            tracing::info!("secondary indices will be recreated at registration");
            return None;
        }
        Some(self)
    }

    /// Never waits for registration
    pub fn stats(&self) -> StubIndexStats {
        let indices = self.init.try_get()
            .map(|registered| registered.indices.values().map(|index| index.stats()).collect())
            .unwrap_or_default();
        StubIndexStats {
            forward_entries: self.forward.len(),
            generation: self.forward.modification_stamp(),
            pending_files: self.updater.pending_files(),
            rebuild_pending: self.updater.is_rebuild_requested(),
            version_map_trusted: self.updater.versions_trusted(),
            indices,
        }
    }
}
