use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::index::key::StubIndexKey;
use crate::index::secondary::{ErasedIndex, SecondaryIndex};
use crate::storage::layout::StorageLayout;
use crate::storage::version_file::VersionFile;
use crate::core::types::FileId;
use crate::stub::payload::IndexPayload;
use crate::writer::IndexUpdateSink;

/// A key type the process wants served; opens its secondary index
pub trait IndexExtension: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> u32;
    fn open(&self, layout: &StorageLayout) -> Result<Arc<dyn ErasedIndex>>;
}

impl<K: Clone + Send + Sync + 'static> IndexExtension for StubIndexKey<K> {
    fn name(&self) -> &str {
        StubIndexKey::name(self)
    }

    fn version(&self) -> u32 {
        StubIndexKey::version(self)
    }

    fn open(&self, layout: &StorageLayout) -> Result<Arc<dyn ErasedIndex>> {
        Ok(Arc::new(SecondaryIndex::open(layout, self.clone())?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// On-disk data matches the declared version and was kept
    UpToDate,
    /// Data was wiped (version change, forced clean, unreadable); starts empty
    InitiallyBuilt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationResult {
    pub statuses: BTreeMap<String, IndexStatus>,
    /// On-disk indices nobody registers any more, deleted
    pub dropped: Vec<String>,
}

impl RegistrationResult {
    pub fn status(&self, name: &str) -> Option<IndexStatus> {
        self.statuses.get(name).copied()
    }

    pub fn any_initially_built(&self) -> bool {
        self.statuses.values().any(|s| *s == IndexStatus::InitiallyBuilt)
    }
}

pub struct Registered {
    pub indices: BTreeMap<String, Arc<dyn ErasedIndex>>,
    pub result: RegistrationResult,
}

impl Registered {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ErasedIndex>> {
        self.indices.get(name)
    }
}

impl IndexUpdateSink for Registered {
    fn payload_changed(&self, file: FileId, old: Option<&IndexPayload>, new: Option<&IndexPayload>) -> Result<()> {
        for index in self.indices.values() {
            match index.update(file, old, new) {
                Ok(_) => {}
                // Old keys undecodable: drop the file and add the new keys
                Err(e) if e.is_storage_related() && old.is_some() => {
                    tracing::warn!(index = index.name(), file_id = %file, error = %e, "old keys unreadable, replacing file entries");
                    index.remove_file(file)?;
                    index.update(file, None, new)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn forget_file(&self, file: FileId) -> Result<()> {
        for index in self.indices.values() {
            index.remove_file(file)?;
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        for index in self.indices.values() {
            index.clear()?;
        }
        Ok(())
    }

    fn flush_all(&self) -> Result<()> {
        for index in self.indices.values() {
            index.flush()?;
        }
        Ok(())
    }
}

/// Version-check, open and garbage-collect every secondary index.
///
/// Registering an unchanged set again writes nothing.
pub fn register(
    layout: &StorageLayout,
    extensions: &[Arc<dyn IndexExtension>],
    force_clean: bool,
) -> Result<Registered> {
    let mut indices = BTreeMap::new();
    let mut statuses = BTreeMap::new();
    let mut dirs: BTreeMap<PathBuf, String> = BTreeMap::new();

    for extension in extensions {
        let name = extension.name().to_string();
        if indices.contains_key(&name) {
            return Err(Error::new(ErrorKind::InvalidArgument, format!("index {} registered twice", name)));
        }
        let dir = layout.index_dir(&name);
        if dir == layout.registered_indices_path() {
            return Err(Error::new(ErrorKind::InvalidArgument, format!("index name {} is reserved", name)));
        }
        if let Some(other) = dirs.insert(dir.clone(), name.clone()) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("indices {} and {} would share directory {:?}", other, name, dir),
            ));
        }

        let version_file = VersionFile::new(layout.index_version_path(&name));
        let mut status = IndexStatus::UpToDate;
        if force_clean || version_file.differs(extension.version()) {
            reset_index_dir(layout, &name, &version_file, extension.version())?;
            status = IndexStatus::InitiallyBuilt;
        }

        let index = match extension.open(layout) {
            Ok(index) => index,
            Err(e) if e.is_storage_related() => {
                tracing::warn!(index = %name, error = %e, "index storage unreadable, recreating");
                reset_index_dir(layout, &name, &version_file, extension.version())?;
                status = IndexStatus::InitiallyBuilt;
                extension.open(layout)?
            }
            Err(e) => return Err(e),
        };

        match status {
            IndexStatus::UpToDate => tracing::debug!(index = %name, version = extension.version(), "index up to date"),
            IndexStatus::InitiallyBuilt => tracing::info!(index = %name, version = extension.version(), "index will be built from scratch"),
        }
        statuses.insert(name.clone(), status);
        indices.insert(name, index);
    }

    let dropped = drop_orphans(layout, &indices)?;
    Ok(Registered {
        indices,
        result: RegistrationResult { statuses, dropped },
    })
}

fn reset_index_dir(layout: &StorageLayout, name: &str, version_file: &VersionFile, version: u32) -> Result<()> {
    layout.delete_index_dir(name)?;
    version_file.rewrite(version)?;
    Ok(())
}

/// Delete indices listed by the previous run but not registered by this one,
/// then record the current list if it differs
fn drop_orphans(layout: &StorageLayout, indices: &BTreeMap<String, Arc<dyn ErasedIndex>>) -> Result<Vec<String>> {
    let path = layout.registered_indices_path();
    let previous: BTreeSet<String> = if path.exists() {
        let data = fs::read(&path)?;
        serde_json::from_slice(&data).map_err(|e| Error::new(
            ErrorKind::InitializationFailed,
            format!("registered index list {:?} unreadable: {}", path, e),
        ))?
    } else {
        BTreeSet::new()
    };
    let current: BTreeSet<String> = indices.keys().cloned().collect();
    let live: BTreeSet<PathBuf> = current.iter().map(|name| layout.index_dir(name)).collect();

    let mut dropped = Vec::new();
    for orphan in previous.difference(&current) {
        // A list written under an older directory naming can name a live dir
        if live.contains(&layout.index_dir(orphan)) {
            tracing::warn!(index = %orphan, "orphaned index shares a live directory, kept");
            continue;
        }
        tracing::info!(index = %orphan, "dropping index no longer registered");
        layout.delete_index_dir(orphan)?;
        dropped.push(orphan.clone());
    }

    if previous != current || !path.exists() {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&current)?)?;
        fs::rename(&tmp, &path)?;
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::SystemTime;
    use crate::testing;

    fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>, SystemTime)> {
        let mut files = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let modified = fs::metadata(&path).unwrap().modified().unwrap();
                    files.push((path.display().to_string(), fs::read(&path).unwrap(), modified));
                }
            }
        }
        files.sort();
        files
    }

    #[test]
    fn unchanged_registration_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();

        let first = register(&layout, &testing::keys(1), false).unwrap();
        assert!(first.result.statuses.values().all(|s| *s == IndexStatus::InitiallyBuilt));
        drop(first);

        let second = register(&layout, &testing::keys(1), false).unwrap();
        assert!(second.result.statuses.values().all(|s| *s == IndexStatus::UpToDate));
        drop(second);
        let before = snapshot(tmp.path());

        let third = register(&layout, &testing::keys(1), false).unwrap();
        assert!(third.result.statuses.values().all(|s| *s == IndexStatus::UpToDate));
        assert!(!third.result.any_initially_built());
        drop(third);
        assert_eq!(snapshot(tmp.path()), before);
    }

    #[test]
    fn version_change_wipes_only_that_index() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        {
            let registered = register(&layout, &testing::keys(1), false).unwrap();
            let classes = registered.get(testing::CLASS_NAMES).unwrap();
            let typed = crate::index::secondary::downcast(classes.as_ref(), &testing::class_names()).unwrap();
            typed.add(crate::core::types::FileId(1), &"Foo".to_string()).unwrap();
            classes.flush().unwrap();
        }

        let registered = register(&layout, &testing::keys(2), false).unwrap();
        assert_eq!(registered.result.status(testing::CLASS_NAMES), Some(IndexStatus::InitiallyBuilt));
        assert_eq!(registered.result.status(testing::METHOD_NAMES), Some(IndexStatus::UpToDate));
        assert_eq!(registered.get(testing::CLASS_NAMES).unwrap().stats().key_count, 0);
        drop(registered);

        let forced = register(&layout, &testing::keys(2), true).unwrap();
        assert!(forced.result.statuses.values().all(|s| *s == IndexStatus::InitiallyBuilt));
    }

    #[test]
    fn orphans_are_dropped_and_unreadable_stores_recreated() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        drop(register(&layout, &testing::keys(1), false).unwrap());
        assert!(layout.index_dir(testing::METHOD_NAMES).exists());

        let only_classes: Vec<Arc<dyn IndexExtension>> = vec![Arc::new(testing::class_names()) as Arc<dyn IndexExtension>];
        fs::write(layout.index_dir(testing::CLASS_NAMES).join("postings.log"), b"junk").unwrap();

        let registered = register(&layout, &only_classes, false).unwrap();
        assert_eq!(registered.result.dropped, vec![testing::METHOD_NAMES.to_string()]);
        assert!(!layout.index_dir(testing::METHOD_NAMES).exists());
        assert_eq!(registered.result.status(testing::CLASS_NAMES), Some(IndexStatus::InitiallyBuilt));

        let listed: BTreeSet<String> = serde_json::from_slice(&fs::read(layout.registered_indices_path()).unwrap()).unwrap();
        assert_eq!(listed.into_iter().collect::<Vec<_>>(), vec![testing::CLASS_NAMES.to_string()]);
    }

    #[test]
    fn corrupt_registry_file_is_an_initialization_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        fs::write(layout.registered_indices_path(), b"{not json").unwrap();
        let err = register(&layout, &testing::keys(1), false).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InitializationFailed);
    }

    fn string_keys(names: &[&str]) -> Vec<Arc<dyn IndexExtension>> {
        names
            .iter()
            .map(|name| Arc::new(StubIndexKey::string(*name, 1, crate::core::types::ElementKind("class"))) as Arc<dyn IndexExtension>)
            .collect()
    }

    #[test]
    fn similar_names_keep_separate_postings() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let registered = register(&layout, &string_keys(&["java/class", "java_class"]), false).unwrap();
        assert_ne!(layout.index_dir("java/class"), layout.index_dir("java_class"));

        let slash_key = StubIndexKey::string("java/class", 1, crate::core::types::ElementKind("class"));
        let underscore_key = StubIndexKey::string("java_class", 1, crate::core::types::ElementKind("class"));
        let slash = crate::index::secondary::downcast(registered.get("java/class").unwrap().as_ref(), &slash_key).unwrap();
        let underscore = crate::index::secondary::downcast(registered.get("java_class").unwrap().as_ref(), &underscore_key).unwrap();

        slash.add(FileId(7), &"Foo".to_string()).unwrap();
        registered.flush_all().unwrap();
        assert_eq!(slash.posting(&"Foo".to_string()).unwrap().iter().collect::<Vec<_>>(), vec![7]);
        assert!(underscore.posting(&"Foo".to_string()).unwrap().is_empty());
        assert_eq!(underscore.key_count(), 0);
    }

    #[test]
    fn orphan_gc_spares_live_index_with_similar_name() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        drop(register(&layout, &string_keys(&["x/y"]), false).unwrap());

        let registered = register(&layout, &string_keys(&["x_y"]), false).unwrap();
        assert_eq!(registered.result.dropped, vec!["x/y".to_string()]);
        assert!(!layout.index_dir("x/y").exists());
        assert!(layout.index_dir("x_y").exists());
        assert!(layout.index_version_path("x_y").exists());

        let key = StubIndexKey::string("x_y", 1, crate::core::types::ElementKind("class"));
        let live = crate::index::secondary::downcast(registered.get("x_y").unwrap().as_ref(), &key).unwrap();
        live.add(FileId(1), &"Bar".to_string()).unwrap();
        registered.flush_all().unwrap();
        registered.clear_all().unwrap();
    }

    #[test]
    fn name_colliding_with_the_registry_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let err = register(&layout, &string_keys(&["registered.json"]), false).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let err = register(&layout, &string_keys(&["dup", "dup"]), false).err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
