use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use crate::core::error::{Error, Result};
use crate::core::types::FileId;
use crate::storage::layout::StorageLayout;
use crate::storage::persistent_map::{KeyValueStore, PersistentMap};
use crate::stub::codec::StubCodec;
use crate::stub::serialized::SerializedStub;

thread_local! {
    static UPDATE_SECTION_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Run `f` with the "bring the forward index up to date first" step of
/// queries switched off on this thread. Used inside sections that already
/// hold the forward write lock.
pub fn without_up_to_date_check<R>(f: impl FnOnce() -> R) -> R {
    struct Exit;
    impl Drop for Exit {
        fn drop(&mut self) {
            UPDATE_SECTION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        }
    }

    UPDATE_SECTION_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let _exit = Exit;
    f()
}

pub fn in_update_section() -> bool {
    UPDATE_SECTION_DEPTH.with(|depth| depth.get() > 0)
}

/// file id -> serialized stub, the only authoritative store.
///
/// Next to the records it keeps the producer stamp each file was indexed
/// with. The `RwLock<()>` does not protect the maps themselves (they lock
/// internally); it orders multi-store updates: whoever changes a record and
/// the secondary indices derived from it holds it exclusively.
pub struct ForwardIndex {
    records: PersistentMap,
    stamps: PersistentMap,
    codec: StubCodec,
    lock: RwLock<()>,
    modifications: AtomicU64,
}

impl ForwardIndex {
    pub fn open(layout: &StorageLayout, codec: StubCodec) -> Result<Self> {
        Ok(ForwardIndex {
            records: PersistentMap::open(&layout.forward_dir, "stubs")?,
            stamps: PersistentMap::open(&layout.forward_dir, "stamps")?,
            codec,
            lock: RwLock::new(()),
            modifications: AtomicU64::new(0),
        })
    }

    pub fn codec(&self) -> &StubCodec {
        &self.codec
    }

    pub fn get(&self, file: FileId) -> Result<Option<SerializedStub>> {
        match self.records.get(&file.to_key())? {
            Some(bytes) => Ok(Some(self.codec.read_record(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, file: FileId, stub: &SerializedStub, stamp: i64) -> Result<()> {
        let record = self.codec.write_record(stub)?;
        self.records.put(&file.to_key(), &record)?;
        self.stamps.put(&file.to_key(), &stamp.to_le_bytes())?;
        self.bump();
        Ok(())
    }

    /// Indexed, but the file has no stub
    pub fn put_empty(&self, file: FileId, stamp: i64) -> Result<()> {
        self.records.remove(&file.to_key())?;
        self.stamps.put(&file.to_key(), &stamp.to_le_bytes())?;
        self.bump();
        Ok(())
    }

    pub fn remove(&self, file: FileId) -> Result<bool> {
        let had_record = self.records.remove(&file.to_key())?;
        let had_stamp = self.stamps.remove(&file.to_key())?;
        if had_record || had_stamp {
            self.bump();
        }
        Ok(had_record)
    }

    /// Producer stamp the file was last indexed with
    pub fn indexed_stamp(&self, file: FileId) -> Result<Option<i64>> {
        match self.stamps.get(&file.to_key())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into()
                    .map_err(|_| Error::corrupted(format!("stamp of {} has {} bytes", file, bytes.len())))?;
                Ok(Some(i64::from_le_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Increases on every successful change; query caches key on it
    pub fn modification_stamp(&self) -> u64 {
        self.modifications.load(Ordering::Acquire)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }

    /// Never blocks: `None` when anyone, including this thread, holds the lock
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        self.lock.try_write()
    }

    pub fn clear(&self) -> Result<()> {
        self.records.clear()?;
        self.stamps.clear()?;
        self.bump();
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.stamps.flush()
    }

    /// Every file with a record or a stamp
    pub fn file_ids(&self) -> Result<Vec<FileId>> {
        let mut ids: Vec<FileId> = self.stamps.keys()?
            .iter()
            .chain(self.records.keys()?.iter())
            .filter_map(|key| FileId::from_key(key))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn bump(&self) {
        self.modifications.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::compress::CompressionType;
    use crate::stub::payload::IndexPayload;
    use crate::testing;

    fn stub(codec: &StubCodec, text: &str) -> SerializedStub {
        let trees = testing::build(text);
        codec.serialize(&trees, &IndexPayload::extract(&trees, &testing::elements()))
    }

    #[test]
    fn records_and_stamps_persist_and_bump_the_counter() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let codec = StubCodec::new(CompressionType::Snappy);
        let foo = stub(&codec, "class Foo\n");
        {
            let forward = ForwardIndex::open(&layout, codec).unwrap();
            assert_eq!(forward.modification_stamp(), 0);
            forward.put(FileId(42), &foo, -7).unwrap();
            forward.put_empty(FileId(43), -7).unwrap();
            assert_eq!(forward.modification_stamp(), 2);
            forward.flush().unwrap();
        }

        let forward = ForwardIndex::open(&layout, codec).unwrap();
        assert_eq!(forward.get(FileId(42)).unwrap(), Some(foo));
        assert_eq!(forward.get(FileId(43)).unwrap(), None);
        assert_eq!(forward.indexed_stamp(FileId(43)).unwrap(), Some(-7));
        assert_eq!(forward.file_ids().unwrap(), vec![FileId(42), FileId(43)]);
        assert_eq!(forward.len(), 1);

        assert!(forward.remove(FileId(42)).unwrap());
        assert_eq!(forward.indexed_stamp(FileId(42)).unwrap(), None);
        assert_eq!(forward.modification_stamp(), 1);
    }

    #[test]
    fn update_section_flag_nests_and_unwinds() {
        assert!(!in_update_section());
        without_up_to_date_check(|| {
            assert!(in_update_section());
            without_up_to_date_check(|| assert!(in_update_section()));
            assert!(in_update_section());
        });
        assert!(!in_update_section());
    }

    #[test]
    fn try_write_refuses_instead_of_deadlocking() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().to_path_buf()).unwrap();
        let forward = ForwardIndex::open(&layout, StubCodec::new(CompressionType::None)).unwrap();

        let held = forward.write();
        assert!(forward.try_write().is_none());
        drop(held);
        assert!(forward.try_write().is_some());
    }
}
