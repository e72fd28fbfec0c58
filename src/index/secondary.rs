use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use roaring::RoaringBitmap;
use crate::compression::vbyte::{ByteReader, write_len_prefixed};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::SecondaryIndexStats;
use crate::core::types::FileId;
use crate::index::diff::{KeyOp, KeyUpdate, diff_payloads};
use crate::index::key::StubIndexKey;
use crate::storage::layout::StorageLayout;
use crate::storage::persistent_map::{KeyValueStore, PersistentMap};
use crate::stub::payload::IndexPayload;

/// Posting lists of one key type: domain key -> set of file ids.
///
/// Store key is the descriptor's canonical form; the value carries the key
/// as first seen followed by the serialized bitmap. Ordinals are not stored
/// here, they come from the forward index at resolution time.
pub struct SecondaryIndex<K> {
    key: StubIndexKey<K>,
    store: PersistentMap,
    modifications: AtomicU64,
}

impl<K: Clone + Send + Sync + 'static> SecondaryIndex<K> {
    pub fn open(layout: &StorageLayout, key: StubIndexKey<K>) -> Result<Self> {
        let store = PersistentMap::open(&layout.index_dir(key.name()), "postings")?;
        Ok(SecondaryIndex {
            key,
            store,
            modifications: AtomicU64::new(0),
        })
    }

    pub fn key(&self) -> &StubIndexKey<K> {
        &self.key
    }

    fn decode_entry(&self, bytes: &[u8]) -> Result<(K, RoaringBitmap)> {
        let mut reader = ByteReader::new(bytes);
        let saved = reader.read_len_prefixed()?;
        let key = self.key.descriptor().read(&mut ByteReader::new(saved))?;
        let files = RoaringBitmap::deserialize_from(&bytes[reader.position()..])?;
        Ok((key, files))
    }

    fn encode_entry(&self, key: &K, files: &RoaringBitmap) -> Result<Vec<u8>> {
        let mut saved = Vec::new();
        self.key.descriptor().save(key, &mut saved);
        let mut out = Vec::with_capacity(saved.len() + files.serialized_size() + 5);
        write_len_prefixed(&mut out, &saved);
        files.serialize_into(&mut out)?;
        Ok(out)
    }

    fn load(&self, store_key: &[u8]) -> Result<Option<(K, RoaringBitmap)>> {
        match self.store.get(store_key)? {
            Some(bytes) => Ok(Some(self.decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn posting(&self, value: &K) -> Result<RoaringBitmap> {
        Ok(self.load(&self.key.encode_key(value))?
            .map(|(_, files)| files)
            .unwrap_or_default())
    }

    pub fn add(&self, file: FileId, value: &K) -> Result<()> {
        let store_key = self.key.encode_key(value);
        let (stored_key, mut files) = self.load(&store_key)?
            .unwrap_or_else(|| (value.clone(), RoaringBitmap::new()));
        if files.insert(file.value()) {
            self.store.put(&store_key, &self.encode_entry(&stored_key, &files)?)?;
            self.bump();
        }
        Ok(())
    }

    pub fn remove(&self, file: FileId, value: &K) -> Result<bool> {
        let store_key = self.key.encode_key(value);
        let Some((stored_key, mut files)) = self.load(&store_key)? else {
            return Ok(false);
        };
        if !files.remove(file.value()) {
            return Ok(false);
        }
        if files.is_empty() {
            self.store.remove(&store_key)?;
        } else {
            self.store.put(&store_key, &self.encode_entry(&stored_key, &files)?)?;
        }
        self.bump();
        Ok(true)
    }

    pub fn apply(&self, file: FileId, updates: &[KeyUpdate<K>]) -> Result<()> {
        for update in updates {
            match update.op {
                KeyOp::Add => self.add(file, &update.key)?,
                KeyOp::Remove => {
                    self.remove(file, &update.key)?;
                }
            }
        }
        Ok(())
    }

    /// Visit every key with its posting until `processor` returns false
    pub fn process_keys(&self, mut processor: impl FnMut(&K, &RoaringBitmap) -> bool) -> Result<bool> {
        for store_key in self.store.keys()? {
            let Some((key, files)) = self.load(&store_key)? else { continue };
            if !processor(&key, &files) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Drop `file` from every posting; used when its old keys are unknown
    pub fn remove_file(&self, file: FileId) -> Result<usize> {
        let mut touched = 0;
        for store_key in self.store.keys()? {
            let Some((key, mut files)) = self.load(&store_key)? else { continue };
            if !files.remove(file.value()) {
                continue;
            }
            if files.is_empty() {
                self.store.remove(&store_key)?;
            } else {
                self.store.put(&store_key, &self.encode_entry(&key, &files)?)?;
            }
            touched += 1;
        }
        if touched > 0 {
            self.bump();
        }
        Ok(touched)
    }

    pub fn key_count(&self) -> usize {
        self.store.len()
    }

    pub fn modification_stamp(&self) -> u64 {
        self.modifications.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.modifications.fetch_add(1, Ordering::AcqRel);
    }
}

/// Key-type-independent face of a secondary index, as held by the coordinator
pub trait ErasedIndex: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> u32;

    /// Apply the key diff between two payloads of `file`; returns the number of key updates
    fn update(&self, file: FileId, old: Option<&IndexPayload>, new: Option<&IndexPayload>) -> Result<usize>;
    fn remove_file(&self, file: FileId) -> Result<usize>;
    fn clear(&self) -> Result<()>;
    fn flush(&self) -> Result<()>;
    fn stats(&self) -> SecondaryIndexStats;
    fn as_any(&self) -> &dyn Any;
}

impl<K: Clone + Send + Sync + 'static> ErasedIndex for SecondaryIndex<K> {
    fn name(&self) -> &str {
        self.key.name()
    }

    fn version(&self) -> u32 {
        self.key.version()
    }

    fn update(&self, file: FileId, old: Option<&IndexPayload>, new: Option<&IndexPayload>) -> Result<usize> {
        let updates = diff_payloads(&self.key, old, new)?;
        self.apply(file, &updates)?;
        Ok(updates.len())
    }

    fn remove_file(&self, file: FileId) -> Result<usize> {
        SecondaryIndex::remove_file(self, file)
    }

    fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.bump();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    fn stats(&self) -> SecondaryIndexStats {
        SecondaryIndexStats {
            name: self.key.name().to_string(),
            version: self.key.version(),
            key_count: self.key_count(),
            modification_stamp: self.modification_stamp(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Recover the typed index behind an erased one
pub fn downcast<'a, K: Clone + Send + Sync + 'static>(
    index: &'a dyn ErasedIndex,
    key: &StubIndexKey<K>,
) -> Result<&'a SecondaryIndex<K>> {
    index.as_any()
        .downcast_ref::<SecondaryIndex<K>>()
        .ok_or_else(|| Error::new(
            ErrorKind::InvalidArgument,
            format!("index {} is registered with another key type", key.name()),
        ))
}
