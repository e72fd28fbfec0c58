use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use crate::compression::vbyte::{ByteReader, VByteEncoder, write_len_prefixed};
use crate::core::error::Result;
use crate::core::types::ElementKind;

/// Codec plus equality strategy for one domain key type.
///
/// Key types do not have to use the natural `Eq`/`Hash` of `K`; every map
/// and posting lookup goes through the descriptor instead.
pub trait KeyDescriptor<K>: Send + Sync {
    fn save(&self, key: &K, out: &mut Vec<u8>);
    fn read(&self, reader: &mut ByteReader<'_>) -> Result<K>;
    fn hash(&self, key: &K) -> u64;
    fn equals(&self, a: &K, b: &K) -> bool;

    /// Bytes identifying the key's equivalence class in the posting store.
    /// Keys that are `equals` must produce identical bytes.
    fn canonical_bytes(&self, key: &K) -> Vec<u8> {
        let mut out = Vec::new();
        self.save(key, &mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringKeyDescriptor;

impl KeyDescriptor<String> for StringKeyDescriptor {
    fn save(&self, key: &String, out: &mut Vec<u8>) {
        write_len_prefixed(out, key.as_bytes());
    }

    fn read(&self, reader: &mut ByteReader<'_>) -> Result<String> {
        reader.read_string()
    }

    fn hash(&self, key: &String) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn equals(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// Strings compared without regard to case; the first spelling seen is kept
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveKeyDescriptor;

impl KeyDescriptor<String> for CaseInsensitiveKeyDescriptor {
    fn save(&self, key: &String, out: &mut Vec<u8>) {
        write_len_prefixed(out, key.as_bytes());
    }

    fn read(&self, reader: &mut ByteReader<'_>) -> Result<String> {
        reader.read_string()
    }

    fn hash(&self, key: &String) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.to_lowercase().hash(&mut hasher);
        hasher.finish()
    }

    fn equals(&self, a: &String, b: &String) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }

    fn canonical_bytes(&self, key: &String) -> Vec<u8> {
        let mut out = Vec::new();
        write_len_prefixed(&mut out, key.to_lowercase().as_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntKeyDescriptor;

impl KeyDescriptor<i64> for IntKeyDescriptor {
    fn save(&self, key: &i64, out: &mut Vec<u8>) {
        VByteEncoder::encode_i64(out, *key);
    }

    fn read(&self, reader: &mut ByteReader<'_>) -> Result<i64> {
        reader.read_i64()
    }

    fn hash(&self, key: &i64) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn equals(&self, a: &i64, b: &i64) -> bool {
        a == b
    }
}

/// Identifies one secondary index: name, schema version, the element kind it
/// points at, and the domain key codec
pub struct StubIndexKey<K> {
    inner: Arc<KeyInner<K>>,
}

struct KeyInner<K> {
    name: String,
    version: u32,
    element_kind: ElementKind,
    descriptor: Arc<dyn KeyDescriptor<K>>,
}

impl<K> StubIndexKey<K> {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        element_kind: ElementKind,
        descriptor: impl KeyDescriptor<K> + 'static,
    ) -> Self {
        StubIndexKey {
            inner: Arc::new(KeyInner {
                name: name.into(),
                version,
                element_kind,
                descriptor: Arc::new(descriptor),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }

    pub fn element_kind(&self) -> ElementKind {
        self.inner.element_kind
    }

    pub fn descriptor(&self) -> &Arc<dyn KeyDescriptor<K>> {
        &self.inner.descriptor
    }

    pub fn encode_key(&self, key: &K) -> Vec<u8> {
        self.inner.descriptor.canonical_bytes(key)
    }
}

impl StubIndexKey<String> {
    pub fn string(name: impl Into<String>, version: u32, element_kind: ElementKind) -> Self {
        StubIndexKey::new(name, version, element_kind, StringKeyDescriptor)
    }
}

impl<K> Clone for StubIndexKey<K> {
    fn clone(&self) -> Self {
        StubIndexKey { inner: Arc::clone(&self.inner) }
    }
}

impl<K> fmt::Debug for StubIndexKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubIndexKey")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("element_kind", &self.inner.element_kind)
            .finish()
    }
}
