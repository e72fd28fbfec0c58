use std::any::Any;
use std::collections::BTreeMap;
use bytes::Bytes;
use crate::compression::vbyte::{ByteReader, VByteEncoder, write_len_prefixed};
use crate::core::error::{Error, Result};
use crate::index::key::StubIndexKey;
use crate::index::key_map::KeyMap;
use crate::stub::element::ElementTypeRegistry;
use crate::stub::id_list::StubIdList;
use crate::stub::tree::StubTree;

/// Keys one file declares, per secondary index.
///
/// Each index's block stays encoded until someone asks for it, so a query
/// against one index never pays for decoding the others.
///
/// Payload: `[block count][name, len-prefixed block]*`
/// Block:   `[key count][descriptor-encoded key, StubIdList]*`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPayload {
    blocks: BTreeMap<String, Bytes>,
}

impl IndexPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk every spine in order and let each node's element type report its keys.
    /// Ordinals keep counting across trees.
    pub fn extract(trees: &[StubTree], elements: &ElementTypeRegistry) -> Self {
        let mut sink = IndexSink::new();
        let mut base = 0u32;
        for tree in trees {
            let spine = tree.spine();
            for (ordinal, id) in spine.iter() {
                let Some(node) = tree.node(id) else { continue };
                match elements.get(node.element_type) {
                    Some(element) => {
                        sink.at(base.saturating_add(ordinal as u32));
                        element.index_stub(tree, id, &mut sink);
                    }
                    None => {
                        tracing::debug!(element_type = %node.element_type, "no element type registered, node not indexed");
                    }
                }
            }
            base = base.saturating_add(spine.len() as u32);
        }
        sink.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, name: &str) -> Option<&Bytes> {
        self.blocks.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        VByteEncoder::encode_u32(&mut out, self.blocks.len() as u32);
        for (name, block) in &self.blocks {
            write_len_prefixed(&mut out, name.as_bytes());
            write_len_prefixed(&mut out, block);
        }
        out
    }

    /// Splits the payload into per-index blocks without decoding them
    pub fn from_bytes(bytes: &Bytes) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let count = reader.read_u32()? as usize;
        if count > reader.remaining() {
            return Err(Error::parse(format!("payload claims {} blocks", count)));
        }

        let mut blocks = BTreeMap::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            let len = reader.read_len_prefixed()?.len();
            let end = reader.position();
            blocks.insert(name, bytes.slice(end - len..end));
        }
        if !reader.is_empty() {
            return Err(Error::parse(format!("{} trailing payload bytes", reader.remaining())));
        }
        Ok(IndexPayload { blocks })
    }

    /// Decode the block of `key`. With `requested`, decoding stops at the first
    /// key equal to it under the key's descriptor and the result holds at most
    /// that one entry.
    pub fn decode<K>(&self, key: &StubIndexKey<K>, requested: Option<&K>) -> Result<KeyMap<K, StubIdList>> {
        let descriptor = key.descriptor();
        let mut map = KeyMap::new(descriptor.clone());
        let Some(block) = self.blocks.get(key.name()) else {
            return Ok(map);
        };

        let mut reader = ByteReader::new(block);
        let count = reader.read_u32()? as usize;
        if count > reader.remaining() {
            return Err(Error::parse(format!("block {} claims {} keys", key.name(), count)));
        }
        for _ in 0..count {
            let domain_key = descriptor.read(&mut reader)?;
            let ids = StubIdList::read(&mut reader)?;
            match requested {
                Some(wanted) if descriptor.equals(&domain_key, wanted) => {
                    map.insert(domain_key, ids);
                    return Ok(map);
                }
                Some(_) => {}
                None => {
                    map.insert(domain_key, ids);
                }
            }
        }
        Ok(map)
    }
}

trait PendingBlock {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn encode(&self) -> Vec<u8>;
}

struct TypedBlock<K> {
    key: StubIndexKey<K>,
    entries: KeyMap<K, Vec<u32>>,
}

impl<K: 'static> PendingBlock for TypedBlock<K> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    // Sorted by encoded key so equal payloads encode to equal bytes
    fn encode(&self) -> Vec<u8> {
        let descriptor = self.key.descriptor();
        let mut rows: Vec<(Vec<u8>, StubIdList)> = self.entries.iter()
            .map(|(key, ordinals)| {
                let mut saved = Vec::new();
                descriptor.save(key, &mut saved);
                (saved, StubIdList::from_ordinals(ordinals.clone()))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::new();
        VByteEncoder::encode_u32(&mut out, rows.len() as u32);
        for (saved, ids) in rows {
            out.extend_from_slice(&saved);
            ids.write(&mut out);
        }
        out
    }
}

/// Collects `(index, key) -> ordinals` while a stub is walked
pub struct IndexSink {
    ordinal: u32,
    blocks: BTreeMap<String, Box<dyn PendingBlock>>,
}

impl IndexSink {
    pub(crate) fn new() -> Self {
        IndexSink {
            ordinal: 0,
            blocks: BTreeMap::new(),
        }
    }

    pub(crate) fn at(&mut self, ordinal: u32) {
        self.ordinal = ordinal;
    }

    /// Ordinal of the node currently being indexed
    pub fn current_ordinal(&self) -> u32 {
        self.ordinal
    }

    /// The current node declares `value` in the index `key`
    pub fn occurrence<K: 'static>(&mut self, key: &StubIndexKey<K>, value: K) {
        let ordinal = self.ordinal;
        if ordinal > StubIdList::MAX_ORDINAL {
            tracing::warn!(index = key.name(), ordinal, "stub too large to index past this node, occurrence dropped");
            return;
        }
        let block = self.blocks
            .entry(key.name().to_string())
            .or_insert_with(|| Box::new(TypedBlock {
                key: key.clone(),
                entries: KeyMap::new(key.descriptor().clone()),
            }));

        match block.as_any_mut().downcast_mut::<TypedBlock<K>>() {
            Some(typed) => {
                let ordinals = typed.entries.get_or_insert_with(value, Vec::new);
                if ordinals.last() != Some(&ordinal) {
                    ordinals.push(ordinal);
                }
            }
            None => {
                tracing::warn!(index = key.name(), "index name reused with another key type, occurrence dropped");
            }
        }
    }

    pub(crate) fn finish(self) -> IndexPayload {
        let blocks = self.blocks.into_iter()
            .map(|(name, block)| (name, Bytes::from(block.encode())))
            .collect();
        IndexPayload { blocks }
    }
}
