use bytes::Bytes;
use crate::compression::compress::{CompressedBlock, CompressionType};
use crate::compression::vbyte::{ByteReader, VByteEncoder, write_len_prefixed};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::ElementTypeId;
use crate::stub::payload::IndexPayload;
use crate::stub::serialized::SerializedStub;
use crate::stub::tree::StubTree;

/// Binary form of stub trees and forward index records.
///
/// Tree:   `[node count][node]*` in pre-order,
///         node = `[element type][child count][len-prefixed data]`
/// Trees:  `[tree count][tree]*`
/// Record: `[tree len: u32][tree][payload len: u32][payload]`, or with
///         compression both halves as `CompressedBlock`s
#[derive(Debug, Clone, Copy)]
pub struct StubCodec {
    compression: CompressionType,
}

impl StubCodec {
    pub fn new(compression: CompressionType) -> Self {
        StubCodec { compression }
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn encode(&self, tree: &StubTree) -> Vec<u8> {
        let mut out = Vec::new();
        Self::encode_into(tree, &mut out);
        out
    }

    pub fn encode_trees(&self, trees: &[StubTree]) -> Vec<u8> {
        let mut out = Vec::new();
        VByteEncoder::encode_u32(&mut out, trees.len() as u32);
        for tree in trees {
            Self::encode_into(tree, &mut out);
        }
        out
    }

    fn encode_into(tree: &StubTree, out: &mut Vec<u8>) {
        let spine = tree.spine();
        VByteEncoder::encode_u32(out, spine.len() as u32);
        for (_, id) in spine.iter() {
            if let Some(node) = tree.node(id) {
                VByteEncoder::encode_u32(out, node.element_type.0);
                VByteEncoder::encode_u32(out, node.children.len() as u32);
                write_len_prefixed(out, &node.data);
            }
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<StubTree> {
        let mut reader = ByteReader::new(bytes);
        let tree = Self::decode_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(Error::parse(format!("{} trailing tree bytes", reader.remaining())));
        }
        Ok(tree)
    }

    pub fn decode_trees(&self, bytes: &[u8]) -> Result<Vec<StubTree>> {
        let mut reader = ByteReader::new(bytes);
        let count = reader.read_u32()? as usize;
        if count > reader.remaining() {
            return Err(Error::parse(format!("stub claims {} trees", count)));
        }
        let mut trees = Vec::with_capacity(count);
        for _ in 0..count {
            trees.push(Self::decode_from(&mut reader)?);
        }
        if !reader.is_empty() {
            return Err(Error::parse(format!("{} trailing tree bytes", reader.remaining())));
        }
        Ok(trees)
    }

    fn decode_from(reader: &mut ByteReader<'_>) -> Result<StubTree> {
        let count = reader.read_u32()? as usize;
        // A node takes at least three bytes
        if count == 0 || count > reader.remaining() / 3 + 1 {
            return Err(Error::parse(format!("stub tree claims {} nodes", count)));
        }

        let (element_type, children, data) = Self::read_node(reader)?;
        let mut tree = StubTree::new(element_type, data);
        // (node, children still to read)
        let mut open = vec![(tree.root(), children)];
        let mut built = 1;

        while built < count {
            let Some(top) = open.last_mut() else {
                return Err(Error::parse("stub tree has nodes past its root's subtree"));
            };
            if top.1 == 0 {
                open.pop();
                continue;
            }
            top.1 -= 1;
            let parent = top.0;

            let (element_type, children, data) = Self::read_node(reader)?;
            let id = tree.add_child(parent, element_type, data);
            open.push((id, children));
            built += 1;
        }

        if open.iter().any(|&(_, pending)| pending > 0) {
            return Err(Error::parse("stub tree ends before all children were read"));
        }
        Ok(tree)
    }

    fn read_node<'a>(reader: &mut ByteReader<'a>) -> Result<(ElementTypeId, u32, &'a [u8])> {
        let element_type = ElementTypeId(reader.read_u32()?);
        let children = reader.read_u32()?;
        let data = reader.read_len_prefixed()?;
        Ok((element_type, children, data))
    }

    pub fn serialize(&self, trees: &[StubTree], payload: &IndexPayload) -> SerializedStub {
        SerializedStub::new(self.encode_trees(trees), payload.to_bytes())
    }

    pub fn write_record(&self, stub: &SerializedStub) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(stub.tree_len() + stub.payload_len() + 8);
        match self.compression {
            CompressionType::None => {
                out.extend_from_slice(&(stub.tree_len() as u32).to_le_bytes());
                out.extend_from_slice(&stub.tree);
                out.extend_from_slice(&(stub.payload_len() as u32).to_le_bytes());
                out.extend_from_slice(&stub.index_payload);
            }
            compression => {
                CompressedBlock::compress(&stub.tree, compression)?.write_to(&mut out);
                CompressedBlock::compress(&stub.index_payload, compression)?.write_to(&mut out);
            }
        }
        Ok(out)
    }

    /// A value holding a second complete record after the first is a twin
    /// entry: reported as `DuplicateEntry`, not as ordinary corruption.
    pub fn read_record(&self, bytes: &[u8]) -> Result<SerializedStub> {
        let mut reader = ByteReader::new(bytes);
        let stub = self.read_one(&mut reader)?;
        if reader.is_empty() {
            return Ok(stub);
        }

        let trailing = reader.remaining();
        if self.read_one(&mut reader).is_ok() && reader.is_empty() {
            return Err(Error::new(
                ErrorKind::DuplicateEntry,
                "forward index value holds more than one stub record".to_string(),
            ));
        }
        Err(Error::corrupted(format!("{} trailing bytes after stub record", trailing)))
    }

    fn read_one(&self, reader: &mut ByteReader<'_>) -> Result<SerializedStub> {
        match self.compression {
            CompressionType::None => {
                let tree = Self::read_fixed_block(reader)?;
                let payload = Self::read_fixed_block(reader)?;
                Ok(SerializedStub::new(Bytes::copy_from_slice(tree), Bytes::copy_from_slice(payload)))
            }
            compression => {
                let tree = CompressedBlock::read_from(reader, compression)?.decompress()?;
                let payload = CompressedBlock::read_from(reader, compression)?.decompress()?;
                Ok(SerializedStub::new(tree, payload))
            }
        }
    }

    fn read_fixed_block<'a>(reader: &mut ByteReader<'a>) -> Result<&'a [u8]> {
        let len = reader.read_bytes(4)?;
        let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        reader.read_bytes(len)
    }
}
