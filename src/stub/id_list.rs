use crate::compression::vbyte::{ByteReader, VByteEncoder};
use crate::core::error::{Error, Result};

// Written in place of a count for the empty list
const EMPTY_MARKER: i32 = i32::MAX;

/// Sorted ordinals into one file's stub spine(s) for one domain key.
///
/// Wire form (zigzag vbyte ints):
/// - empty: `EMPTY_MARKER`
/// - one ordinal: the ordinal itself, no length
/// - N >= 2: `-N` followed by N ordinals
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StubIdList {
    Empty,
    Single(u32),
    Many(Box<[u32]>),
}

impl StubIdList {
    /// The whole file: root of the first tree
    pub const FILE_ROOT: StubIdList = StubIdList::Single(0);

    /// Largest ordinal with a wire form; anything above would read back as
    /// the empty marker or a count
    pub const MAX_ORDINAL: u32 = EMPTY_MARKER as u32 - 1;

    pub fn from_ordinals(mut ordinals: Vec<u32>) -> Self {
        ordinals.sort_unstable();
        ordinals.dedup();
        match ordinals.len() {
            0 => StubIdList::Empty,
            1 => StubIdList::Single(ordinals[0]),
            _ => StubIdList::Many(ordinals.into_boxed_slice()),
        }
    }

    pub fn ordinals(&self) -> &[u32] {
        match self {
            StubIdList::Empty => &[],
            StubIdList::Single(ordinal) => std::slice::from_ref(ordinal),
            StubIdList::Many(ordinals) => ordinals,
        }
    }

    pub fn len(&self) -> usize {
        self.ordinals().len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StubIdList::Empty)
    }

    pub fn is_file_root(&self) -> bool {
        *self == Self::FILE_ROOT
    }

    /// Ordinals must not exceed `MAX_ORDINAL`; `IndexSink` drops larger ones
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            StubIdList::Empty => VByteEncoder::encode_i32(out, EMPTY_MARKER),
            StubIdList::Single(ordinal) => VByteEncoder::encode_i32(out, *ordinal as i32),
            StubIdList::Many(ordinals) => {
                VByteEncoder::encode_i32(out, -(ordinals.len() as i32));
                for &ordinal in ordinals.iter() {
                    VByteEncoder::encode_i32(out, ordinal as i32);
                }
            }
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let head = reader.read_i32()?;
        if head == EMPTY_MARKER {
            return Ok(StubIdList::Empty);
        }
        if head >= 0 {
            return Ok(StubIdList::Single(head as u32));
        }

        let count = head.unsigned_abs() as usize;
        // Each ordinal takes at least one byte
        if count < 2 || count > reader.remaining() {
            return Err(Error::parse(format!("stub id list count {} out of range", count)));
        }
        let mut ordinals = Vec::with_capacity(count);
        for _ in 0..count {
            let ordinal = reader.read_i32()?;
            if ordinal < 0 {
                return Err(Error::parse(format!("negative stub ordinal {}", ordinal)));
            }
            ordinals.push(ordinal as u32);
        }
        Ok(StubIdList::Many(ordinals.into_boxed_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(list: &StubIdList) -> Vec<u8> {
        let mut out = Vec::new();
        list.write(&mut out);
        out
    }

    #[test]
    fn each_size_class_reads_back() {
        for list in [
            StubIdList::Empty,
            StubIdList::Single(0),
            StubIdList::Single(40_000),
            StubIdList::from_ordinals(vec![9, 3, 3, 700]),
        ] {
            let bytes = written(&list);
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(StubIdList::read(&mut reader).unwrap(), list);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn single_ordinal_is_one_bare_int() {
        assert_eq!(written(&StubIdList::Single(5)).len(), VByteEncoder::encoded_len_i32(5));
        assert_eq!(written(&StubIdList::Single(5)), vec![10]);
        assert_eq!(written(&StubIdList::Many(vec![1, 2].into_boxed_slice())), vec![3, 2, 4]);
    }

    #[test]
    fn from_ordinals_normalizes() {
        assert_eq!(StubIdList::from_ordinals(vec![]), StubIdList::Empty);
        assert_eq!(StubIdList::from_ordinals(vec![4, 4]), StubIdList::Single(4));
        assert_eq!(StubIdList::from_ordinals(vec![2, 1]).ordinals(), &[1, 2]);
        assert!(StubIdList::from_ordinals(vec![0]).is_file_root());
    }

    #[test]
    fn bogus_counts_are_parse_errors() {
        let mut bytes = Vec::new();
        VByteEncoder::encode_i32(&mut bytes, -1000);
        VByteEncoder::encode_i32(&mut bytes, 1);
        assert!(StubIdList::read(&mut ByteReader::new(&bytes)).is_err());

        let mut bytes = Vec::new();
        VByteEncoder::encode_i32(&mut bytes, -1);
        VByteEncoder::encode_i32(&mut bytes, 1);
        assert!(StubIdList::read(&mut ByteReader::new(&bytes)).is_err());
    }

    #[test]
    fn largest_ordinal_is_not_the_empty_marker() {
        let bytes = written(&StubIdList::Single(StubIdList::MAX_ORDINAL));
        assert_eq!(StubIdList::read(&mut ByteReader::new(&bytes)).unwrap(), StubIdList::Single(StubIdList::MAX_ORDINAL));

        let mut bytes = Vec::new();
        VByteEncoder::encode_i32(&mut bytes, StubIdList::MAX_ORDINAL as i32 + 1);
        assert_eq!(StubIdList::read(&mut ByteReader::new(&bytes)).unwrap(), StubIdList::Empty);
    }
}
