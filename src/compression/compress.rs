use crate::compression::vbyte::{ByteReader, VByteEncoder, write_len_prefixed};
use crate::core::error::{Error, ErrorKind, Result};
use serde::{Serialize, Deserialize};

/// Compressed block storage for stub record halves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedBlock {
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compression: CompressionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    None,
    LZ4,      // Fast compression (~500 MB/s), ratio 2-3x
    Zstd,     // Better ratio (3-5x), slower (~200 MB/s)
    Snappy,   // Balanced (2-3x ratio, ~300 MB/s)
}

// Largest block we agree to inflate; guards against garbage size headers
const MAX_ORIGINAL_SIZE: usize = 256 * 1024 * 1024;

impl CompressedBlock {
    /// Compress raw byte data
    pub fn compress(data: &[u8], compression: CompressionType) -> Result<Self> {
        let compressed = match compression {
            CompressionType::None => data.to_vec(),

            CompressionType::LZ4 => {
                lz4::block::compress(data, None, false)?
            }

            CompressionType::Zstd => {
                zstd::encode_all(data, 3)?  // Level 3 is balanced
            }

            CompressionType::Snappy => {
                use snap::raw::Encoder;
                let mut encoder = Encoder::new();
                encoder.compress_vec(data)
                    .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))?
            }
        };

        Ok(CompressedBlock {
            data: compressed,
            original_size: data.len(),
            compression,
        })
    }

    pub fn decompress(&self) -> Result<Vec<u8>> {
        let out = match self.compression {
            CompressionType::None => self.data.clone(),

            CompressionType::LZ4 => {
                lz4::block::decompress(&self.data, Some(self.original_size as i32))
                    .map_err(|e| Error::corrupted(e.to_string()))?
            }

            CompressionType::Zstd => {
                zstd::decode_all(&self.data[..])
                    .map_err(|e| Error::corrupted(e.to_string()))?
            }

            CompressionType::Snappy => {
                use snap::raw::Decoder;
                let mut decoder = Decoder::new();
                decoder.decompress_vec(&self.data)
                    .map_err(|e| Error::corrupted(e.to_string()))?
            }
        };

        if out.len() != self.original_size {
            return Err(Error::corrupted(format!(
                "block inflated to {} bytes, header says {}", out.len(), self.original_size
            )));
        }
        Ok(out)
    }

    // [ original_size: vint ][ data_len: vint ][ data ]
    // The compression type is not written: it is fixed per store.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        VByteEncoder::encode_u32(out, self.original_size as u32);
        write_len_prefixed(out, &self.data);
    }

    pub fn read_from(reader: &mut ByteReader<'_>, compression: CompressionType) -> Result<Self> {
        let original_size = reader.read_u32()? as usize;
        if original_size > MAX_ORIGINAL_SIZE {
            return Err(Error::corrupted(format!("block size {} out of range", original_size)));
        }
        let data = reader.read_len_prefixed()?.to_vec();
        Ok(CompressedBlock {
            data,
            original_size,
            compression,
        })
    }
}
