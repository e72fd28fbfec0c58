use crate::core::error::{Error, Result};

/// Variable byte encoding for integers (best for small integers)
pub struct VByteEncoder;

impl VByteEncoder {
    /// Encode single u32 value
    /// Values < 128 use 1 byte, < 16384 use 2 bytes, etc.
    pub fn encode_u32(output: &mut Vec<u8>, mut value: u32) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128);  // Set continuation bit
            value >>= 7;
        }
        output.push(value as u8);  // Last byte without continuation bit
    }

    pub fn encode_u64(output: &mut Vec<u8>, mut value: u64) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128);
            value >>= 7;
        }
        output.push(value as u8);
    }

    /// Signed values go through zigzag so small negatives stay short
    pub fn encode_i32(output: &mut Vec<u8>, value: i32) {
        Self::encode_u32(output, ((value << 1) ^ (value >> 31)) as u32);
    }

    pub fn encode_i64(output: &mut Vec<u8>, value: i64) {
        Self::encode_u64(output, ((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn encoded_len_i32(value: i32) -> usize {
        let mut buf = Vec::with_capacity(5);
        Self::encode_i32(&mut buf, value);
        buf.len()
    }

    /// Decode single u32 value, returns (value, bytes_consumed)
    pub fn decode_u32(input: &[u8]) -> Result<(u32, usize)> {
        let mut value = 0u32;
        let mut shift = 0;
        let mut consumed = 0;

        for &byte in input {
            consumed += 1;
            if shift == 28 && byte & 127 > 15 {
                return Err(Error::parse("VByte overflow"));
            }
            value |= ((byte & 127) as u32) << shift;

            if byte & 128 == 0 {  // No continuation bit
                return Ok((value, consumed));
            }

            shift += 7;
            if shift > 28 {  // Max 5 bytes for u32
                return Err(Error::parse("VByte overflow"));
            }
        }

        Err(Error::parse("Incomplete VByte"))
    }

    pub fn decode_u64(input: &[u8]) -> Result<(u64, usize)> {
        let mut value = 0u64;
        let mut shift = 0;
        let mut consumed = 0;

        for &byte in input {
            consumed += 1;
            if shift == 63 && byte & 127 > 1 {
                return Err(Error::parse("VByte overflow"));
            }
            value |= ((byte & 127) as u64) << shift;

            if byte & 128 == 0 {
                return Ok((value, consumed));
            }

            shift += 7;
            if shift > 63 {
                return Err(Error::parse("VByte overflow"));
            }
        }

        Err(Error::parse("Incomplete VByte"))
    }
}

pub fn write_len_prefixed(output: &mut Vec<u8>, bytes: &[u8]) {
    VByteEncoder::encode_u32(output, bytes.len() as u32);
    output.extend_from_slice(bytes);
}

/// Cursor over an encoded buffer; every read fails with a Parse error on
/// truncation instead of panicking
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos)
            .ok_or_else(|| Error::parse("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let (value, consumed) = VByteEncoder::decode_u32(&self.data[self.pos.min(self.data.len())..])?;
        self.pos += consumed;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let (value, consumed) = VByteEncoder::decode_u64(&self.data[self.pos.min(self.data.len())..])?;
        self.pos += consumed;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let raw = self.read_u32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let raw = self.read_u64()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::parse(format!(
                "need {} bytes at offset {}, only {} left", len, self.pos, self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_len_prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::parse("invalid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_values_round_trip() {
        let mut buf = Vec::new();
        for v in [0, 1, -1, 63, -64, i32::MAX, i32::MIN] {
            VByteEncoder::encode_i32(&mut buf, v);
        }
        VByteEncoder::encode_i64(&mut buf, i64::MIN);

        let mut reader = ByteReader::new(&buf);
        for v in [0, 1, -1, 63, -64, i32::MAX, i32::MIN] {
            assert_eq!(reader.read_i32().unwrap(), v);
        }
        assert_eq!(reader.read_i64().unwrap(), i64::MIN);
        assert!(reader.is_empty());
    }

    #[test]
    fn small_values_take_one_byte() {
        assert_eq!(VByteEncoder::encoded_len_i32(3), 1);
        assert_eq!(VByteEncoder::encoded_len_i32(-3), 1);
        assert_eq!(VByteEncoder::encoded_len_i32(i32::MAX), 5);
    }

    #[test]
    fn truncated_input_is_a_parse_error() {
        let mut buf = Vec::new();
        write_len_prefixed(&mut buf, b"hello");
        buf.truncate(3);
        let err = ByteReader::new(&buf).read_len_prefixed().unwrap_err();
        assert!(err.is_storage_related());

        assert!(VByteEncoder::decode_u32(&[0x80, 0x80]).is_err());
        assert!(VByteEncoder::decode_u32(&[0xff, 0xff, 0xff, 0xff, 0x7f]).is_err());
    }
}
