//! Variable-length integer primitives shared by the instruction decoder and
//! the ABC reader.

use crate::DecodeError;

/// Cursor over a byte slice. Every read is bounds-checked.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    #[inline(always)]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    #[inline(always)]
    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let lo = self.read_u8()? as u16;
        let hi = self.read_u8()? as u16;
        Ok(lo | (hi << 8))
    }

    /// Signed 24-bit little-endian branch offset.
    pub(crate) fn read_s24(&mut self) -> Result<i32, DecodeError> {
        let b0 = self.read_u8()? as u32;
        let b1 = self.read_u8()? as u32;
        let b2 = self.read_u8()? as u32;
        let raw = b0 | (b1 << 8) | (b2 << 16);
        Ok(((raw << 8) as i32) >> 8)
    }

    /// Variable-length unsigned 32-bit integer: 7 bits per byte, low bits
    /// first, at most five bytes.
    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        let mut result: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            if shift == 28 && byte & 0xF0 != 0 {
                return Err(DecodeError::BadVarint { offset: start });
            }
            result |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::BadVarint { offset: start })
    }

    /// Like [`read_u32`](Self::read_u32), rejecting values above 2^30 - 1.
    pub(crate) fn read_u30(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        let value = self.read_u32()?;
        if value >= 1 << 30 {
            return Err(DecodeError::BadVarint { offset: start });
        }
        Ok(value)
    }

    pub(crate) fn read_s32(&mut self) -> Result<i32, DecodeError> {
        self.read_u32().map(|v| v as i32)
    }

    pub(crate) fn read_d64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Append-only encoder mirroring [`ByteReader`].
#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub(crate) fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn write_s24(&mut self, v: i32) {
        let bytes = v.to_le_bytes();
        self.buf.extend_from_slice(&bytes[..3]);
    }

    /// Overwrite a previously written s24 at `pos`.
    pub(crate) fn patch_s24(&mut self, pos: usize, v: i32) {
        let bytes = v.to_le_bytes();
        self.buf[pos..pos + 3].copy_from_slice(&bytes[..3]);
    }

    pub(crate) fn write_u32(&mut self, mut v: u32) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub(crate) fn write_s32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub(crate) fn write_d64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for &v in &[0u32, 0x7F, 0x80, 0x3FFF, 0x4000, (1 << 30) - 1, u32::MAX] {
            let mut w = ByteWriter::new();
            w.write_u32(v);
            let bytes = w.into_bytes();
            assert_eq!(ByteReader::new(&bytes).read_u32(), Ok(v));
        }
    }

    #[test]
    fn u30_rejects_large_values() {
        let mut w = ByteWriter::new();
        w.write_u32(1 << 30);
        let bytes = w.into_bytes();
        assert_eq!(
            ByteReader::new(&bytes).read_u30(),
            Err(DecodeError::BadVarint { offset: 0 })
        );
    }

    #[test]
    fn s24_sign_extends() {
        let mut w = ByteWriter::new();
        w.write_s24(-3);
        w.write_s24(0x7F_FFFF);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_s24(), Ok(-3));
        assert_eq!(r.read_s24(), Ok(0x7F_FFFF));
    }

    #[test]
    fn truncated_varint() {
        assert_eq!(
            ByteReader::new(&[0x80, 0x80]).read_u32(),
            Err(DecodeError::Truncated { offset: 2 })
        );
    }
}
