//! Little-endian byte cursor and writers shared by the metadata codecs.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// Sentinel for an undefined file address.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Width of every file address written by this crate.
pub const OFFSET_SIZE: usize = 8;

/// Bounds-checked forward reader over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or(FormatError::UnexpectedEof {
                expected: self.pos.saturating_add(n),
                available: self.data.len(),
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Unsigned integer of `width` bytes (1..=8).
    pub fn uint(&mut self, width: usize) -> Result<u64, FormatError> {
        let raw = self.take(width)?;
        Ok(LittleEndian::read_uint(raw, width))
    }

    /// A file address; all-ones decodes to `None`.
    pub fn address(&mut self) -> Result<Option<u64>, FormatError> {
        let v = self.u64()?;
        Ok((v != UNDEFINED_ADDRESS).then_some(v))
    }

    /// Check a four-byte block signature.
    pub fn signature(
        &mut self,
        expected: &[u8; 4],
        structure: &'static str,
    ) -> Result<(), FormatError> {
        let sig = self.take(4)?;
        if sig != expected {
            return Err(FormatError::malformed(
                structure,
                format!(
                    "signature {:?} where {:?} was expected",
                    String::from_utf8_lossy(sig),
                    String::from_utf8_lossy(expected)
                ),
            ));
        }
        Ok(())
    }
}

pub fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Write the low `width` bytes of `v`.
pub fn put_uint(buf: &mut Vec<u8>, v: u64, width: usize) {
    buf.extend_from_slice(&v.to_le_bytes()[..width]);
}

pub fn put_address(buf: &mut Vec<u8>, address: Option<u64>) {
    put_u64(buf, address.unwrap_or(UNDEFINED_ADDRESS));
}

/// Bytes needed to encode the stored size of a filtered chunk whose
/// nominal size is `chunk_bytes`, with one byte of headroom for stages
/// that grow their input.
pub fn chunk_size_width(chunk_bytes: u64) -> usize {
    let bits = 64 - chunk_bytes.leading_zeros() as usize;
    (1 + bits / 8).clamp(1, 8)
}
