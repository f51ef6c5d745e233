//! Bounds-checked, offset-indexed reads over an immutable byte buffer.
//!
//! The teacher's `LEReader`/`BEReader` wrap a sequential `io::Cursor`. Directory
//! walks here jump around by RVA-derived offsets instead, so every read takes
//! an explicit offset and checks `offset + size <= buffer.len()` itself rather
//! than relying on a moving cursor position. Big-endian is never needed on
//! this path (§9: all PE scalars are little-endian), so `BEReader` has no
//! counterpart here.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// A read-only view over a byte buffer with bounds-checked little-endian reads.
#[derive(Debug, Clone, Copy)]
pub struct ByteSpan<'a> {
    buf: &'a [u8],
}

impl<'a> ByteSpan<'a> {
    pub fn new(buf: &'a [u8]) -> ByteSpan<'a> {
        ByteSpan { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn check(&self, offset: usize, size: usize) -> Result<()> {
        if offset.checked_add(size).map_or(true, |end| end > self.buf.len()) {
            return Err(Error::BufferOverflow {
                offset,
                size,
                buffer_len: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Bounds-checked copy of `size` bytes starting at `offset`.
    pub fn read_bytes_at(&self, offset: usize, size: usize) -> Result<&'a [u8]> {
        self.check(offset, size)?;
        Ok(&self.buf[offset..offset + size])
    }

    pub fn read_u8_at(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        Ok(self.buf[offset])
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16> {
        self.check(offset, 2)?;
        Ok(LittleEndian::read_u16(&self.buf[offset..offset + 2]))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32> {
        self.check(offset, 4)?;
        Ok(LittleEndian::read_u32(&self.buf[offset..offset + 4]))
    }

    pub fn read_u64_at(&self, offset: usize) -> Result<u64> {
        self.check(offset, 8)?;
        Ok(LittleEndian::read_u64(&self.buf[offset..offset + 8]))
    }

    pub fn read_i32_at(&self, offset: usize) -> Result<i32> {
        self.check(offset, 4)?;
        Ok(LittleEndian::read_i32(&self.buf[offset..offset + 4]))
    }

    /// Scans forward from `offset` for the first NUL byte and returns the
    /// (possibly empty) string before it. `Truncated` if the buffer ends
    /// before a NUL is found.
    pub fn read_cstr_at(&self, offset: usize) -> Result<String> {
        if offset > self.buf.len() {
            return Err(Error::Truncated { offset });
        }
        let rest = &self.buf[offset..];
        match rest.iter().position(|&b| b == 0) {
            Some(nul) => Ok(String::from_utf8_lossy(&rest[..nul]).into_owned()),
            None => Err(Error::Truncated { offset }),
        }
    }
}
