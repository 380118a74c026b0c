//! Byte-level content streams
//!
//! Thin wrappers over `bytes` buffers with the handful of primitives the codec needs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};

/// Append-only byte sink
#[derive(Debug, Default)]
pub struct ContentWriter {
    buf: BytesMut,
}

impl ContentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far
    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Write the low `width` bytes of `value` (1..=8)
    pub fn write_uint(&mut self, value: u64, width: usize) {
        self.buf.put_uint_le(value, width);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn write_zeros(&mut self, count: u64) {
        self.buf.put_bytes(0, count as usize);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish writing and hand out the immutable bytes
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Forward-only byte source
#[derive(Debug, Clone)]
pub struct ContentReader {
    buf: Bytes,
    position: u64,
}

impl ContentReader {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self {
            buf: buf.into(),
            position: 0,
        }
    }

    /// Number of bytes consumed so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.buf.remaining() as u64
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        self.position += 1;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        self.position += 4;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        self.position += 8;
        Ok(self.buf.get_u64_le())
    }

    /// Read `width` bytes (1..=8) as an unsigned little-endian integer
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        self.ensure(width as u64)?;
        self.position += width as u64;
        Ok(self.buf.get_uint_le(width))
    }

    /// Read `count` bytes without copying
    pub fn read_bytes(&mut self, count: u64) -> Result<Bytes> {
        self.ensure(count)?;
        self.position += count;
        Ok(self.buf.split_to(count as usize))
    }

    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.ensure(count)?;
        self.position += count;
        self.buf.advance(count as usize);
        Ok(())
    }

    fn ensure(&self, needed: u64) -> Result<()> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(StoreError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }
}
