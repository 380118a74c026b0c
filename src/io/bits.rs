//! Bit-level streams layered over the byte streams

use crate::error::Result;

use super::{ContentReader, ContentWriter};

/// Writes values of arbitrary bit width, LSB-first
pub struct BitWriter<'w> {
    out: &'w mut ContentWriter,
    current: u8,
    filled: u32,
    written: u64,
}

impl<'w> BitWriter<'w> {
    pub fn new(out: &'w mut ContentWriter) -> Self {
        Self {
            out,
            current: 0,
            filled: 0,
            written: 0,
        }
    }

    /// Write the low `count` bits of `value` (count <= 64)
    pub fn write_bits(&mut self, value: u64, count: u32) {
        let mut value = if count < 64 {
            value & ((1u64 << count) - 1)
        } else {
            value
        };
        let mut remaining = count;
        while remaining > 0 {
            let take = (8 - self.filled).min(remaining);
            let chunk = (value & ((1u64 << take) - 1)) as u8;
            self.current |= chunk << self.filled;
            value >>= take;
            self.filled += take;
            remaining -= take;
            if self.filled == 8 {
                self.out.write_u8(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
        self.written += u64::from(count);
    }

    /// Total bits written through this writer
    pub fn bits_written(&self) -> u64 {
        self.written
    }

    /// Pad the last partial byte with zeros and flush it
    pub fn finish(self) -> u64 {
        if self.filled > 0 {
            self.out.write_u8(self.current);
        }
        self.written
    }
}

/// Reads values of arbitrary bit width, LSB-first
pub struct BitReader<'r> {
    input: &'r mut ContentReader,
    current: u8,
    available: u32,
    consumed: u64,
}

impl<'r> BitReader<'r> {
    pub fn new(input: &'r mut ContentReader) -> Self {
        Self {
            input,
            current: 0,
            available: 0,
            consumed: 0,
        }
    }

    /// Read `count` bits (count <= 64)
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        let mut result = 0u64;
        let mut got = 0u32;
        while got < count {
            if self.available == 0 {
                self.current = self.input.read_u8()?;
                self.available = 8;
            }
            let take = self.available.min(count - got);
            let used = 8 - self.available;
            let bits = u64::from(self.current >> used) & ((1u64 << take) - 1);
            result |= bits << got;
            got += take;
            self.available -= take;
        }
        self.consumed += u64::from(count);
        Ok(result)
    }

    /// Total bits consumed through this reader
    pub fn bits_read(&self) -> u64 {
        self.consumed
    }

    /// Drop the padding bits of the current byte
    pub fn finish(self) -> u64 {
        self.consumed
    }
}
