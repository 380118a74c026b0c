//! Content I/O Module
//!
//! Position-implicit byte and bit streams used by the record codec.
//!
//! ## Conventions
//! - Multi-byte integers are little-endian
//! - Bit streams are LSB-first: the first bit written lands in bit 0 of the first byte
//! - A bit stream is padded with zero bits up to the next byte boundary when finished

mod bits;
mod content;

pub use bits::{BitReader, BitWriter};
pub use content::{ContentReader, ContentWriter};
