//! Data provider trait

use bytes::Bytes;

use crate::error::Result;
use crate::value::ChunkPtr;

/// Chunked, pointer-addressed backing store
///
/// Chunks may be chained through a `next` pointer. Mutating calls on a read-only
/// provider fail with `StoreError::ReadOnly`.
pub trait DataProvider: Send + Sync {
    fn is_read_only(&self) -> bool;

    /// Full contents of a chunk
    fn read_chunk(&self, ptr: ChunkPtr) -> Result<Bytes>;

    /// Replace the contents of an existing chunk
    fn write_chunk(&self, ptr: ChunkPtr, data: Bytes) -> Result<()>;

    /// Store `data` in a new chunk
    fn allocate(&self, data: Bytes) -> Result<ChunkPtr>;

    /// Next chunk of a chain
    fn next_of(&self, ptr: ChunkPtr) -> Result<Option<ChunkPtr>>;

    /// Relink a chain
    fn set_next(&self, ptr: ChunkPtr, next: Option<ChunkPtr>) -> Result<()>;
}
