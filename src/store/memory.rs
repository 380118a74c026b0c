//! In-memory data provider

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::value::ChunkPtr;

use super::DataProvider;

#[derive(Debug, Clone)]
struct Chunk {
    data: Bytes,
    next: Option<ChunkPtr>,
}

/// Chunk map behind a read-mostly lock
///
/// Chunk ids start at 1 so 0 stays free as the null pointer.
#[derive(Debug)]
pub struct MemoryStore {
    chunks: RwLock<HashMap<u64, Chunk>>,
    next_id: AtomicU64,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let store = Self::new();
        store.set_read_only(config.read_only);
        store
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Number of live chunks
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, ptr: ChunkPtr) -> bool {
        self.chunks.read().contains_key(&ptr.raw())
    }

    fn check_writable(&self, action: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly(action.to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataProvider for MemoryStore {
    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    fn read_chunk(&self, ptr: ChunkPtr) -> Result<Bytes> {
        self.chunks
            .read()
            .get(&ptr.raw())
            .map(|c| c.data.clone())
            .ok_or(StoreError::ChunkNotFound(ptr.raw()))
    }

    fn write_chunk(&self, ptr: ChunkPtr, data: Bytes) -> Result<()> {
        self.check_writable("write chunk")?;
        let mut chunks = self.chunks.write();
        let chunk = chunks.get_mut(&ptr.raw()).ok_or(StoreError::ChunkNotFound(ptr.raw()))?;
        chunk.data = data;
        Ok(())
    }

    fn allocate(&self, data: Bytes) -> Result<ChunkPtr> {
        self.check_writable("allocate chunk")?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let ptr = ChunkPtr::from_raw(id).ok_or(StoreError::ChunkNotFound(id))?;
        self.chunks.write().insert(id, Chunk { data, next: None });
        Ok(ptr)
    }

    fn next_of(&self, ptr: ChunkPtr) -> Result<Option<ChunkPtr>> {
        self.chunks
            .read()
            .get(&ptr.raw())
            .map(|c| c.next)
            .ok_or(StoreError::ChunkNotFound(ptr.raw()))
    }

    fn set_next(&self, ptr: ChunkPtr, next: Option<ChunkPtr>) -> Result<()> {
        self.check_writable("relink chunk")?;
        let mut chunks = self.chunks.write();
        let chunk = chunks.get_mut(&ptr.raw()).ok_or(StoreError::ChunkNotFound(ptr.raw()))?;
        chunk.next = next;
        Ok(())
    }
}
