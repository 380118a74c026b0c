//! Store Module
//!
//! The backing-store contract the codec and walker run against, an in-memory
//! implementation, and record-level helpers.

mod memory;
mod provider;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::schema::{CodecEnv, Schema};
use crate::value::{ChunkPtr, Instance};

pub use memory::MemoryStore;
pub use provider::DataProvider;

/// Encode an instance into a new chunk
pub fn store_record(provider: &dyn DataProvider, env: &CodecEnv<'_>, instance: &mut Instance) -> Result<ChunkPtr> {
    let schema = Arc::clone(instance.schema());
    let data = schema.to_bytes(env, instance)?;
    provider.allocate(data)
}

/// Decode the record stored in a chunk
pub fn load_record(
    provider: &dyn DataProvider,
    env: &CodecEnv<'_>,
    schema: &Arc<Schema>,
    ptr: ChunkPtr,
) -> Result<Instance> {
    let data = provider.read_chunk(ptr)?;
    schema.from_bytes(env, data)
}

/// Re-encode an instance over its existing chunk
pub fn persist_record(
    provider: &dyn DataProvider,
    env: &CodecEnv<'_>,
    ptr: ChunkPtr,
    instance: &mut Instance,
) -> Result<()> {
    let schema = Arc::clone(instance.schema());
    let data = schema.to_bytes(env, instance)?;
    provider.write_chunk(ptr, data)
}

/// Store payloads as a linked chunk chain, returning its head
pub fn allocate_chain<I>(provider: &dyn DataProvider, payloads: I) -> Result<Option<ChunkPtr>>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut head = None;
    let mut tail: Option<ChunkPtr> = None;
    for payload in payloads {
        let ptr = provider.allocate(payload)?;
        match tail {
            Some(prev) => provider.set_next(prev, Some(ptr))?,
            None => head = Some(ptr),
        }
        tail = Some(ptr);
    }
    Ok(head)
}

/// Pointers of a chain, head first
pub fn chain_links(provider: &dyn DataProvider, head: ChunkPtr) -> Result<Vec<ChunkPtr>> {
    let mut links = vec![head];
    let mut current = head;
    while let Some(next) = provider.next_of(current)? {
        if links.contains(&next) {
            break;
        }
        links.push(next);
        current = next;
    }
    Ok(links)
}
