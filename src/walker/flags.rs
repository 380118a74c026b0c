//! Walk callback result codes

use bitflags::bitflags;

use crate::error::{Result, StoreError};

bitflags! {
    /// Flow plus optional action returned from a walk callback
    ///
    /// Exactly one of `CONTINUE` / `END` must be set. `SAVE` and `HOLDER_COPY` may
    /// be added to either.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WalkFlags: u32 {
        const CONTINUE = 1;
        const END = 1 << 1;
        /// The owner was mutated in place and must be persisted
        const SAVE = 1 << 2;
        /// The holder carries a new value; the owner is replaced by a modified copy
        const HOLDER_COPY = 1 << 3;
    }
}

/// Whether the walk goes on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    End,
}

impl WalkFlags {
    /// Decode a raw code, rejecting unknown bits
    pub fn from_code(code: u32) -> Result<WalkFlags> {
        let flags = WalkFlags::from_bits(code).ok_or(StoreError::InvalidWalkFlow(code))?;
        flags.flow()?;
        Ok(flags)
    }

    pub fn flow(self) -> Result<Flow> {
        let flow = self & (WalkFlags::CONTINUE | WalkFlags::END);
        if self.bits() & !WalkFlags::all().bits() != 0 {
            return Err(StoreError::InvalidWalkFlow(self.bits()));
        }
        if flow == WalkFlags::CONTINUE {
            Ok(Flow::Continue)
        } else if flow == WalkFlags::END {
            Ok(Flow::End)
        } else {
            Err(StoreError::InvalidWalkFlow(self.bits()))
        }
    }

    pub fn wants_save(self) -> bool {
        self.contains(WalkFlags::SAVE)
    }

    pub fn wants_holder_copy(self) -> bool {
        self.contains(WalkFlags::HOLDER_COPY)
    }

    /// True if the action would write to the store
    pub fn mutates(self) -> bool {
        self.intersects(WalkFlags::SAVE | WalkFlags::HOLDER_COPY)
    }
}
