//! Command opcodes
//!
//! ## Encoding
//! ```text
//! 0x00 END_FIELDS
//! 0x01 SWITCH_TO_DYNAMIC_FIELD_LIST
//! 0x02 SKIP_BYTES_8        [u8 size][u8 field count]
//! 0x03 SKIP_BYTES_32       [u32 size][u8 field count]
//! 0x04 SKIP_BYTES_64       [u64 size][u8 field count]
//! 0x05 SKIP_UNKNOWN        [u8 extra field count]
//! 0x06 SKIP_FLOW_IF_NULL   [u16 field index]
//! 0x07 POTENTIAL_REFERENCE ┐
//! 0x08 DYNAMIC_FIELD       │ high bit (0x80) set when the walker must
//! 0x09 CHUNK_POINTER_FIELD │ compute the field's size to advance
//! 0x0A REFERENCE_FIELD     ┘
//! ```
//! Multi-byte operands are little-endian.

use std::fmt;

pub const END_FIELDS: u8 = 0x00;
pub const SWITCH_TO_DYNAMIC_FIELD_LIST: u8 = 0x01;
pub const SKIP_BYTES_8: u8 = 0x02;
pub const SKIP_BYTES_32: u8 = 0x03;
pub const SKIP_BYTES_64: u8 = 0x04;
pub const SKIP_UNKNOWN: u8 = 0x05;
pub const SKIP_FLOW_IF_NULL: u8 = 0x06;
pub const POTENTIAL_REFERENCE: u8 = 0x07;
pub const DYNAMIC_FIELD: u8 = 0x08;
pub const CHUNK_POINTER_FIELD: u8 = 0x09;
pub const REFERENCE_FIELD: u8 = 0x0A;

/// Marker flag: the field's byte size must be computed at walk time
pub const NEEDS_SIZE: u8 = 0x80;

/// Fields that may lead to pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// Inline record or list whose schema holds pointers
    PotentialReference,
    /// Polymorphic inline record or list
    Dynamic,
    /// Head of a raw chunk chain
    ChunkPointer,
    /// Pointer to a record stored in its own chunk
    Reference,
}

impl MarkerKind {
    pub fn opcode(self) -> u8 {
        match self {
            MarkerKind::PotentialReference => POTENTIAL_REFERENCE,
            MarkerKind::Dynamic => DYNAMIC_FIELD,
            MarkerKind::ChunkPointer => CHUNK_POINTER_FIELD,
            MarkerKind::Reference => REFERENCE_FIELD,
        }
    }

    pub fn from_opcode(op: u8) -> Option<MarkerKind> {
        match op {
            POTENTIAL_REFERENCE => Some(MarkerKind::PotentialReference),
            DYNAMIC_FIELD => Some(MarkerKind::Dynamic),
            CHUNK_POINTER_FIELD => Some(MarkerKind::ChunkPointer),
            REFERENCE_FIELD => Some(MarkerKind::Reference),
            _ => None,
        }
    }
}

/// One decoded command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EndFields,
    SwitchToDynamicFieldList,
    /// Advance `size` bytes over `fields` consecutive fields
    SkipBytes { size: u64, fields: u8 },
    /// Advance over `1 + extra` fields whose sizes are computed at walk time
    SkipUnknown { extra: u8 },
    /// Skip the next command entirely if the field at this index is null
    SkipFlowIfNull { field: u16 },
    Marker { kind: MarkerKind, needs_size: bool },
}

impl Command {
    /// Number of fields the command steps over
    pub fn field_count(&self) -> usize {
        match *self {
            Command::SkipBytes { fields, .. } => usize::from(fields),
            Command::SkipUnknown { extra } => usize::from(extra) + 1,
            Command::Marker { .. } => 1,
            Command::EndFields | Command::SwitchToDynamicFieldList | Command::SkipFlowIfNull { .. } => 0,
        }
    }

    /// Flow commands set up the pending-skip mask instead of consuming it
    pub fn is_flow(&self) -> bool {
        matches!(self, Command::SkipFlowIfNull { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::EndFields => write!(f, "END_FIELDS"),
            Command::SwitchToDynamicFieldList => write!(f, "SWITCH_TO_DYNAMIC_FIELD_LIST"),
            Command::SkipBytes { size, fields } => write!(f, "SKIP_BYTES {size} ({fields} fields)"),
            Command::SkipUnknown { extra } => write!(f, "SKIP_UNKNOWN ({} fields)", u32::from(*extra) + 1),
            Command::SkipFlowIfNull { field } => write!(f, "SKIP_FLOW_IF_NULL field#{field}"),
            Command::Marker { kind, needs_size } => {
                let name = match kind {
                    MarkerKind::PotentialReference => "POTENTIAL_REFERENCE",
                    MarkerKind::Dynamic => "DYNAMIC_FIELD",
                    MarkerKind::ChunkPointer => "CHUNK_POINTER_FIELD",
                    MarkerKind::Reference => "REFERENCE_FIELD",
                };
                if *needs_size {
                    write!(f, "{name} +size")
                } else {
                    write!(f, "{name}")
                }
            }
        }
    }
}
