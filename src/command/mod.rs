//! Command Stream Module
//!
//! A compact per-schema opcode sequence telling the pointer walker how to move over
//! a record's fields without decoding them.
//!
//! ## Compilation rules
//! - Consecutive fixed-size fields with nothing to trace merge into one `SKIP_BYTES`
//!   (at most 255 fields per command)
//! - Consecutive variable-size fields merge into one `SKIP_UNKNOWN`
//! - A nullable variable-size field gets a `SKIP_FLOW_IF_NULL` guard and a command
//!   of its own
//! - Pointer-bearing fields get a marker command each
//! - Extensible schemas end with `SWITCH_TO_DYNAMIC_FIELD_LIST` before `END_FIELDS`

pub mod opcode;
mod stream;

pub use opcode::{Command, MarkerKind, NEEDS_SIZE};
pub use stream::{CommandIter, CommandStream};
