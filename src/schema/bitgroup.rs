//! Bit-group merger
//!
//! A maximal run of bit-space fields is collapsed into one synthetic field. Two
//! strategies exist:
//!
//! - **Packed**: every member is fixed, at most 63 bits are used, and
//!   `ceil(used / 8)` is 1, 2, 4 or 8 bytes. The group is one little-endian
//!   integer. The leftover high bits hold a checksum (`leftover > 1`) or a single
//!   sentinel one-bit (`leftover == 1`). A group filling its integer exactly
//!   carries no integrity bits.
//! - **Streamed**: anything else. Members go through a shared LSB-first bit stream,
//!   padded to the next byte.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::io::{BitReader, BitWriter, ContentReader, ContentWriter};
use crate::size::{SizeContext, SizeDescriptor, SizeFn, WordSpace};
use crate::value::{Instance, Value};

use super::decl::NumberWidth;
use super::field::{Accessor, FieldDescriptor, FieldKind, FieldOrigin};
use super::CodecEnv;

/// Largest payload the packed strategy accepts
pub const MAX_PACKED_BITS: u64 = 63;

/// How a bit group is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitStrategy {
    Packed { byte_count: u8, used_bits: u32 },
    Streamed,
}

impl BitStrategy {
    /// Pick the strategy for members with the given fixed widths (`None` when any member is unbounded)
    pub fn choose(fixed_bits: Option<u64>) -> BitStrategy {
        match fixed_bits {
            Some(used) if used <= MAX_PACKED_BITS => {
                let byte_count = used.div_ceil(8);
                if matches!(byte_count, 1 | 2 | 4 | 8) {
                    BitStrategy::Packed {
                        byte_count: byte_count as u8,
                        used_bits: used as u32,
                    }
                } else {
                    BitStrategy::Streamed
                }
            }
            _ => BitStrategy::Streamed,
        }
    }

    /// Integrity bits above the payload (0 for streamed groups)
    pub fn leftover(&self) -> u32 {
        match *self {
            BitStrategy::Packed { byte_count, used_bits } => u32::from(byte_count) * 8 - used_bits,
            BitStrategy::Streamed => 0,
        }
    }
}

/// Checksum stored in `leftover` integrity bits for a payload
///
/// `divisor - (payload mod divisor)`, reduced modulo the divisor so it fits the bits.
pub fn checksum(payload: u64, leftover: u32) -> u64 {
    let divisor = 1u64 << leftover;
    (divisor - payload % divisor) & (divisor - 1)
}

/// Payload remainder encoded by a stored checksum
pub fn remainder_from_checksum(stored: u64, leftover: u32) -> u64 {
    let divisor = 1u64 << leftover;
    (divisor - stored) & (divisor - 1)
}

// =============================================================================
// Bit Group
// =============================================================================

/// A merged run of bit-space fields
pub struct BitGroup {
    name: String,
    members: Vec<Arc<FieldDescriptor>>,
    strategy: BitStrategy,
}

impl BitGroup {
    /// Merge a run of bit-space fields into one synthetic field
    pub(crate) fn merge(members: Vec<Arc<FieldDescriptor>>) -> Result<FieldDescriptor> {
        let name = format!(
            "[{}]",
            members.iter().map(|m| m.name()).collect::<Vec<_>>().join("|")
        );

        let fixed_bits = members
            .iter()
            .map(|m| m.size_descriptor().fixed_in(WordSpace::Bit))
            .sum::<Option<u64>>();
        let strategy = BitStrategy::choose(fixed_bits);
        tracing::debug!("Bit group {} uses {:?}", name, strategy);

        let mut external: Vec<String> = Vec::new();
        for member in &members {
            for dep in member.dependencies()? {
                let internal = members.iter().any(|m| m.name() == dep.as_str());
                if !internal && !external.contains(dep) {
                    external.push(dep.clone());
                }
            }
        }
        external.sort();

        let group = Arc::new(BitGroup {
            name: name.clone(),
            members,
            strategy,
        });

        let size = match (strategy, fixed_bits) {
            (BitStrategy::Packed { byte_count, .. }, _) => {
                SizeDescriptor::fixed(WordSpace::Byte, u64::from(byte_count))
            }
            (BitStrategy::Streamed, Some(bits)) => SizeDescriptor::fixed(WordSpace::Byte, bits.div_ceil(8)),
            (BitStrategy::Streamed, None) => {
                let min_bits: u64 = group.members.iter().map(|m| m.size_descriptor().min()).sum();
                let max_bits = group
                    .members
                    .iter()
                    .map(|m| m.size_descriptor().max())
                    .sum::<Option<u64>>();
                let sizer = Arc::clone(&group);
                let calc: SizeFn = Arc::new(move |ctx: &SizeContext<'_>| Ok(sizer.bit_size(ctx)?.div_ceil(8)));
                SizeDescriptor::bounded(
                    WordSpace::Byte,
                    min_bits.div_ceil(8),
                    max_bits.map(|b| b.div_ceil(8)),
                    calc,
                )
            }
        };

        let field = FieldDescriptor::new(
            name,
            Accessor::Synthetic,
            FieldKind::BitGroup(group),
            size,
            FieldOrigin::Synthetic,
        );
        field.init_dependencies(external)?;
        Ok(field)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Arc<FieldDescriptor>] {
        &self.members
    }

    pub fn strategy(&self) -> BitStrategy {
        self.strategy
    }

    /// Total member bits for an instance (payload only, without padding or integrity bits)
    pub fn bit_size(&self, ctx: &SizeContext<'_>) -> Result<u64> {
        let mut total = 0;
        for member in &self.members {
            total += member.size_descriptor().size_in(WordSpace::Bit, ctx)?;
        }
        Ok(total)
    }

    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------

    pub(crate) fn write(&self, env: &CodecEnv<'_>, instance: &Instance, out: &mut ContentWriter) -> Result<()> {
        match self.strategy {
            BitStrategy::Packed { byte_count, used_bits } => {
                let mut payload = 0u64;
                let mut offset = 0u32;
                for member in &self.members {
                    let width = natural_bits(member);
                    payload |= member_bits(member, instance)?.unwrap_or(0) << offset;
                    offset += width;
                }
                let leftover = self.strategy.leftover();
                let integrity = match leftover {
                    0 => 0,
                    1 => 1,
                    _ => checksum(payload, leftover),
                };
                out.write_uint(payload | integrity << used_bits, usize::from(byte_count));
                Ok(())
            }
            BitStrategy::Streamed => {
                let ctx = SizeContext { env, instance };
                let mut bits = BitWriter::new(out);
                for member in &self.members {
                    let before = bits.bits_written();
                    if let Some(encoded) = member_bits(member, instance)? {
                        bits.write_bits(encoded, natural_bits(member));
                    }
                    if env.config.validate_bit_groups {
                        let declared = member.size_descriptor().size_in(WordSpace::Bit, &ctx)?;
                        self.check_consumed(member, declared, bits.bits_written() - before)?;
                    }
                }
                bits.finish();
                Ok(())
            }
        }
    }

    pub(crate) fn read(&self, env: &CodecEnv<'_>, instance: &mut Instance, input: &mut ContentReader) -> Result<()> {
        match self.strategy {
            BitStrategy::Packed { byte_count, used_bits } => {
                let word = input.read_uint(usize::from(byte_count))?;
                let payload = word & ((1u64 << used_bits) - 1);
                let stored = word >> used_bits;
                let leftover = self.strategy.leftover();
                if leftover > 1 {
                    let divisor = 1u64 << leftover;
                    let expected = remainder_from_checksum(stored, leftover);
                    if expected != payload % divisor {
                        return Err(StoreError::Corruption {
                            field: self.name.clone(),
                            detail: format!(
                                "checksum {stored} encodes remainder {expected}, payload {payload} has {}",
                                payload % divisor
                            ),
                        });
                    }
                } else if leftover == 1 && stored != 1 {
                    return Err(StoreError::Corruption {
                        field: self.name.clone(),
                        detail: "sentinel bit is not set".to_string(),
                    });
                }

                let mut offset = 0u32;
                for member in &self.members {
                    let width = natural_bits(member);
                    let raw = (payload >> offset) & ((1u64 << width) - 1);
                    let value = if is_flagged_null(member, instance) {
                        Value::Null
                    } else {
                        decode_member(member, raw)?
                    };
                    member.set(instance, value);
                    offset += width;
                }
                Ok(())
            }
            BitStrategy::Streamed => {
                let mut bits = BitReader::new(input);
                for member in &self.members {
                    let declared = {
                        let ctx = SizeContext {
                            env,
                            instance: &*instance,
                        };
                        member.size_descriptor().size_in(WordSpace::Bit, &ctx)?
                    };
                    let before = bits.bits_read();
                    let value = if is_flagged_null(member, instance) {
                        if member.pads_null() {
                            bits.read_bits(natural_bits(member))?;
                        }
                        Value::Null
                    } else {
                        decode_member(member, bits.read_bits(natural_bits(member))?)?
                    };
                    if env.config.validate_bit_groups {
                        self.check_consumed(member, declared, bits.bits_read() - before)?;
                    }
                    member.set(instance, value);
                }
                bits.finish();
                Ok(())
            }
        }
    }

    fn check_consumed(&self, member: &FieldDescriptor, declared: u64, consumed: u64) -> Result<()> {
        if declared != consumed {
            return Err(StoreError::Corruption {
                field: self.name.clone(),
                detail: format!(
                    "member {} consumed {consumed} bits, declared size is {declared}",
                    member.name()
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for BitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitGroup")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish()
    }
}

// =============================================================================
// Member Codecs
// =============================================================================

fn is_flagged_null(member: &FieldDescriptor, instance: &Instance) -> bool {
    member.null_flag().is_some() && member.is_null_in(instance)
}

/// Encoded member bits, or `None` when a null member occupies no bits
fn member_bits(member: &FieldDescriptor, instance: &Instance) -> Result<Option<u64>> {
    if is_flagged_null(member, instance) {
        return Ok(member.pads_null().then_some(0));
    }
    encode_member(member, member.get(instance)).map(Some)
}

/// Bits a member kind occupies when present
fn natural_bits(member: &FieldDescriptor) -> u32 {
    match member.kind() {
        FieldKind::Enum { bits, .. } => u32::from(*bits),
        FieldKind::Width => 2,
        _ => 1,
    }
}

fn encode_member(member: &FieldDescriptor, value: &Value) -> Result<u64> {
    match (member.kind(), value) {
        (FieldKind::Bool, Value::Bool(b)) | (FieldKind::NullFlag, Value::Bool(b)) => Ok(u64::from(*b)),
        (FieldKind::NullFlag, Value::Null) => Ok(0),
        (FieldKind::Enum { variants, .. }, v) => {
            let ordinal = match v {
                Value::Enum(o) => u64::from(*o),
                Value::UInt(o) => *o,
                Value::Null => return Err(StoreError::NullValue(member.name().to_string())),
                other => {
                    return Err(StoreError::TypeMismatch {
                        field: member.name().to_string(),
                        expected: "enum",
                        found: other.type_name().to_string(),
                    })
                }
            };
            if ordinal >= u64::from(*variants) {
                return Err(StoreError::TypeMismatch {
                    field: member.name().to_string(),
                    expected: "enum ordinal in range",
                    found: format!("{ordinal} of {variants}"),
                });
            }
            Ok(ordinal)
        }
        (FieldKind::Width, v) => v
            .as_u64()
            .and_then(NumberWidth::from_bytes)
            .map(NumberWidth::code)
            .ok_or_else(|| StoreError::Corruption {
                field: member.name().to_string(),
                detail: format!("width companion holds {v:?}"),
            }),
        (_, Value::Null) => Err(StoreError::NullValue(member.name().to_string())),
        (_, other) => Err(StoreError::TypeMismatch {
            field: member.name().to_string(),
            expected: "bool",
            found: other.type_name().to_string(),
        }),
    }
}

fn decode_member(member: &FieldDescriptor, raw: u64) -> Result<Value> {
    match member.kind() {
        FieldKind::Enum { variants, .. } => {
            if raw >= u64::from(*variants) {
                return Err(StoreError::Corruption {
                    field: member.name().to_string(),
                    detail: format!("enum ordinal {raw} out of {variants} variants"),
                });
            }
            Ok(Value::Enum(raw as u32))
        }
        FieldKind::Width => NumberWidth::from_code(raw)
            .map(|w| Value::UInt(u64::from(w.bytes())))
            .ok_or_else(|| StoreError::Corruption {
                field: member.name().to_string(),
                detail: format!("width code {raw}"),
            }),
        _ => Ok(Value::Bool(raw != 0)),
    }
}
