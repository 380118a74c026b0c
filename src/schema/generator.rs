//! Generator protocol
//!
//! Generators derive companion values (null flags, lengths, type ids, numeric widths,
//! packed blobs) from declared values. They run in the schema's final field order
//! before every write, size computation and walk.

use std::fmt;

use crate::error::{Result, StoreError};
use crate::value::{Instance, Value};

use super::decl::{NumberWidth, WidthRetention};
use super::field::{Accessor, FieldDescriptor};
use super::CodecEnv;

/// Everything a generator may look at besides the instance
pub struct GenContext<'a> {
    pub env: &'a CodecEnv<'a>,
    /// Whether generation may mutate state outside the instance (e.g. record new type ids)
    pub allow_external_mod: bool,
}

/// Derives the value of one (companion) field
pub trait Generator: Send + Sync + fmt::Debug {
    /// Whether `generate` should run for this instance
    fn should_generate(&self, ctx: &GenContext<'_>, target: &FieldDescriptor, instance: &Instance) -> bool;

    /// Compute the target field's new value
    fn generate(&self, ctx: &GenContext<'_>, target: &FieldDescriptor, instance: &Instance) -> Result<Value>;
}

// =============================================================================
// Null Flags
// =============================================================================

/// `true` when the source value is null
#[derive(Debug)]
pub struct NullFlagGenerator {
    pub source: Accessor,
}

impl Generator for NullFlagGenerator {
    fn should_generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, _instance: &Instance) -> bool {
        true
    }

    fn generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, instance: &Instance) -> Result<Value> {
        Ok(Value::Bool(self.source.get(instance).is_null()))
    }
}

// =============================================================================
// Lengths
// =============================================================================

/// Byte length of a string/blob, or element count of a list (0 when absent)
#[derive(Debug)]
pub struct LengthGenerator {
    pub source: Accessor,
    pub source_name: String,
}

impl Generator for LengthGenerator {
    fn should_generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, _instance: &Instance) -> bool {
        true
    }

    fn generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, instance: &Instance) -> Result<Value> {
        let len = match self.source.get(instance) {
            Value::Null => 0,
            Value::Str(s) => s.len(),
            Value::Bytes(b) => b.len(),
            Value::List(items) => items.len(),
            other => {
                return Err(StoreError::TypeMismatch {
                    field: self.source_name.clone(),
                    expected: "string, bytes or list",
                    found: other.type_name().to_string(),
                })
            }
        };
        let len = u32::try_from(len).map_err(|_| StoreError::NumericOverflow {
            field: self.source_name.clone(),
            required: 8,
            max: 4,
        })?;
        Ok(Value::UInt(u64::from(len)))
    }
}

// =============================================================================
// Type Ids
// =============================================================================

/// Which value carries the concrete type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSource {
    /// The field holds one polymorphic record
    Record,
    /// The field holds a list whose first element fixes the type
    FirstElement,
}

/// Compact registry id of the concrete type behind a polymorphic value (0 when absent)
#[derive(Debug)]
pub struct TypeIdGenerator {
    pub source: Accessor,
    pub source_name: String,
    pub mode: TypeSource,
}

impl Generator for TypeIdGenerator {
    fn should_generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, _instance: &Instance) -> bool {
        true
    }

    fn generate(&self, ctx: &GenContext<'_>, _target: &FieldDescriptor, instance: &Instance) -> Result<Value> {
        let concrete = match (self.mode, self.source.get(instance)) {
            (_, Value::Null) => None,
            (TypeSource::Record, Value::Record(record)) => Some(record.schema().name()),
            (TypeSource::FirstElement, Value::List(items)) => items.first().map(|i| i.schema().name()),
            (_, other) => {
                return Err(StoreError::TypeMismatch {
                    field: self.source_name.clone(),
                    expected: "record or list",
                    found: other.type_name().to_string(),
                })
            }
        };
        let id = match concrete {
            Some(name) => ctx.env.registry.type_to_id(name, ctx.allow_external_mod)?,
            None => 0,
        };
        Ok(Value::UInt(u64::from(id)))
    }
}

// =============================================================================
// Dynamic Numeric Widths
// =============================================================================

/// Minimal byte width holding the source integer, clamped to `[min, max]`
#[derive(Debug)]
pub struct WidthGenerator {
    pub source: Accessor,
    pub source_name: String,
    pub signed: bool,
    pub min: NumberWidth,
    pub max: NumberWidth,
    pub retention: WidthRetention,
}

impl WidthGenerator {
    fn required(&self, value: &Value) -> Result<NumberWidth> {
        let width = match value {
            Value::Null => NumberWidth::W1,
            Value::Int(v) if self.signed => NumberWidth::for_signed(*v),
            Value::UInt(v) if self.signed => match i64::try_from(*v) {
                Ok(v) => NumberWidth::for_signed(v),
                Err(_) => {
                    return Err(StoreError::NumericOverflow {
                        field: self.source_name.clone(),
                        required: 9,
                        max: self.max.bytes(),
                    })
                }
            },
            Value::UInt(v) => NumberWidth::for_unsigned(*v),
            Value::Int(v) => match u64::try_from(*v) {
                Ok(v) => NumberWidth::for_unsigned(v),
                Err(_) => {
                    return Err(StoreError::TypeMismatch {
                        field: self.source_name.clone(),
                        expected: "unsigned int",
                        found: "negative int".to_string(),
                    })
                }
            },
            other => {
                return Err(StoreError::TypeMismatch {
                    field: self.source_name.clone(),
                    expected: "int",
                    found: other.type_name().to_string(),
                })
            }
        };
        if width > self.max {
            return Err(StoreError::NumericOverflow {
                field: self.source_name.clone(),
                required: width.bytes(),
                max: self.max.bytes(),
            });
        }
        Ok(width.max(self.min))
    }
}

impl Generator for WidthGenerator {
    /// Always runs: the overflow check must see every value, even at the maximum width
    fn should_generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, _instance: &Instance) -> bool {
        true
    }

    fn generate(&self, _ctx: &GenContext<'_>, target: &FieldDescriptor, instance: &Instance) -> Result<Value> {
        let mut width = self.required(self.source.get(instance))?;
        if self.retention == WidthRetention::GrowOnly {
            if let Some(old) = target.get(instance).as_u64().and_then(NumberWidth::from_bytes) {
                width = width.max(old);
            }
        }
        Ok(Value::UInt(u64::from(width.bytes())))
    }
}

// =============================================================================
// Compression
// =============================================================================

/// lz4 block of a compressed blob, prefixed with the uncompressed size
#[derive(Debug)]
pub struct CompressGenerator {
    pub source: Accessor,
    pub source_name: String,
}

impl Generator for CompressGenerator {
    fn should_generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, _instance: &Instance) -> bool {
        true
    }

    fn generate(&self, _ctx: &GenContext<'_>, _target: &FieldDescriptor, instance: &Instance) -> Result<Value> {
        match self.source.get(instance) {
            Value::Bytes(raw) => Ok(Value::Bytes(lz4_flex::compress_prepend_size(raw))),
            Value::Null => Ok(Value::Bytes(lz4_flex::compress_prepend_size(&[]))),
            other => Err(StoreError::TypeMismatch {
                field: self.source_name.clone(),
                expected: "bytes",
                found: other.type_name().to_string(),
            }),
        }
    }
}

/// Inverse of [`CompressGenerator`]
pub(crate) fn decompress(field: &str, packed: &[u8]) -> Result<Vec<u8>> {
    if packed.is_empty() {
        return Ok(Vec::new());
    }
    lz4_flex::decompress_size_prepended(packed)
        .map_err(|e| StoreError::Compression(format!("{field}: {e}")))
}

// =============================================================================
// Runner
// =============================================================================

/// Run every generator of `fields` (already in final order) against `instance`
pub fn run_generators<'f, I>(ctx: &GenContext<'_>, fields: I, instance: &mut Instance) -> Result<()>
where
    I: IntoIterator<Item = &'f FieldDescriptor>,
{
    for field in fields {
        for generator in field.generators() {
            if generator.should_generate(ctx, field, instance) {
                let value = generator.generate(ctx, field, instance)?;
                field.set(instance, value);
            }
        }
    }
    Ok(())
}
