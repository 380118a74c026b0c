//! Record codec
//!
//! Sizing, encoding and decoding of instances against their compiled schema.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::io::{ContentReader, ContentWriter};
use crate::size::{SizeContext, WordSpace};
use crate::value::{ChunkPtr, Instance, Value};

use super::decl::{NumberWidth, Nullability};
use super::field::{Accessor, FieldDescriptor, FieldKind, IntWidth, ListElement};
use super::generator::{decompress, run_generators, GenContext};
use super::{CodecEnv, Schema};

impl Schema {
    // =========================================================================
    // Generation & Sizing
    // =========================================================================

    /// Reset the I/O scratch pool and run every generator, nested records first
    pub fn prepare(&self, env: &CodecEnv<'_>, instance: &mut Instance) -> Result<()> {
        self.check_instance(instance)?;
        instance.reset_scratch();
        for value in instance.values.iter_mut() {
            prepare_value(env, value)?;
        }
        if let Some(extension) = instance.extension_mut() {
            let schema = Arc::clone(extension.schema());
            schema.prepare(env, extension)?;
        }
        let ctx = GenContext {
            env,
            allow_external_mod: env.allow_new_types,
        };
        run_generators(&ctx, self.generation_order.iter().map(Arc::as_ref), instance)
    }

    /// Encoded size of a prepared instance, in bytes
    pub fn size_of(&self, env: &CodecEnv<'_>, instance: &Instance) -> Result<u64> {
        let ctx = SizeContext { env, instance };
        let mut total = 0;
        for field in &self.fields {
            total += field.byte_size(&ctx)?;
        }
        if self.extensible {
            total += 4;
            if let Some(extension) = instance.extension() {
                total += extension.schema().size_of(env, extension)?;
            }
        }
        Ok(total)
    }

    /// Prepare the instance, then compute its encoded size
    pub fn calc_size(&self, env: &CodecEnv<'_>, instance: &mut Instance) -> Result<u64> {
        self.prepare(env, instance)?;
        self.size_of(env, instance)
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Prepare and encode an instance
    ///
    /// Generation runs to completion before the first byte is written, so a width
    /// overflow leaves `out` untouched.
    pub fn write(&self, env: &CodecEnv<'_>, instance: &mut Instance, out: &mut ContentWriter) -> Result<()> {
        self.prepare(env, instance)?;
        self.encode_prepared(env, instance, out)
    }

    /// Encode an instance whose companions are already generated
    pub fn encode_prepared(&self, env: &CodecEnv<'_>, instance: &Instance, out: &mut ContentWriter) -> Result<()> {
        self.check_instance(instance)?;
        for field in &self.fields {
            write_field(env, field, instance, out)?;
        }
        if self.extensible {
            match instance.extension() {
                Some(extension) => {
                    let id = env
                        .registry
                        .type_to_id(extension.schema().name(), env.allow_new_types)?;
                    out.write_u32(id);
                    extension.schema().encode_prepared(env, extension, out)?;
                }
                None => out.write_u32(0),
            }
        }
        Ok(())
    }

    /// Encode an instance into a fresh buffer
    pub fn to_bytes(&self, env: &CodecEnv<'_>, instance: &mut Instance) -> Result<Bytes> {
        self.prepare(env, instance)?;
        let size = self.size_of(env, instance)?;
        let mut out = ContentWriter::with_capacity(size as usize);
        self.encode_prepared(env, instance, &mut out)?;
        Ok(out.freeze())
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// Decode one instance from the reader's current position
    pub fn read(self: &Arc<Self>, env: &CodecEnv<'_>, input: &mut ContentReader) -> Result<Instance> {
        let mut instance = Instance::new(self);
        for field in &self.fields {
            read_field(env, field, &mut instance, input)?;
        }
        if self.extensible {
            let id = input.read_u32()?;
            if id != 0 {
                let schema = resolve_type(env, id)?;
                let extension = schema.read(env, input)?;
                instance.set_extension(Some(extension))?;
            }
        }
        Ok(instance)
    }

    /// Decode an instance that must span the whole buffer
    pub fn from_bytes(self: &Arc<Self>, env: &CodecEnv<'_>, data: impl Into<Bytes>) -> Result<Instance> {
        let mut input = ContentReader::new(data);
        let instance = self.read(env, &mut input)?;
        if input.remaining() > 0 {
            return Err(StoreError::Corruption {
                field: self.name.clone(),
                detail: format!("{} trailing bytes after record", input.remaining()),
            });
        }
        Ok(instance)
    }

    fn check_instance(&self, instance: &Instance) -> Result<()> {
        if instance.schema().name() != self.name {
            return Err(StoreError::InvalidSchema {
                schema: self.name.clone(),
                detail: format!("instance belongs to schema {}", instance.schema().name()),
            });
        }
        Ok(())
    }
}

fn prepare_value(env: &CodecEnv<'_>, value: &mut Value) -> Result<()> {
    match value {
        Value::Record(nested) => {
            let schema = Arc::clone(nested.schema());
            schema.prepare(env, nested)
        }
        Value::List(items) => {
            for item in items.iter_mut() {
                let schema = Arc::clone(item.schema());
                schema.prepare(env, item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

pub(crate) fn resolve_type(env: &CodecEnv<'_>, id: u32) -> Result<Arc<Schema>> {
    let name = env.registry.id_to_type(id)?;
    env.registry.schema(&name)
}

fn int_width(width: IntWidth, instance: &Instance) -> usize {
    match width {
        IntWidth::Fixed(w) => usize::from(w.bytes()),
        IntWidth::Dynamic { width, min, .. } => width
            .get(instance)
            .as_u64()
            .and_then(NumberWidth::from_bytes)
            .unwrap_or(min)
            .bytes()
            .into(),
    }
}

fn counter(accessor: Accessor, instance: &Instance) -> u64 {
    accessor.get(instance).as_u64().unwrap_or(0)
}

fn unexpected(field: &FieldDescriptor, expected: &'static str, found: &Value) -> StoreError {
    if found.is_null() {
        StoreError::NullValue(field.name().to_string())
    } else {
        StoreError::TypeMismatch {
            field: field.name().to_string(),
            expected,
            found: found.type_name().to_string(),
        }
    }
}

// =============================================================================
// Field Writers
// =============================================================================

fn write_field(env: &CodecEnv<'_>, field: &FieldDescriptor, instance: &Instance, out: &mut ContentWriter) -> Result<()> {
    if field.null_flag().is_some() && field.is_null_in(instance) {
        if field.pads_null() {
            out.write_zeros(field.size_descriptor().fixed_in(WordSpace::Byte).unwrap_or(0));
        }
        return Ok(());
    }

    let value = field.get(instance);
    match field.kind() {
        FieldKind::BitGroup(group) => group.write(env, instance, out),
        FieldKind::Int { width, signed } => write_int(field, int_width(*width, instance), *signed, value, out),
        FieldKind::Float => match value {
            Value::Float(v) => {
                out.write_u64(v.to_bits());
                Ok(())
            }
            other => Err(unexpected(field, "float", other)),
        },
        FieldKind::Length | FieldKind::TypeId => {
            let raw = value.as_u64().unwrap_or(0);
            let raw = u32::try_from(raw).map_err(|_| StoreError::NumericOverflow {
                field: field.name().to_string(),
                required: 8,
                max: 4,
            })?;
            out.write_u32(raw);
            Ok(())
        }
        FieldKind::Str { .. } => match value {
            Value::Str(s) => {
                out.write_bytes(s.as_bytes());
                Ok(())
            }
            other => Err(unexpected(field, "string", other)),
        },
        FieldKind::Bytes { .. } | FieldKind::Packed => match value {
            Value::Bytes(b) => {
                if matches!(field.kind(), FieldKind::Packed) {
                    out.write_u32(b.len() as u32);
                }
                out.write_bytes(b);
                Ok(())
            }
            other => Err(unexpected(field, "bytes", other)),
        },
        // Stored through the packed companion
        FieldKind::CompressedBytes { .. } => Ok(()),
        FieldKind::Inline { schema } => match value {
            Value::Record(nested) => schema.encode_prepared(env, nested, out),
            other => Err(unexpected(field, "record", other)),
        },
        FieldKind::Dynamic { .. } => match value {
            Value::Record(nested) => nested.schema().encode_prepared(env, nested, out),
            other => Err(unexpected(field, "record", other)),
        },
        FieldKind::Reference { .. } | FieldKind::ChunkPointer => match value {
            Value::Ptr(ptr) => {
                out.write_u64(ptr.raw());
                Ok(())
            }
            Value::Null if field.nullability() != Nullability::NotNull => {
                out.write_u64(0);
                Ok(())
            }
            other => Err(unexpected(field, "pointer", other)),
        },
        FieldKind::List { element, .. } => match value {
            Value::List(items) => {
                let expected = match element {
                    ListElement::Named(schema) => Some(schema.name()),
                    ListElement::Dynamic { .. } => items.first().map(|i| i.schema().name()),
                };
                for item in items {
                    if Some(item.schema().name()) != expected {
                        return Err(StoreError::TypeMismatch {
                            field: field.name().to_string(),
                            expected: "elements of one schema",
                            found: item.schema().name().to_string(),
                        });
                    }
                    item.schema().encode_prepared(env, item, out)?;
                }
                Ok(())
            }
            other => Err(unexpected(field, "list", other)),
        },
        FieldKind::Bool | FieldKind::Enum { .. } | FieldKind::NullFlag | FieldKind::Width => {
            Err(StoreError::InvalidSchema {
                schema: instance.schema().name().to_string(),
                detail: format!("bit field {} outside a bit group", field.name()),
            })
        }
    }
}

fn write_int(field: &FieldDescriptor, width: usize, signed: bool, value: &Value, out: &mut ContentWriter) -> Result<()> {
    let overflow = |required: NumberWidth| StoreError::NumericOverflow {
        field: field.name().to_string(),
        required: required.bytes(),
        max: width as u8,
    };
    let limit = NumberWidth::from_bytes(width as u64).unwrap_or(NumberWidth::W8);
    let raw = match (signed, value) {
        (true, Value::Int(v)) => {
            if !limit.fits_signed(*v) {
                return Err(overflow(NumberWidth::for_signed(*v)));
            }
            *v as u64
        }
        (true, Value::UInt(v)) => match i64::try_from(*v) {
            Ok(v) if limit.fits_signed(v) => v as u64,
            Ok(v) => return Err(overflow(NumberWidth::for_signed(v))),
            Err(_) => {
                return Err(StoreError::NumericOverflow {
                    field: field.name().to_string(),
                    required: 9,
                    max: width as u8,
                })
            }
        },
        (false, Value::UInt(v)) => {
            if !limit.fits_unsigned(*v) {
                return Err(overflow(NumberWidth::for_unsigned(*v)));
            }
            *v
        }
        (false, Value::Int(v)) => match u64::try_from(*v) {
            Ok(v) if limit.fits_unsigned(v) => v,
            Ok(v) => return Err(overflow(NumberWidth::for_unsigned(v))),
            Err(_) => return Err(unexpected(field, "unsigned int", value)),
        },
        (_, other) => return Err(unexpected(field, "int", other)),
    };
    out.write_uint(raw, width);
    Ok(())
}

// =============================================================================
// Field Readers
// =============================================================================

fn read_field(
    env: &CodecEnv<'_>,
    field: &FieldDescriptor,
    instance: &mut Instance,
    input: &mut ContentReader,
) -> Result<()> {
    if field.null_flag().is_some() && field.is_null_in(instance) {
        if field.pads_null() {
            input.skip(field.size_descriptor().fixed_in(WordSpace::Byte).unwrap_or(0))?;
        }
        field.set(instance, Value::Null);
        return Ok(());
    }

    let value = match field.kind() {
        FieldKind::BitGroup(group) => return group.read(env, instance, input),
        FieldKind::Int { width, signed } => {
            let width = int_width(*width, instance);
            let raw = input.read_uint(width)?;
            if *signed {
                let shift = 64 - 8 * width as u32;
                Value::Int(((raw << shift) as i64) >> shift)
            } else {
                Value::UInt(raw)
            }
        }
        FieldKind::Float => Value::Float(f64::from_bits(input.read_u64()?)),
        FieldKind::Length | FieldKind::TypeId => Value::UInt(u64::from(input.read_u32()?)),
        FieldKind::Str { len } => {
            let raw = input.read_bytes(counter(*len, instance))?;
            let text = String::from_utf8(raw.to_vec()).map_err(|e| StoreError::Corruption {
                field: field.name().to_string(),
                detail: e.to_string(),
            })?;
            Value::Str(text)
        }
        FieldKind::Bytes { len } => Value::Bytes(input.read_bytes(counter(*len, instance))?.to_vec()),
        FieldKind::Packed => {
            let len = input.read_u32()?;
            Value::Bytes(input.read_bytes(u64::from(len))?.to_vec())
        }
        FieldKind::CompressedBytes { packed } => {
            let raw = decompress(field.name(), packed.get(instance).as_bytes().unwrap_or(&[]))?;
            Value::Bytes(raw)
        }
        FieldKind::Inline { schema } => Value::Record(Box::new(schema.read(env, input)?)),
        FieldKind::Dynamic { type_id } => match counter(*type_id, instance) {
            0 => Value::Null,
            id => {
                let schema = resolve_type(env, id as u32)?;
                Value::Record(Box::new(schema.read(env, input)?))
            }
        },
        FieldKind::Reference { .. } | FieldKind::ChunkPointer => {
            ChunkPtr::from_raw(input.read_u64()?).map_or(Value::Null, Value::Ptr)
        }
        FieldKind::List { element, len } => {
            let count = counter(*len, instance);
            let schema = match element {
                ListElement::Named(schema) => Some(Arc::clone(schema)),
                ListElement::Dynamic { type_id } => match counter(*type_id, instance) {
                    0 => None,
                    id => Some(resolve_type(env, id as u32)?),
                },
            };
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            if count > 0 {
                let schema = schema.ok_or_else(|| StoreError::Corruption {
                    field: field.name().to_string(),
                    detail: format!("{count} elements without an element type"),
                })?;
                for _ in 0..count {
                    items.push(schema.read(env, input)?);
                }
            }
            Value::List(items)
        }
        FieldKind::Bool | FieldKind::Enum { .. } | FieldKind::NullFlag | FieldKind::Width => {
            return Err(StoreError::InvalidSchema {
                schema: instance.schema().name().to_string(),
                detail: format!("bit field {} outside a bit group", field.name()),
            })
        }
    };
    field.set(instance, value);
    Ok(())
}
