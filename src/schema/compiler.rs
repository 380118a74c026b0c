//! Schema compiler
//!
//! Lowers a [`SchemaDecl`] into field descriptors, injects companion fields, orders
//! everything, merges bit runs and compiles the command stream.
//!
//! ## Companion naming
//! - `{field}$null`: null flag (I/O scratch, 1 bit)
//! - `{field}$len`: byte length or element count (I/O scratch, u32)
//! - `{field}$type`: registry type id of a polymorphic value (I/O scratch, u32)
//! - `{field}$width`: dynamic integer width (2-bit code; instance pool when grow-only)
//! - `{field}$packed`: lz4 block of a compressed blob (I/O scratch, self-delimited)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::command::CommandStream;
use crate::error::{Result, StoreError};
use crate::registry::TypeRegistry;
use crate::size::{SizeContext, SizeDescriptor, SizeFn, WordSpace};
use crate::value::Value;

use super::decl::{
    ElementType, FieldDecl, FieldType, NumberPolicy, Nullability, SchemaDecl, WidthRetention,
};
use super::field::{
    Accessor, FieldDescriptor, FieldKind, FieldOrigin, IntWidth, ListElement, StoragePool,
};
use super::generator::{
    CompressGenerator, LengthGenerator, NullFlagGenerator, TypeIdGenerator, TypeSource, WidthGenerator,
};
use super::order::{apply_manual_order, merge_bit_runs, order_fields};
use super::{FieldSet, Schema};

/// Characters reserved for compiler-generated names
const RESERVED: [char; 4] = ['$', '[', ']', '|'];

/// A descriptor whose dependency names are not wired yet
type Pending = (FieldDescriptor, Vec<String>);

/// Compile a declaration, resolving nested schemas through `registry`
pub(crate) fn compile(decl: &SchemaDecl, registry: &dyn TypeRegistry) -> Result<Schema> {
    let started = Instant::now();
    check_names(decl)?;

    // Step 1: Lower declared fields and collect their companions
    let mut slots = Slots::default();
    let mut declared = Vec::with_capacity(decl.fields.len());
    let mut companions = Vec::new();
    for (index, field) in decl.fields.iter().enumerate() {
        let lowered = lower_field(&decl.name, index, field, registry, &mut slots)?;
        declared.push(wire(lowered.field)?);
        for companion in lowered.companions {
            companions.push(wire(companion)?);
        }
    }

    // Step 2: Force a fixed layout if requested
    if decl.fixed_layout {
        declared = declared
            .iter()
            .map(|f| f.force_max_as_fixed_size().map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let mut needed: HashSet<String> = HashSet::new();
        for field in &declared {
            needed.extend(field.dependencies()?.iter().cloned());
        }
        companions.retain(|c| !matches!(c.kind(), FieldKind::Width) || needed.contains(c.name()));
        if let Some(loose) = declared
            .iter()
            .chain(companions.iter())
            .find(|f| !f.size_descriptor().has_fixed())
        {
            return Err(StoreError::FixedFormatUnsupported {
                field: loose.name().to_string(),
                cause: "size is not fixed in a fixed layout".to_string(),
            });
        }
    }

    // Step 3: Order, then merge bit runs
    let all: Vec<Arc<FieldDescriptor>> = declared.iter().chain(companions.iter()).cloned().collect();
    let ordered = match &decl.manual_order {
        Some(order) => apply_manual_order(&decl.name, &all, order)?,
        None => order_fields(&decl.name, &all)?,
    };
    let fields = FieldSet::new(merge_bit_runs(ordered)?);

    // Step 4: Command stream
    let commands = CommandStream::compile(&fields, decl.extensible)?;

    let mut by_name: HashMap<String, Arc<FieldDescriptor>> = HashMap::new();
    for field in all.iter().chain(fields.iter()) {
        by_name.insert(field.name().to_string(), Arc::clone(field));
    }
    let declared_index = declared
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name().to_string(), i))
        .collect();
    let generation_order = fields.flattened().cloned().collect();
    let has_pointers = declared.iter().any(|f| f.is_pointer_bearing());

    tracing::debug!(
        "Compiled schema {} ({} fields, {} command bytes) in {:?}",
        decl.name,
        fields.len(),
        commands.len(),
        started.elapsed()
    );

    Ok(Schema {
        name: decl.name.clone(),
        immutable: decl.immutable,
        extensible: decl.extensible,
        declared,
        fields,
        generation_order,
        by_name,
        declared_index,
        pool_slots: slots.pool,
        scratch_slots: slots.scratch,
        commands,
        has_pointers,
    })
}

fn wire((field, dependencies): Pending) -> Result<Arc<FieldDescriptor>> {
    field.init_dependencies(dependencies)?;
    Ok(Arc::new(field))
}

fn check_names(decl: &SchemaDecl) -> Result<()> {
    if decl.name.is_empty() {
        return Err(StoreError::InvalidSchema {
            schema: decl.name.clone(),
            detail: "schema name is empty".to_string(),
        });
    }
    let mut seen = HashSet::new();
    for field in &decl.fields {
        if field.name.is_empty() || field.name.contains(RESERVED) {
            return Err(StoreError::InvalidSchema {
                schema: decl.name.clone(),
                detail: format!("field name {:?} is empty or uses a reserved character", field.name),
            });
        }
        if !seen.insert(field.name.as_str()) {
            return Err(StoreError::DuplicateField {
                schema: decl.name.clone(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Companion Slots
// =============================================================================

#[derive(Default)]
struct Slots {
    pool: usize,
    scratch: usize,
}

impl Slots {
    fn take(&mut self, pool: StoragePool) -> Accessor {
        let counter = match pool {
            StoragePool::Instance => &mut self.pool,
            StoragePool::Io => &mut self.scratch,
        };
        let slot = *counter;
        *counter += 1;
        Accessor::Virtual { pool, slot }
    }
}

// =============================================================================
// Field Lowering
// =============================================================================

struct Lowered {
    field: Pending,
    companions: Vec<Pending>,
}

fn lower_field(
    schema: &str,
    index: usize,
    decl: &FieldDecl,
    registry: &dyn TypeRegistry,
    slots: &mut Slots,
) -> Result<Lowered> {
    check_modifiers(schema, decl)?;
    check_nullability(decl)?;

    let name = decl.name.as_str();
    let accessor = Accessor::Declared(index);
    let pointer = matches!(decl.ty, FieldType::Reference(_) | FieldType::ChunkPointer);
    let mut companions = Vec::new();

    // Pointers encode null as 0 and need no flag
    let null_flag = if decl.nullability == Nullability::Nullable && !pointer {
        let flag = slots.take(StoragePool::Io);
        companions.push((
            companion(format!("{name}$null"), flag, FieldKind::NullFlag, SizeDescriptor::fixed(WordSpace::Bit, 1))
                .with_generator(Arc::new(NullFlagGenerator { source: accessor })),
            Vec::new(),
        ));
        Some((flag, format!("{name}$null")))
    } else {
        None
    };

    let (kind, size, mut dependencies) = match &decl.ty {
        FieldType::Bool => (FieldKind::Bool, SizeDescriptor::fixed(WordSpace::Bit, 1), Vec::new()),
        FieldType::Enum { variants } => {
            if *variants == 0 {
                return Err(StoreError::InvalidSchema {
                    schema: schema.to_string(),
                    detail: format!("enum field {name} has no variants"),
                });
            }
            let bits = enum_bits(*variants);
            (
                FieldKind::Enum {
                    bits,
                    variants: *variants,
                },
                SizeDescriptor::fixed(WordSpace::Bit, u64::from(bits)),
                Vec::new(),
            )
        }
        FieldType::Int => lower_int(schema, accessor, decl, slots, &mut companions)?,
        FieldType::Float => (FieldKind::Float, SizeDescriptor::fixed(WordSpace::Byte, 8), Vec::new()),
        FieldType::Str | FieldType::Bytes if !decl.compressed => {
            let len = length_companion(name, accessor, slots, &mut companions);
            let kind = match decl.ty {
                FieldType::Str => FieldKind::Str { len },
                _ => FieldKind::Bytes { len },
            };
            (kind, SizeDescriptor::unknown(WordSpace::Byte, counter_size(len)), vec![format!("{name}$len")])
        }
        FieldType::Str | FieldType::Bytes => {
            let packed = slots.take(StoragePool::Io);
            let packed_size: SizeFn = Arc::new(move |ctx: &SizeContext<'_>| {
                Ok(4 + packed.get(ctx.instance).as_bytes().map_or(0, |b| b.len() as u64))
            });
            companions.push((
                companion(
                    format!("{name}$packed"),
                    packed,
                    FieldKind::Packed,
                    SizeDescriptor::bounded(WordSpace::Byte, 4, None, packed_size),
                )
                .with_generator(Arc::new(CompressGenerator {
                    source: accessor,
                    source_name: name.to_string(),
                })),
                Vec::new(),
            ));
            (
                FieldKind::CompressedBytes { packed },
                SizeDescriptor::fixed(WordSpace::Byte, 0),
                vec![format!("{name}$packed")],
            )
        }
        FieldType::Inline(target) => {
            let nested = registry.schema(target)?;
            let size = match nested.fixed_size() {
                Some(n) => SizeDescriptor::fixed(WordSpace::Byte, n),
                None => SizeDescriptor::unknown(WordSpace::Byte, record_size(accessor)),
            };
            (FieldKind::Inline { schema: nested }, size, Vec::new())
        }
        FieldType::Reference(target) => {
            if !registry.contains_schema(target) {
                return Err(StoreError::UnknownSchema(target.clone()));
            }
            (
                FieldKind::Reference {
                    schema: target.clone(),
                },
                SizeDescriptor::fixed(WordSpace::Byte, 8),
                Vec::new(),
            )
        }
        FieldType::ChunkPointer => (FieldKind::ChunkPointer, SizeDescriptor::fixed(WordSpace::Byte, 8), Vec::new()),
        FieldType::Dynamic => {
            let type_id = type_companion(name, accessor, TypeSource::Record, slots, &mut companions);
            (
                FieldKind::Dynamic { type_id },
                SizeDescriptor::unknown(WordSpace::Byte, record_size(accessor)),
                vec![format!("{name}$type")],
            )
        }
        FieldType::List(element) => {
            let len = length_companion(name, accessor, slots, &mut companions);
            let mut dependencies = vec![format!("{name}$len")];
            let element = match element {
                ElementType::Named(target) => ListElement::Named(registry.schema(target)?),
                ElementType::Dynamic => {
                    dependencies.push(format!("{name}$type"));
                    ListElement::Dynamic {
                        type_id: type_companion(name, accessor, TypeSource::FirstElement, slots, &mut companions),
                    }
                }
            };
            (
                FieldKind::List { element, len },
                SizeDescriptor::unknown(WordSpace::Byte, list_size(accessor)),
                dependencies,
            )
        }
    };

    let size = match &null_flag {
        Some((flag, flag_name)) => {
            dependencies.push(flag_name.clone());
            nullable_size(*flag, size)
        }
        None => size,
    };

    let field = FieldDescriptor::new(name, accessor, kind, size, FieldOrigin::Declared)
        .with_nullability(decl.nullability, null_flag.map(|(flag, _)| flag));
    Ok(Lowered {
        field: (field, dependencies),
        companions,
    })
}

fn lower_int(
    schema: &str,
    accessor: Accessor,
    decl: &FieldDecl,
    slots: &mut Slots,
    companions: &mut Vec<Pending>,
) -> Result<(FieldKind, Arc<SizeDescriptor>, Vec<String>)> {
    let signed = !decl.unsigned;
    match decl.number.unwrap_or_default() {
        NumberPolicy::Fixed(width) => Ok((
            FieldKind::Int {
                width: IntWidth::Fixed(width),
                signed,
            },
            SizeDescriptor::fixed(WordSpace::Byte, u64::from(width.bytes())),
            Vec::new(),
        )),
        NumberPolicy::Dynamic { min, max, retention } => {
            if min > max {
                return Err(StoreError::InvalidSchema {
                    schema: schema.to_string(),
                    detail: format!("field {} has minimum width above its maximum", decl.name),
                });
            }
            let pool = match retention {
                WidthRetention::GrowOnly => StoragePool::Instance,
                WidthRetention::Recompute => StoragePool::Io,
            };
            let width = slots.take(pool);
            let width_name = format!("{}$width", decl.name);
            companions.push((
                companion(width_name.clone(), width, FieldKind::Width, SizeDescriptor::fixed(WordSpace::Bit, 2))
                    .with_generator(Arc::new(WidthGenerator {
                        source: accessor,
                        source_name: decl.name.clone(),
                        signed,
                        min,
                        max,
                        retention,
                    })),
                Vec::new(),
            ));
            let floor = u64::from(min.bytes());
            let calc: SizeFn = Arc::new(move |ctx: &SizeContext<'_>| {
                Ok(width.get(ctx.instance).as_u64().unwrap_or(floor))
            });
            Ok((
                FieldKind::Int {
                    width: IntWidth::Dynamic { width, min, max },
                    signed,
                },
                SizeDescriptor::bounded(WordSpace::Byte, floor, Some(u64::from(max.bytes())), calc),
                vec![width_name],
            ))
        }
    }
}

fn check_modifiers(schema: &str, decl: &FieldDecl) -> Result<()> {
    let invalid = |detail: &str| {
        Err(StoreError::InvalidSchema {
            schema: schema.to_string(),
            detail: format!("field {} {}", decl.name, detail),
        })
    };
    let int = decl.ty == FieldType::Int;
    if decl.number.is_some() && !int {
        return invalid("has a numeric width but is not an integer");
    }
    if decl.unsigned && !int {
        return invalid("is marked unsigned but is not an integer");
    }
    if decl.compressed && !matches!(decl.ty, FieldType::Bytes) {
        return invalid("is marked compressed but is not a byte blob");
    }
    Ok(())
}

fn check_nullability(decl: &FieldDecl) -> Result<()> {
    let unsupported = match decl.nullability {
        Nullability::NotNull => false,
        Nullability::Nullable => matches!(decl.ty, FieldType::Bool) || decl.compressed,
        Nullability::DefaultIfNull => matches!(
            decl.ty,
            FieldType::Reference(_) | FieldType::ChunkPointer | FieldType::Dynamic
        ),
    };
    if unsupported {
        return Err(StoreError::UnsupportedNullability {
            field: decl.name.clone(),
            nullability: decl.nullability,
        });
    }
    Ok(())
}

/// Bits needed to hold ordinals `0..variants`
fn enum_bits(variants: u32) -> u8 {
    if variants <= 2 {
        1
    } else {
        (32 - (variants - 1).leading_zeros()) as u8
    }
}

// =============================================================================
// Companions & Size Functions
// =============================================================================

fn companion(name: String, accessor: Accessor, kind: FieldKind, size: Arc<SizeDescriptor>) -> FieldDescriptor {
    FieldDescriptor::new(name, accessor, kind, size, FieldOrigin::Companion)
}

fn length_companion(name: &str, source: Accessor, slots: &mut Slots, companions: &mut Vec<Pending>) -> Accessor {
    let len = slots.take(StoragePool::Io);
    companions.push((
        companion(format!("{name}$len"), len, FieldKind::Length, SizeDescriptor::fixed(WordSpace::Byte, 4))
            .with_generator(Arc::new(LengthGenerator {
                source,
                source_name: name.to_string(),
            })),
        Vec::new(),
    ));
    len
}

fn type_companion(
    name: &str,
    source: Accessor,
    mode: TypeSource,
    slots: &mut Slots,
    companions: &mut Vec<Pending>,
) -> Accessor {
    let type_id = slots.take(StoragePool::Io);
    companions.push((
        companion(format!("{name}$type"), type_id, FieldKind::TypeId, SizeDescriptor::fixed(WordSpace::Byte, 4))
            .with_generator(Arc::new(TypeIdGenerator {
                source,
                source_name: name.to_string(),
                mode,
            })),
        Vec::new(),
    ));
    type_id
}

/// Size read straight from a length companion
fn counter_size(len: Accessor) -> SizeFn {
    Arc::new(move |ctx: &SizeContext<'_>| Ok(len.get(ctx.instance).as_u64().unwrap_or(0)))
}

/// Encoded size of a nested record value
fn record_size(accessor: Accessor) -> SizeFn {
    Arc::new(move |ctx: &SizeContext<'_>| match accessor.get(ctx.instance) {
        Value::Record(nested) => nested.schema().size_of(ctx.env, nested),
        _ => Ok(0),
    })
}

/// Encoded size of every element of an inline list
fn list_size(accessor: Accessor) -> SizeFn {
    Arc::new(move |ctx: &SizeContext<'_>| match accessor.get(ctx.instance) {
        Value::List(items) => {
            let mut total = 0;
            for item in items {
                total += item.schema().size_of(ctx.env, item)?;
            }
            Ok(total)
        }
        _ => Ok(0),
    })
}

/// Wrap a size so a set null flag shrinks it to zero
fn nullable_size(flag: Accessor, base: Arc<SizeDescriptor>) -> Arc<SizeDescriptor> {
    let space = base.word_space();
    let max = base.max();
    let calc: SizeFn = Arc::new(move |ctx: &SizeContext<'_>| {
        if flag.get(ctx.instance).as_bool().unwrap_or(false) {
            Ok(0)
        } else {
            base.size_of(ctx)
        }
    });
    SizeDescriptor::bounded(space, 0, max, calc)
}
