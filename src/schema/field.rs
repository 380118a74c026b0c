//! Field descriptors
//!
//! A [`FieldDescriptor`] is the per-field contract of a compiled schema: how to reach
//! the value, how large it is, how it treats null, which fields it needs to know its
//! own size, and which generators derive its value before a write.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;

use crate::error::{Result, StoreError};
use crate::size::{SizeContext, SizeDescriptor, WordSpace};
use crate::value::{Instance, Value, NULL};

use super::bitgroup::BitGroup;
use super::decl::{NumberWidth, Nullability};
use super::generator::Generator;
use super::Schema;

// =============================================================================
// Storage Pools & Accessors
// =============================================================================

/// Companion storage region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoragePool {
    /// Lives as long as the owning instance
    Instance,
    /// Scratch, reset for every write/size/walk operation
    Io,
}

/// Where a field's value lives inside an [`Instance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// Declared field, by declaration index
    Declared(usize),
    /// Compiler-injected companion, by pool slot
    Virtual { pool: StoragePool, slot: usize },
    /// Merged bit group; has no value of its own
    Synthetic,
}

impl Accessor {
    pub fn get<'a>(&self, instance: &'a Instance) -> &'a Value {
        let slot = match *self {
            Accessor::Declared(i) => instance.values.get(i),
            Accessor::Virtual {
                pool: StoragePool::Instance,
                slot,
            } => instance.pool.get(slot),
            Accessor::Virtual {
                pool: StoragePool::Io,
                slot,
            } => instance.scratch.get(slot),
            Accessor::Synthetic => None,
        };
        slot.unwrap_or(&NULL)
    }

    pub(crate) fn get_mut<'a>(&self, instance: &'a mut Instance) -> Option<&'a mut Value> {
        match *self {
            Accessor::Declared(i) => instance.values.get_mut(i),
            Accessor::Virtual {
                pool: StoragePool::Instance,
                slot,
            } => instance.pool.get_mut(slot),
            Accessor::Virtual {
                pool: StoragePool::Io,
                slot,
            } => instance.scratch.get_mut(slot),
            Accessor::Synthetic => None,
        }
    }

    pub fn set(&self, instance: &mut Instance, value: Value) {
        if let Some(slot) = self.get_mut(instance) {
            *slot = value;
        }
    }

    /// Pool the value lives in (declared fields count as instance-lifetime)
    pub fn pool(&self) -> StoragePool {
        match *self {
            Accessor::Virtual { pool, .. } => pool,
            _ => StoragePool::Instance,
        }
    }
}

// =============================================================================
// Field Kinds
// =============================================================================

/// Width policy of a compiled integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    Fixed(NumberWidth),
    /// Width read from a companion field
    Dynamic {
        width: Accessor,
        min: NumberWidth,
        max: NumberWidth,
    },
}

/// Element codec of an inline list
#[derive(Debug, Clone)]
pub enum ListElement {
    Named(Arc<Schema>),
    /// Concrete type shared by every element, recorded in a type-id companion
    Dynamic { type_id: Accessor },
}

/// Encoding of a field
#[derive(Debug, Clone)]
pub enum FieldKind {
    // Bit-space kinds (always merged into a bit group)
    Bool,
    Enum { bits: u8, variants: u32 },
    NullFlag,
    Width,

    // Byte-space kinds
    Int { width: IntWidth, signed: bool },
    Float,
    Str { len: Accessor },
    Bytes { len: Accessor },
    /// Declared blob whose stored form is its packed companion
    CompressedBytes { packed: Accessor },
    /// Length-prefixed lz4 payload of a compressed blob
    Packed,
    Length,
    TypeId,
    Inline { schema: Arc<Schema> },
    Reference { schema: String },
    ChunkPointer,
    Dynamic { type_id: Accessor },
    List { element: ListElement, len: Accessor },
    BitGroup(Arc<BitGroup>),
}

impl FieldKind {
    fn classify(&self) -> FieldFlags {
        match self {
            FieldKind::Bool
            | FieldKind::Enum { .. }
            | FieldKind::NullFlag
            | FieldKind::Width
            | FieldKind::Int { .. }
            | FieldKind::Float
            | FieldKind::Length
            | FieldKind::TypeId => FieldFlags::PRIMITIVE,
            FieldKind::Str { .. }
            | FieldKind::Bytes { .. }
            | FieldKind::CompressedBytes { .. }
            | FieldKind::Packed => FieldFlags::empty(),
            FieldKind::Inline { schema } => pointer_flags(schema),
            FieldKind::List {
                element: ListElement::Named(schema),
                ..
            } => pointer_flags(schema),
            FieldKind::Reference { .. } | FieldKind::ChunkPointer => FieldFlags::POINTER_BEARING,
            FieldKind::Dynamic { .. }
            | FieldKind::List {
                element: ListElement::Dynamic { .. },
                ..
            } => FieldFlags::DYNAMIC | FieldFlags::POINTER_BEARING,
            FieldKind::BitGroup(group) => {
                let mut flags = FieldFlags::PRIMITIVE;
                for member in group.members() {
                    flags &= member.flags();
                }
                flags
            }
        }
    }
}

fn pointer_flags(schema: &Schema) -> FieldFlags {
    if schema.has_pointers() {
        FieldFlags::POINTER_BEARING
    } else {
        FieldFlags::empty()
    }
}

bitflags! {
    /// Lazily computed classification of a field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u8 {
        /// The field holds, or may hold, pointers into the store
        const POINTER_BEARING = 1;
        /// The concrete type is only known at runtime
        const DYNAMIC = 1 << 1;
        /// Primitive number, boolean or enum
        const PRIMITIVE = 1 << 2;
    }
}

/// Where a field comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrigin {
    Declared,
    Companion,
    Synthetic,
}

// =============================================================================
// Late Data
// =============================================================================

/// Value wired after construction, exactly once
#[derive(Debug, Clone)]
pub struct LateInit<T> {
    label: &'static str,
    cell: OnceLock<T>,
}

impl<T> LateInit<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self, owner: &str) -> Result<&T> {
        self.cell
            .get()
            .ok_or_else(|| StoreError::LateDataUninitialized(format!("{owner}.{}", self.label)))
    }

    pub fn init(&self, owner: &str, value: T) -> Result<()> {
        self.cell
            .set(value)
            .map_err(|_| StoreError::LateDataReinitialized(format!("{owner}.{}", self.label)))
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

// =============================================================================
// Field Descriptor
// =============================================================================

/// Compiled per-field contract
#[derive(Clone)]
pub struct FieldDescriptor {
    name: String,
    accessor: Accessor,
    kind: FieldKind,
    size: Arc<SizeDescriptor>,
    nullability: Nullability,
    null_flag: Option<Accessor>,
    /// Null values still occupy the full fixed size (zero filled)
    pad_null: bool,
    origin: FieldOrigin,
    dependencies: LateInit<Vec<String>>,
    generators: Vec<Arc<dyn Generator>>,
    flags: OnceLock<FieldFlags>,
}

impl FieldDescriptor {
    pub(crate) fn new(
        name: impl Into<String>,
        accessor: Accessor,
        kind: FieldKind,
        size: Arc<SizeDescriptor>,
        origin: FieldOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            accessor,
            kind,
            size,
            nullability: Nullability::NotNull,
            null_flag: None,
            pad_null: false,
            origin,
            dependencies: LateInit::new("dependencies"),
            generators: Vec::new(),
            flags: OnceLock::new(),
        }
    }

    pub(crate) fn with_nullability(mut self, nullability: Nullability, null_flag: Option<Accessor>) -> Self {
        self.nullability = nullability;
        self.null_flag = null_flag;
        self
    }

    pub(crate) fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generators.push(generator);
        self
    }

    pub(crate) fn with_size(mut self, size: Arc<SizeDescriptor>) -> Self {
        self.size = size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accessor(&self) -> Accessor {
        self.accessor
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn size_descriptor(&self) -> &Arc<SizeDescriptor> {
        &self.size
    }

    pub fn nullability(&self) -> Nullability {
        self.nullability
    }

    /// Companion holding this field's null flag, if it has one
    pub fn null_flag(&self) -> Option<Accessor> {
        self.null_flag
    }

    pub fn pads_null(&self) -> bool {
        self.pad_null
    }

    pub fn origin(&self) -> FieldOrigin {
        self.origin
    }

    pub fn is_virtual(&self) -> bool {
        self.origin == FieldOrigin::Companion
    }

    /// Names of the fields this field reads to compute its own size
    pub fn dependencies(&self) -> Result<&[String]> {
        self.dependencies.get(&self.name).map(Vec::as_slice)
    }

    pub(crate) fn init_dependencies(&self, dependencies: Vec<String>) -> Result<()> {
        self.dependencies.init(&self.name, dependencies)
    }

    pub fn generators(&self) -> &[Arc<dyn Generator>] {
        &self.generators
    }

    pub fn flags(&self) -> FieldFlags {
        *self.flags.get_or_init(|| self.kind.classify())
    }

    pub fn is_pointer_bearing(&self) -> bool {
        self.flags().contains(FieldFlags::POINTER_BEARING)
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags().contains(FieldFlags::DYNAMIC)
    }

    pub fn is_primitive(&self) -> bool {
        self.flags().contains(FieldFlags::PRIMITIVE)
    }

    pub fn get<'a>(&self, instance: &'a Instance) -> &'a Value {
        self.accessor.get(instance)
    }

    pub fn set(&self, instance: &mut Instance, value: Value) {
        self.accessor.set(instance, value);
    }

    /// True when the field's stored null flag (or its value) says null
    pub fn is_null_in(&self, instance: &Instance) -> bool {
        match self.null_flag {
            Some(flag) => flag.get(instance).as_bool().unwrap_or(false),
            None => self.get(instance).is_null(),
        }
    }

    /// Size of the field for `ctx.instance`, in bytes
    pub fn byte_size(&self, ctx: &SizeContext<'_>) -> Result<u64> {
        self.size.size_in(WordSpace::Byte, ctx)
    }

    /// Value a fresh instance holds for this field
    pub fn default_value(&self) -> Value {
        if self.nullability == Nullability::Nullable {
            return Value::Null;
        }
        match &self.kind {
            FieldKind::Bool => Value::Bool(false),
            FieldKind::Enum { .. } => Value::Enum(0),
            FieldKind::Int { signed: true, .. } => Value::Int(0),
            FieldKind::Int { signed: false, .. } => Value::UInt(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Str { .. } => Value::Str(String::new()),
            FieldKind::Bytes { .. } | FieldKind::CompressedBytes { .. } => Value::Bytes(Vec::new()),
            FieldKind::Inline { schema } => Value::Record(Box::new(Instance::new(schema))),
            FieldKind::List { .. } => Value::List(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Specialize the field into an equivalent fixed-size variant
    ///
    /// Dynamic-width integers pick their maximum width up front; nullable fields with
    /// a bounded maximum keep their null flag and zero-fill null values.
    pub fn force_max_as_fixed_size(&self) -> Result<FieldDescriptor> {
        if self.size.has_fixed() {
            return Ok(self.clone());
        }
        if let FieldKind::Int {
            width: IntWidth::Dynamic { max, .. },
            signed,
        } = self.kind
        {
            let width_name = format!("{}$width", self.name);
            let mut fixed = FieldDescriptor::new(
                self.name.clone(),
                self.accessor,
                FieldKind::Int {
                    width: IntWidth::Fixed(max),
                    signed,
                },
                SizeDescriptor::fixed(WordSpace::Byte, u64::from(max.bytes())),
                self.origin,
            )
            .with_nullability(self.nullability, self.null_flag);
            fixed.generators = self.generators.clone();
            if self.null_flag.is_some() {
                fixed.pad_null = true;
            }
            let dependencies = self.dependencies()?;
            fixed.init_dependencies(dependencies.iter().filter(|d| **d != width_name).cloned().collect())?;
            return Ok(fixed);
        }

        if self.null_flag.is_some() {
            if let Some(max) = self.size.max() {
                if self.size.min() == 0 && self.base_is_fixed(max) {
                    let mut fixed = self.clone().with_size(SizeDescriptor::fixed(self.size.word_space(), max));
                    fixed.pad_null = true;
                    return Ok(fixed);
                }
            }
        }

        Err(StoreError::FixedFormatUnsupported {
            field: self.name.clone(),
            cause: match self.size.max() {
                None => "size is unbounded".to_string(),
                Some(max) => format!("size varies up to {max} and the kind cannot pad to it"),
            },
        })
    }

    fn base_is_fixed(&self, max: u64) -> bool {
        match &self.kind {
            FieldKind::Int {
                width: IntWidth::Fixed(w),
                ..
            } => u64::from(w.bytes()) == max,
            FieldKind::Enum { bits, .. } => u64::from(*bits) == max,
            FieldKind::Float => max == 8,
            FieldKind::Inline { schema } => schema.fixed_size() == Some(max),
            _ => false,
        }
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.accessor == other.accessor
    }
}

impl Eq for FieldDescriptor {}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("accessor", &self.accessor)
            .field("size", &self.size)
            .field("nullability", &self.nullability)
            .finish()
    }
}
