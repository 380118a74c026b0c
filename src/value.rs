//! Values and record instances
//!
//! An [`Instance`] is one live record of a compiled [`Schema`]. Besides the declared
//! field values it carries two companion regions addressed by slot numbers fixed at
//! schema compile time:
//!
//! - `pool`: instance-lifetime companions (e.g. grow-only numeric widths)
//! - `scratch`: I/O-operation companions (null flags, lengths, type ids), reset at the
//!   start of every write, size computation or walk
//!
//! Neither region takes part in equality.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::schema::{FieldDescriptor, Nullability, Schema};

// =============================================================================
// Chunk Pointers
// =============================================================================

/// Opaque pointer to a chunk of the backing store. The raw value 0 is reserved for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPtr(NonZeroU64);

impl ChunkPtr {
    /// Build a pointer from its raw on-disk value (0 means null)
    pub fn from_raw(raw: u64) -> Option<ChunkPtr> {
        NonZeroU64::new(raw).map(ChunkPtr)
    }

    /// Raw on-disk value
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ChunkPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Values
// =============================================================================

/// A field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Enum(u32),
    Str(String),
    Bytes(Vec<u8>),
    /// Inline nested record (also used for polymorphic values)
    Record(Box<Instance>),
    /// Pointer into the backing store (referenced record or raw chunk chain)
    Ptr(ChunkPtr),
    /// Homogeneous list of inline nested records
    List(Vec<Instance>),
}

pub(crate) static NULL: Value = Value::Null;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in type mismatch reports
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Enum(_) => "enum",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Record(_) => "record",
            Value::Ptr(_) => "pointer",
            Value::List(_) => "list",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Enum(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<ChunkPtr> {
        match self {
            Value::Ptr(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Instance> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Instance]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self {
        Value::Record(Box::new(v))
    }
}

impl From<ChunkPtr> for Value {
    fn from(v: ChunkPtr) -> Self {
        Value::Ptr(v)
    }
}

impl From<Vec<Instance>> for Value {
    fn from(v: Vec<Instance>) -> Self {
        Value::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Instances
// =============================================================================

/// One record of a compiled schema
#[derive(Clone)]
pub struct Instance {
    schema: Arc<Schema>,
    pub(crate) values: Vec<Value>,
    pub(crate) pool: Vec<Value>,
    pub(crate) scratch: Vec<Value>,
    extension: Option<Box<Instance>>,
}

impl Instance {
    /// Create an instance with every declared field at its default
    pub fn new(schema: &Arc<Schema>) -> Instance {
        let values = schema
            .declared_fields()
            .iter()
            .map(|f| f.default_value())
            .collect();
        Instance {
            schema: Arc::clone(schema),
            values,
            pool: vec![Value::Null; schema.pool_slots()],
            scratch: vec![Value::Null; schema.scratch_slots()],
            extension: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Declared field values, in declaration order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get a declared field by name
    pub fn get(&self, name: &str) -> Result<&Value> {
        let index = self.declared_index(name)?;
        Ok(&self.values[index])
    }

    /// Set a declared field by name
    ///
    /// Null written to a `DefaultIfNull` field stores the field's default instead.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.declared_index(name)?;
        let field = Arc::clone(&self.schema.declared_fields()[index]);
        self.set_field(&field, value.into());
        Ok(())
    }

    /// Builder-style [`Instance::set`]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Instance> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Read any field (declared or companion) through its accessor
    pub fn field_value(&self, field: &FieldDescriptor) -> &Value {
        field.get(self)
    }

    pub(crate) fn field_value_mut(&mut self, field: &FieldDescriptor) -> Option<&mut Value> {
        field.accessor().get_mut(self)
    }

    /// Write any field through its accessor
    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) {
        let value = if value.is_null() && field.nullability() == Nullability::DefaultIfNull {
            field.default_value()
        } else {
            value
        };
        field.set(self, value);
    }

    /// Look up a companion or declared field value by its compiled name (e.g. `"age$width"`)
    pub fn companion(&self, name: &str) -> Option<&Value> {
        self.schema.field_by_name(name).map(|f| f.get(self))
    }

    /// Runtime extension record of an extensible schema
    pub fn extension(&self) -> Option<&Instance> {
        self.extension.as_deref()
    }

    pub(crate) fn extension_mut(&mut self) -> Option<&mut Instance> {
        self.extension.as_deref_mut()
    }

    /// Attach (or clear) the runtime extension record
    pub fn set_extension(&mut self, extension: Option<Instance>) -> Result<()> {
        if extension.is_some() && !self.schema.is_extensible() {
            return Err(StoreError::InvalidSchema {
                schema: self.schema.name().to_string(),
                detail: "schema does not accept extension records".to_string(),
            });
        }
        self.extension = extension.map(Box::new);
        Ok(())
    }

    /// Start a copy-on-write builder seeded with this instance's values
    pub fn builder(&self) -> InstanceBuilder {
        InstanceBuilder {
            inner: self.clone(),
        }
    }

    /// Copy of this instance with one field replaced
    pub fn with_field(&self, field: &FieldDescriptor, value: Value) -> Instance {
        let mut builder = self.builder();
        builder.set_field(field, value);
        builder.build()
    }

    pub(crate) fn reset_scratch(&mut self) {
        for slot in &mut self.scratch {
            *slot = Value::Null;
        }
    }

    fn declared_index(&self, name: &str) -> Result<usize> {
        self.schema
            .declared_index(name)
            .ok_or_else(|| StoreError::UnknownField {
                schema: self.schema.name().to_string(),
                field: name.to_string(),
            })
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.values == other.values
            && self.extension == other.extension
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.name());
        for (field, value) in self.schema.declared_fields().iter().zip(&self.values) {
            s.field(field.name(), value);
        }
        if let Some(ext) = &self.extension {
            s.field("$extension", ext);
        }
        s.finish()
    }
}

/// Copy-on-write builder producing a new [`Instance`]
pub struct InstanceBuilder {
    inner: Instance,
}

impl InstanceBuilder {
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.inner.set(name, value)?;
        Ok(self)
    }

    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) {
        self.inner.set_field(field, value);
    }

    pub fn extension(mut self, extension: Option<Instance>) -> Result<Self> {
        self.inner.set_extension(extension)?;
        Ok(self)
    }

    pub fn build(self) -> Instance {
        self.inner
    }
}
