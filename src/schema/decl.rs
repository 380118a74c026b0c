//! Schema declarations
//!
//! Plain data describing a record type before compilation. Declarations are
//! serializable so a registry can snapshot them.

use serde::{Deserialize, Serialize};

/// How a field treats null
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Nullability {
    /// Null is rejected on write
    #[default]
    NotNull,
    /// Null is stored (via a null-flag companion where the kind needs one)
    Nullable,
    /// Null is replaced by the field's default value
    DefaultIfNull,
}

/// Byte width of a stored integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NumberWidth {
    W1,
    W2,
    W4,
    W8,
}

impl NumberWidth {
    pub const ALL: [NumberWidth; 4] = [
        NumberWidth::W1,
        NumberWidth::W2,
        NumberWidth::W4,
        NumberWidth::W8,
    ];

    pub fn bytes(self) -> u8 {
        match self {
            NumberWidth::W1 => 1,
            NumberWidth::W2 => 2,
            NumberWidth::W4 => 4,
            NumberWidth::W8 => 8,
        }
    }

    /// Two-bit code used by width companions
    pub fn code(self) -> u64 {
        match self {
            NumberWidth::W1 => 0,
            NumberWidth::W2 => 1,
            NumberWidth::W4 => 2,
            NumberWidth::W8 => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<NumberWidth> {
        NumberWidth::ALL.get(code as usize).copied()
    }

    /// Exact width for a byte count
    pub fn from_bytes(bytes: u64) -> Option<NumberWidth> {
        NumberWidth::ALL.into_iter().find(|w| u64::from(w.bytes()) == bytes)
    }

    /// Smallest width able to hold an unsigned value
    pub fn for_unsigned(value: u64) -> NumberWidth {
        NumberWidth::ALL
            .into_iter()
            .find(|w| w.fits_unsigned(value))
            .unwrap_or(NumberWidth::W8)
    }

    /// Smallest width able to hold a signed value in two's complement
    pub fn for_signed(value: i64) -> NumberWidth {
        NumberWidth::ALL
            .into_iter()
            .find(|w| w.fits_signed(value))
            .unwrap_or(NumberWidth::W8)
    }

    pub fn fits_unsigned(self, value: u64) -> bool {
        match self {
            NumberWidth::W8 => true,
            w => value < 1u64 << (u32::from(w.bytes()) * 8),
        }
    }

    pub fn fits_signed(self, value: i64) -> bool {
        match self {
            NumberWidth::W8 => true,
            w => {
                let half = 1i64 << (u32::from(w.bytes()) * 8 - 1);
                (-half..half).contains(&value)
            }
        }
    }
}

/// Whether a dynamic width may shrink between writes of the same instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WidthRetention {
    /// Width is recomputed from scratch on every write
    Recompute,
    /// Width never shrinks below the previously stored width
    GrowOnly,
}

/// Storage policy for integer fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberPolicy {
    Fixed(NumberWidth),
    Dynamic {
        min: NumberWidth,
        max: NumberWidth,
        retention: WidthRetention,
    },
}

impl Default for NumberPolicy {
    fn default() -> Self {
        NumberPolicy::Fixed(NumberWidth::W8)
    }
}

/// Element type of an inline list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    /// Every element is a record of the named schema
    Named(String),
    /// Every element shares one concrete type chosen at runtime
    Dynamic,
}

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Enum { variants: u32 },
    Str,
    Bytes,
    /// Nested record stored inline
    Inline(String),
    /// Nested record stored in its own chunk, referenced by pointer
    Reference(String),
    /// Head of a raw chunk chain
    ChunkPointer,
    /// Polymorphic record stored inline behind a type id
    Dynamic,
    /// Homogeneous list of inline records
    List(ElementType),
}

/// Declaration of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
    pub nullability: Nullability,
    pub number: Option<NumberPolicy>,
    pub unsigned: bool,
    pub compressed: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullability: Nullability::NotNull,
            number: None,
            unsigned: false,
            compressed: false,
        }
    }

    pub fn nullability(mut self, nullability: Nullability) -> Self {
        self.nullability = nullability;
        self
    }

    pub fn nullable(self) -> Self {
        self.nullability(Nullability::Nullable)
    }

    pub fn default_if_null(self) -> Self {
        self.nullability(Nullability::DefaultIfNull)
    }

    pub fn fixed_width(mut self, width: NumberWidth) -> Self {
        self.number = Some(NumberPolicy::Fixed(width));
        self
    }

    pub fn dynamic_width(mut self, min: NumberWidth, max: NumberWidth, retention: WidthRetention) -> Self {
        self.number = Some(NumberPolicy::Dynamic { min, max, retention });
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

/// Declaration of one record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    /// Explicit field order (template-derived types only), companions included
    pub manual_order: Option<Vec<String>>,
    /// Instances are never mutated in place by a walk
    pub immutable: bool,
    /// Instances may carry a runtime extension record after their fields
    pub extensible: bool,
    /// Force every field to a fixed size
    pub fixed_layout: bool,
}

impl SchemaDecl {
    pub fn builder(name: impl Into<String>) -> SchemaDeclBuilder {
        SchemaDeclBuilder {
            decl: SchemaDecl {
                name: name.into(),
                fields: Vec::new(),
                manual_order: None,
                immutable: false,
                extensible: false,
                fixed_layout: false,
            },
        }
    }
}

/// Builder for SchemaDecl
pub struct SchemaDeclBuilder {
    decl: SchemaDecl,
}

impl SchemaDeclBuilder {
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.decl.fields.push(field);
        self
    }

    pub fn manual_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decl.manual_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn immutable(mut self) -> Self {
        self.decl.immutable = true;
        self
    }

    pub fn extensible(mut self) -> Self {
        self.decl.extensible = true;
        self
    }

    pub fn fixed_layout(mut self) -> Self {
        self.decl.fixed_layout = true;
        self
    }

    pub fn build(self) -> SchemaDecl {
        self.decl
    }
}
