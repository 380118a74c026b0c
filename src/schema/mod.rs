//! Schema Module
//!
//! Compiled record layouts.
//!
//! ## Pipeline
//! ```text
//! SchemaDecl ──► field descriptors + companions ──► dependency order ──► bit groups
//!                                                                          │
//!                                        CommandStream ◄── FieldSet ◄──────┘
//! ```
//!
//! ## On-disk layout
//! - Fields appear in compiled order with no padding between them
//! - A bit group takes a whole number of bytes, integrity bits in the high bits
//! - An extensible record ends with a u32 extension type id (0 = none) followed by
//!   the extension record inline

mod bitgroup;
mod codec;
mod compiler;
mod decl;
mod field;
mod generator;
mod order;

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::command::CommandStream;
use crate::config::Config;
use crate::registry::TypeRegistry;

pub use bitgroup::{checksum, remainder_from_checksum, BitGroup, BitStrategy, MAX_PACKED_BITS};
pub use decl::{
    ElementType, FieldDecl, FieldType, NumberPolicy, NumberWidth, Nullability, SchemaDecl, SchemaDeclBuilder,
    WidthRetention,
};
pub use field::{
    Accessor, FieldDescriptor, FieldFlags, FieldKind, FieldOrigin, IntWidth, LateInit, ListElement, StoragePool,
};
pub use generator::{
    run_generators, CompressGenerator, GenContext, Generator, LengthGenerator, NullFlagGenerator, TypeIdGenerator,
    TypeSource, WidthGenerator,
};
pub use order::OrderKey;

pub(crate) use compiler::compile;

// =============================================================================
// Codec Environment
// =============================================================================

/// Collaborators every codec, size and walk operation needs
#[derive(Clone, Copy)]
pub struct CodecEnv<'a> {
    pub registry: &'a dyn TypeRegistry,
    pub config: &'a Config,
    /// Whether type-id generation may record ids for unseen types
    pub allow_new_types: bool,
}

impl<'a> CodecEnv<'a> {
    pub fn new(registry: &'a dyn TypeRegistry, config: &'a Config) -> Self {
        Self {
            registry,
            config,
            allow_new_types: config.allow_new_type_ids,
        }
    }

    /// Same environment, but type-id generation never records new ids
    pub fn frozen_types(self) -> Self {
        Self {
            allow_new_types: false,
            ..self
        }
    }
}

// =============================================================================
// Field Set
// =============================================================================

/// Final ordered fields of a schema, bit runs merged into groups
#[derive(Debug, Clone)]
pub struct FieldSet {
    fields: Vec<Arc<FieldDescriptor>>,
}

impl FieldSet {
    pub(crate) fn new(fields: Vec<Arc<FieldDescriptor>>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<FieldDescriptor>> {
        self.fields.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<FieldDescriptor>> {
        self.fields.iter()
    }

    /// Names in final order (groups appear under their synthetic names)
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name()).collect()
    }

    /// Fields in final order with every group expanded into its members
    pub fn flattened(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().flat_map(|f| match f.kind() {
            FieldKind::BitGroup(group) => group.members().iter(),
            _ => std::slice::from_ref(f).iter(),
        })
    }

    /// Names in final order with groups expanded
    pub fn flat_names(&self) -> Vec<&str> {
        self.flattened().map(|f| f.name()).collect()
    }
}

impl Index<usize> for FieldSet {
    type Output = Arc<FieldDescriptor>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.fields[index]
    }
}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a Arc<FieldDescriptor>;
    type IntoIter = std::slice::Iter<'a, Arc<FieldDescriptor>>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Compiled layout of one record type
pub struct Schema {
    name: String,
    immutable: bool,
    extensible: bool,
    /// Declared fields in declaration order
    declared: Vec<Arc<FieldDescriptor>>,
    fields: FieldSet,
    /// Generator run order (final order, groups flattened)
    generation_order: Vec<Arc<FieldDescriptor>>,
    /// Declared fields, companions and groups by compiled name
    by_name: HashMap<String, Arc<FieldDescriptor>>,
    declared_index: HashMap<String, usize>,
    pool_slots: usize,
    scratch_slots: usize,
    commands: CommandStream,
    has_pointers: bool,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn is_extensible(&self) -> bool {
        self.extensible
    }

    pub fn declared_fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.declared
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn commands(&self) -> &CommandStream {
        &self.commands
    }

    pub fn declared_index(&self, name: &str) -> Option<usize> {
        self.declared_index.get(name).copied()
    }

    /// Any field by compiled name: declared, companion (`age$width`) or group (`[a|b]`)
    pub fn field_by_name(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.by_name.get(name)
    }

    pub fn pool_slots(&self) -> usize {
        self.pool_slots
    }

    pub fn scratch_slots(&self) -> usize {
        self.scratch_slots
    }

    /// True when some declared field holds, or may hold, pointers into the store
    pub fn has_pointers(&self) -> bool {
        self.has_pointers
    }

    /// Encoded size shared by every instance, if the layout is fixed
    pub fn fixed_size(&self) -> Option<u64> {
        if self.extensible {
            return None;
        }
        self.fields.iter().map(|f| f.size_descriptor().fixed_size()).sum()
    }

    /// Smallest possible encoded size
    pub fn min_size(&self) -> u64 {
        let fields: u64 = self.fields.iter().map(|f| f.size_descriptor().min()).sum();
        if self.extensible {
            fields + 4
        } else {
            fields
        }
    }

    /// Largest possible encoded size, if bounded
    pub fn max_size(&self) -> Option<u64> {
        if self.extensible {
            return None;
        }
        self.fields.iter().map(|f| f.size_descriptor().max()).sum()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields.names())
            .field("immutable", &self.immutable)
            .field("extensible", &self.extensible)
            .finish()
    }
}
