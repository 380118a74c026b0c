//! # fieldstore
//!
//! A schema-driven binary record layout engine with:
//! - Size descriptors unifying bit/byte and fixed/bounded/unknown sizes
//! - Dependency-ordered fields with generated companions (null flags, lengths, widths)
//! - Bit-packed field groups with checksum / sentinel corruption detection
//! - A compiled command stream driving pointer walks over persisted records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SchemaRegistry                           │
//! │      (declarations, compile-once cache, type ids)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ compile
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Schema                                 │
//! │   FieldSet (ordered, bit groups) + CommandStream             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Codec    │          │   Walker    │
//!   │ (read/write)│          │ (pointers)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          └───────────┬────────────┘
//!                      ▼
//!              ┌──────────────┐
//!              │ DataProvider │
//!              │  (chunks)    │
//!              └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod value;
pub mod size;
pub mod io;
pub mod schema;
pub mod command;
pub mod walker;
pub mod store;
pub mod registry;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::Config;
pub use value::{ChunkPtr, Instance, Value};
pub use schema::{CodecEnv, FieldDecl, FieldType, Schema, SchemaDecl};
pub use store::{DataProvider, MemoryStore};
pub use registry::{SchemaRegistry, TypeRegistry};
pub use walker::{Flow, Visit, WalkFlags, Walker};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of fieldstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
