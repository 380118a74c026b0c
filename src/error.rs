//! Error types for fieldstore
//!
//! Provides a unified error type for schema compilation, encoding, storage and walking.

use thiserror::Error;

use crate::schema::Nullability;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for fieldstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: u64, remaining: u64 },

    // -------------------------------------------------------------------------
    // Schema Compile Errors
    // -------------------------------------------------------------------------
    #[error("Dependency cycle in schema {schema}: {cycle}")]
    DependencyCycle { schema: String, cycle: String },

    #[error("Manual field order of {schema} is invalid: {detail}")]
    ManualOrderMismatch { schema: String, detail: String },

    #[error("Duplicate field {field} in schema {schema}")]
    DuplicateField { schema: String, field: String },

    #[error("Field {field} does not support nullability {nullability:?}")]
    UnsupportedNullability {
        field: String,
        nullability: Nullability,
    },

    #[error("Invalid schema {schema}: {detail}")]
    InvalidSchema { schema: String, detail: String },

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Recursive compilation of schema {0}")]
    RecursiveCompilation(String),

    #[error("Timed out waiting for schema {0} to compile")]
    CompileTimeout(String),

    #[error("Field {field} cannot be stored with a fixed size: {cause}")]
    FixedFormatUnsupported { field: String, cause: String },

    #[error("Late data {0} was read before it was initialized")]
    LateDataUninitialized(String),

    #[error("Late data {0} was initialized twice")]
    LateDataReinitialized(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Data corruption in {field}: {detail}")]
    Corruption { field: String, detail: String },

    #[error("Numeric overflow in {field}: value needs {required} bytes, maximum is {max}")]
    NumericOverflow { field: String, required: u8, max: u8 },

    #[error("Null value in non-null field {0}")]
    NullValue(String),

    #[error("Type mismatch in {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("Unknown field {field} in schema {schema}")]
    UnknownField { schema: String, field: String },

    #[error("Compression error: {0}")]
    Compression(String),

    // -------------------------------------------------------------------------
    // Type Registry Errors
    // -------------------------------------------------------------------------
    #[error("Unknown type id {0}")]
    UnknownTypeId(u32),

    #[error("Type {0} has no registered id")]
    UnregisteredType(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Chunk not found: {0}")]
    ChunkNotFound(u64),

    #[error("Store is read-only: cannot {0}")]
    ReadOnly(String),

    // -------------------------------------------------------------------------
    // Walker Errors
    // -------------------------------------------------------------------------
    #[error("Invalid walk flow code: {0:#x}")]
    InvalidWalkFlow(u32),

    #[error("Walk failed at {}: {source}", chain.join(" -> "))]
    Walk {
        chain: Vec<String>,
        source: Box<StoreError>,
    },

    #[error("Malformed command stream at byte {position}: {detail}")]
    MalformedCommands { position: usize, detail: String },

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Snapshot corruption detected: {0}")]
    SnapshotCorruption(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True for failures of the backing data (storage, decode, integrity) as opposed to
    /// programmer errors or schema problems.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::UnexpectedEof { .. }
                | StoreError::Corruption { .. }
                | StoreError::ChunkNotFound(_)
                | StoreError::UnknownTypeId(_)
                | StoreError::Compression(_)
                | StoreError::Walk { .. }
        )
    }

    /// Prepend a frame to the instance chain of a walk failure
    pub(crate) fn in_walk_frame(self, frame: String) -> StoreError {
        match self {
            StoreError::Walk { mut chain, source } => {
                chain.insert(0, frame);
                StoreError::Walk { chain, source }
            }
            other => StoreError::Walk {
                chain: vec![frame],
                source: Box::new(other),
            },
        }
    }

    /// Unwrap nested walk context down to the underlying failure
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::Walk { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
