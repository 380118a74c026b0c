//! Registry Module
//!
//! Schema declarations, the compile-once schema cache and the type-id table.
//!
//! ## Responsibilities
//! - Hold declarations by name and compile each one at most once
//! - Map schema names to compact type ids for polymorphic fields and extensions
//! - Compile schemas on a background thread on request
//! - Save and restore declarations plus type ids as a snapshot file

mod cache;
mod snapshot;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver};
use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::schema::{self, CodecEnv, Schema, SchemaDecl};

use cache::SchemaCache;

pub use snapshot::Snapshot;

/// Name/id lookups consumed by the codec
pub trait TypeRegistry: Send + Sync {
    /// Compact id of a schema, recording a new one only if `allow_new`
    fn type_to_id(&self, name: &str, allow_new: bool) -> Result<u32>;

    /// Schema name behind an id
    fn id_to_type(&self, id: u32) -> Result<String>;

    /// Compiled schema by name
    fn schema(&self, name: &str) -> Result<Arc<Schema>>;

    /// Whether a schema of this name is known
    fn contains_schema(&self, name: &str) -> bool;
}

// =============================================================================
// Type Table
// =============================================================================

/// Bidirectional name/id map. Id 0 is reserved for "no type".
#[derive(Debug, Default)]
struct TypeTable {
    ids: BTreeMap<String, u32>,
    names: HashMap<u32, String>,
    next_id: u32,
}

impl TypeTable {
    fn insert(&mut self, name: &str, id: u32) {
        self.ids.insert(name.to_string(), id);
        self.names.insert(id, name.to_string());
        self.next_id = self.next_id.max(id + 1);
    }

    fn assign(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.next_id.max(1);
        self.insert(name, id);
        id
    }
}

// =============================================================================
// Schema Registry
// =============================================================================

/// Declarations, compiled schemas and type ids
pub struct SchemaRegistry {
    config: Config,
    decls: RwLock<BTreeMap<String, SchemaDecl>>,
    cache: SchemaCache,
    types: RwLock<TypeTable>,
}

impl SchemaRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            decls: RwLock::new(BTreeMap::new()),
            cache: SchemaCache::default(),
            types: RwLock::new(TypeTable::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Codec environment backed by this registry
    pub fn env(&self) -> CodecEnv<'_> {
        CodecEnv::new(self, &self.config)
    }

    /// Add a declaration
    ///
    /// Re-registering an identical declaration is a no-op. A changed declaration is
    /// accepted until the schema has been compiled.
    pub fn register(&self, decl: SchemaDecl) -> Result<()> {
        let mut decls = self.decls.write();
        if let Some(existing) = decls.get(&decl.name) {
            if *existing == decl {
                return Ok(());
            }
            if self.cache.contains(&decl.name) {
                return Err(StoreError::InvalidSchema {
                    schema: decl.name.clone(),
                    detail: "already compiled from a different declaration".to_string(),
                });
            }
        }
        tracing::debug!("Registered schema {}", decl.name);
        decls.insert(decl.name.clone(), decl);
        Ok(())
    }

    pub fn register_all<I>(&self, decls: I) -> Result<()>
    where
        I: IntoIterator<Item = SchemaDecl>,
    {
        for decl in decls {
            self.register(decl)?;
        }
        Ok(())
    }

    pub fn declaration(&self, name: &str) -> Option<SchemaDecl> {
        self.decls.read().get(name).cloned()
    }

    /// Every declaration, sorted by name
    pub fn declarations(&self) -> Vec<SchemaDecl> {
        self.decls.read().values().cloned().collect()
    }

    /// Number of schemas compiled so far
    pub fn compiled_count(&self) -> usize {
        self.cache.len()
    }

    /// Compile a schema on a background thread
    pub fn compile_in_background(self: &Arc<Self>, name: &str) -> PendingSchema {
        let (tx, rx) = channel::bounded(1);
        let fallback = tx.clone();
        let registry = Arc::clone(self);
        let target = name.to_string();

        let spawned = std::thread::Builder::new()
            .name(format!("compile-{name}"))
            .spawn(move || {
                let _ = tx.send(registry.schema(&target));
            });
        if let Err(e) = spawned {
            let _ = fallback.send(Err(StoreError::Io(e)));
        }

        PendingSchema {
            name: name.to_string(),
            rx,
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn snapshot(&self) -> Snapshot {
        let type_ids = self
            .types
            .read()
            .ids
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        Snapshot {
            declarations: self.declarations(),
            type_ids,
        }
    }

    /// Rebuild a registry from a snapshot; schemas compile lazily on first use
    pub fn from_snapshot(snapshot: Snapshot, config: Config) -> Result<Self> {
        let registry = SchemaRegistry::new(config);
        registry.register_all(snapshot.declarations)?;
        {
            let mut types = registry.types.write();
            for (name, id) in snapshot.type_ids {
                if id == 0 || types.names.contains_key(&id) {
                    return Err(StoreError::SnapshotCorruption(format!(
                        "type id {id} of {name} is reserved or duplicated"
                    )));
                }
                types.insert(&name, id);
            }
        }
        Ok(registry)
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        snapshot.write_to(path)?;
        tracing::info!(
            "Saved registry snapshot to {} ({} schemas, {} type ids)",
            path.display(),
            snapshot.declarations.len(),
            snapshot.type_ids.len()
        );
        Ok(())
    }

    pub fn load_snapshot(path: &Path, config: Config) -> Result<Self> {
        let snapshot = Snapshot::read_from(path)?;
        tracing::info!(
            "Loaded registry snapshot from {} ({} schemas)",
            path.display(),
            snapshot.declarations.len()
        );
        SchemaRegistry::from_snapshot(snapshot, config)
    }
}

impl TypeRegistry for SchemaRegistry {
    fn type_to_id(&self, name: &str, allow_new: bool) -> Result<u32> {
        if let Some(id) = self.types.read().ids.get(name) {
            return Ok(*id);
        }
        if !allow_new {
            return Err(StoreError::UnregisteredType(name.to_string()));
        }
        if !self.contains_schema(name) {
            return Err(StoreError::UnknownSchema(name.to_string()));
        }
        let id = self.types.write().assign(name);
        tracing::debug!("Assigned type id {} to {}", id, name);
        Ok(id)
    }

    fn id_to_type(&self, id: u32) -> Result<String> {
        self.types
            .read()
            .names
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownTypeId(id))
    }

    fn schema(&self, name: &str) -> Result<Arc<Schema>> {
        self.cache.get_or_compile(
            name,
            self.config.compile_wait_slice(),
            self.config.compile_wait_limit(),
            || {
                let decl = self
                    .declaration(name)
                    .ok_or_else(|| StoreError::UnknownSchema(name.to_string()))?;
                schema::compile(&decl, self)
            },
        )
    }

    fn contains_schema(&self, name: &str) -> bool {
        self.decls.read().contains_key(name)
    }
}

// =============================================================================
// Background Compilation
// =============================================================================

/// Handle to a schema compiling on another thread
pub struct PendingSchema {
    name: String,
    rx: Receiver<Result<Arc<Schema>>>,
}

impl PendingSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the result can be taken without blocking
    pub fn is_ready(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Block until compilation finishes
    pub fn await_ready(self) -> Result<Arc<Schema>> {
        self.rx.recv().map_err(|_| StoreError::InvalidSchema {
            schema: self.name.clone(),
            detail: "background compilation ended without a result".to_string(),
        })?
    }
}
