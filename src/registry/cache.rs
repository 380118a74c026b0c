//! Compile-once schema cache
//!
//! ## Concurrency Model
//! - `compiled` is read-mostly: every lookup takes the read lock, only a finished
//!   compilation takes the write lock
//! - `resolving` names the schemas some thread is compiling right now; other threads
//!   asking for one of them wait on `resolved` in bounded slices
//! - A thread-local set names the schemas the current thread is compiling, so a
//!   schema that (transitively) inlines itself fails fast instead of deadlocking

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{Result, StoreError};
use crate::schema::Schema;

thread_local! {
    static COMPILING: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Compiled schemas by name
#[derive(Default)]
pub(crate) struct SchemaCache {
    compiled: RwLock<HashMap<String, Arc<Schema>>>,
    resolving: Mutex<HashSet<String>>,
    resolved: Condvar,
}

impl SchemaCache {
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.compiled.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.compiled.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.compiled.read().len()
    }

    /// Return the cached schema, compiling it on this thread if nobody has yet
    pub fn get_or_compile<F>(&self, name: &str, slice: Duration, limit: Duration, compile: F) -> Result<Arc<Schema>>
    where
        F: FnOnce() -> Result<Schema>,
    {
        if let Some(schema) = self.get(name) {
            return Ok(schema);
        }
        if COMPILING.with(|c| c.borrow().contains(name)) {
            return Err(StoreError::RecursiveCompilation(name.to_string()));
        }

        // Claim the name, or wait for whoever holds it
        {
            let deadline = Instant::now() + limit;
            let mut resolving = self.resolving.lock();
            loop {
                if let Some(schema) = self.get(name) {
                    return Ok(schema);
                }
                if resolving.insert(name.to_string()) {
                    break;
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(StoreError::CompileTimeout(name.to_string()));
                }
                tracing::trace!("Waiting for another thread to compile {}", name);
                let _ = self.resolved.wait_for(&mut resolving, slice.min(deadline - now));
            }
        }

        let _guard = CompilingGuard::enter(self, name);
        let schema = Arc::new(compile()?);
        self.compiled.write().insert(name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }
}

/// Marks a schema as being compiled by this thread until dropped
struct CompilingGuard<'c> {
    cache: &'c SchemaCache,
    name: String,
}

impl<'c> CompilingGuard<'c> {
    fn enter(cache: &'c SchemaCache, name: &str) -> Self {
        COMPILING.with(|c| c.borrow_mut().insert(name.to_string()));
        Self {
            cache,
            name: name.to_string(),
        }
    }
}

impl Drop for CompilingGuard<'_> {
    fn drop(&mut self) {
        COMPILING.with(|c| c.borrow_mut().remove(&self.name));
        self.cache.resolving.lock().remove(&self.name);
        self.cache.resolved.notify_all();
    }
}
