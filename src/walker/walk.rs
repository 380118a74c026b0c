//! Command stream interpreter
//!
//! Replays a schema's command stream over a loaded record, keeping a byte cursor
//! into the record's chunk, and calls back on every non-null pointer it meets.
//!
//! ## Ownership of changes
//! - A referenced record (root or reached through a `Reference` field) persists its
//!   own changes once its walk finishes, even when the flow is `End`
//! - An inline record (nested, list element, extension) reports changes upward in
//!   its [`WalkOutcome`]; the enclosing record applies them in place, or copies
//!   itself when it is immutable or already replaced

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command::Command;
use crate::error::{Result, StoreError};
use crate::schema::{CodecEnv, FieldDescriptor, FieldKind, ListElement, Schema};
use crate::size::{SizeContext, WordSpace};
use crate::store::{self, DataProvider};
use crate::value::{ChunkPtr, Instance, Value};

use super::flags::{Flow, WalkFlags};
use super::stats::WalkStats;

/// What a pointer field leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointee {
    /// Record stored in its own chunk
    Reference(ChunkPtr),
    /// Head of a raw chunk chain
    Chunk(ChunkPtr),
    /// One `next` link of a chunk chain
    Link { from: ChunkPtr, to: ChunkPtr },
}

/// Arguments of one callback invocation
pub struct Visit<'v> {
    /// Chunk holding the owner; inline records share their parent's chunk
    pub owner_ref: ChunkPtr,
    /// Byte offset of the field inside `owner_ref`
    pub offset: u64,
    /// Record declaring the field. Mutate it in place only together with `SAVE`.
    pub owner: &'v mut Instance,
    pub field: &'v FieldDescriptor,
    pub pointee: Pointee,
    /// New value consumed by `HOLDER_COPY`; for links, the new `next` (a pointer or null)
    pub holder: Option<Value>,
}

/// Walk callback
pub type WalkCallback<'c> = dyn FnMut(&mut Visit<'_>) -> Result<WalkFlags> + 'c;

/// Result of walking one record
#[derive(Debug)]
pub struct WalkOutcome {
    pub flow: Flow,
    /// The record was mutated in place and must be persisted
    pub save: bool,
    /// Copy-on-write replacement for the record
    pub replacement: Option<Instance>,
}

impl WalkOutcome {
    fn proceed() -> Self {
        Self {
            flow: Flow::Continue,
            save: false,
            replacement: None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.save || self.replacement.is_some()
    }

    /// Copy the owner (or its replacement) with one field changed
    fn copy_field(&mut self, owner: &Instance, field: &FieldDescriptor, value: Value) {
        let base = self.replacement.as_ref().unwrap_or(owner);
        self.replacement = Some(base.with_field(field, value));
    }

    /// Record an in-place change of `field`, carrying it into the replacement if any
    fn mark_saved(&mut self, owner: &Instance, field: &FieldDescriptor) {
        self.save = true;
        if let Some(current) = &self.replacement {
            self.replacement = Some(current.with_field(field, field.get(owner).clone()));
        }
    }

    /// Apply what an inline child reported for `field`
    fn absorb_child(&mut self, owner: &mut Instance, field: &FieldDescriptor, save: bool, value: Option<Value>) {
        match value {
            Some(value) if self.replacement.is_none() && !owner.schema().is_immutable() => {
                owner.set_field(field, value);
                self.save = true;
            }
            Some(value) => self.copy_field(owner, field, value),
            None if save => self.mark_saved(owner, field),
            None => {}
        }
    }

    fn absorb_extension(&mut self, owner: &mut Instance, save: bool, extension: Option<Instance>) -> Result<()> {
        match extension {
            Some(ext) if self.replacement.is_none() && !owner.schema().is_immutable() => {
                owner.set_extension(Some(ext))?;
                self.save = true;
            }
            Some(ext) => {
                let base = self.replacement.as_ref().unwrap_or(owner);
                self.replacement = Some(base.builder().extension(Some(ext))?.build());
            }
            None if save => {
                self.save = true;
                if let Some(current) = &self.replacement {
                    let ext = owner.extension().cloned();
                    self.replacement = Some(current.builder().extension(ext)?.build());
                }
            }
            None => {}
        }
        Ok(())
    }
}

/// Position of the field being visited
struct Site<'f> {
    owner_ref: ChunkPtr,
    offset: u64,
    field: &'f FieldDescriptor,
}

// =============================================================================
// Walker
// =============================================================================

/// Pointer-tracing interpreter over persisted records
pub struct Walker<'a> {
    env: CodecEnv<'a>,
    provider: &'a dyn DataProvider,
    stats: Option<WalkStats>,
    /// Referenced records already walked in the current walk
    visited: HashSet<ChunkPtr>,
}

impl<'a> Walker<'a> {
    pub fn new(env: CodecEnv<'a>, provider: &'a dyn DataProvider) -> Self {
        Self {
            stats: env.config.walk_timing.then(WalkStats::new),
            env,
            provider,
            visited: HashSet::new(),
        }
    }

    /// Timing collected so far, when `Config::walk_timing` is on
    pub fn stats(&self) -> Option<&WalkStats> {
        self.stats.as_ref()
    }

    pub fn take_stats(&mut self) -> Option<WalkStats> {
        let taken = self.stats.take();
        if taken.is_some() {
            self.stats = Some(WalkStats::new());
        }
        taken
    }

    /// Walk `instance`, the record stored at `root`
    ///
    /// A replacement produced for the root is persisted and swapped into `instance`.
    pub fn walk<F>(&mut self, root: ChunkPtr, instance: &mut Instance, mut callback: F) -> Result<Flow>
    where
        F: FnMut(&mut Visit<'_>) -> Result<WalkFlags>,
    {
        self.visited.clear();
        let flow = self.walk_stored(root, instance, &mut callback)?;

        if let Some(stats) = &self.stats {
            for (name, timing) in stats.hottest(5) {
                tracing::debug!(
                    "Walk time {}: {:?} over {} records",
                    name,
                    timing.self_time,
                    timing.records
                );
            }
        }
        Ok(flow)
    }

    /// Load the record of `schema` stored at `root` and walk it
    pub fn walk_ref<F>(&mut self, root: ChunkPtr, schema: &Arc<Schema>, callback: F) -> Result<Flow>
    where
        F: FnMut(&mut Visit<'_>) -> Result<WalkFlags>,
    {
        let mut instance = store::load_record(self.provider, &self.env, schema, root)
            .map_err(|e| frame_error(e, schema.name(), root, 0))?;
        self.walk(root, &mut instance, callback)
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Walk a record that owns its chunk, then persist what it reported
    fn walk_stored(&mut self, ptr: ChunkPtr, instance: &mut Instance, cb: &mut WalkCallback<'_>) -> Result<Flow> {
        self.visited.insert(ptr);
        let schema = Arc::clone(instance.schema());

        // Step 1: Regenerate I/O companions so sizes match the stored layout
        schema.prepare(&self.prepare_env(), instance)?;

        // Step 2: Interpret the command stream
        let outcome = self.walk_record(ptr, 0, instance, cb)?;

        // Step 3: Persist changes, including those made before an End
        if let Some(mut replacement) = outcome.replacement {
            tracing::trace!("Persisting replacement {}@{}", schema.name(), ptr);
            store::persist_record(self.provider, &self.env, ptr, &mut replacement)
                .map_err(|e| frame_error(e, schema.name(), ptr, 0))?;
            *instance = replacement;
        } else if outcome.save {
            tracing::trace!("Persisting {}@{}", schema.name(), ptr);
            store::persist_record(self.provider, &self.env, ptr, instance)
                .map_err(|e| frame_error(e, schema.name(), ptr, 0))?;
        }
        Ok(outcome.flow)
    }

    /// Interpret one record's command stream starting at `base` in `owner_ref`
    fn walk_record(
        &mut self,
        owner_ref: ChunkPtr,
        base: u64,
        owner: &mut Instance,
        cb: &mut WalkCallback<'_>,
    ) -> Result<WalkOutcome> {
        let started = self.stats.is_some().then(Instant::now);
        let mut excluded = Duration::ZERO;

        let schema = Arc::clone(owner.schema());
        let fields = schema.fields();
        let mut outcome = WalkOutcome::proceed();
        let mut cursor = base;
        let mut index = 0usize;
        let mut skip_next = false;

        for entry in schema.commands().iter() {
            let (position, command) = entry?;
            if skip_next && !command.is_flow() {
                skip_next = false;
                index += command.field_count();
                continue;
            }

            match command {
                Command::EndFields => break,
                Command::SkipFlowIfNull { field } => {
                    let guard = fields.get(usize::from(field)).ok_or_else(|| StoreError::MalformedCommands {
                        position,
                        detail: format!("null guard names field #{field} of {}", fields.len()),
                    })?;
                    skip_next = guard.is_null_in(owner);
                }
                Command::SkipBytes { size, fields: count } => {
                    cursor += size;
                    index += usize::from(count);
                }
                Command::SkipUnknown { .. } => {
                    for _ in 0..command.field_count() {
                        let field = field_at(fields.get(index), position)?;
                        cursor += self.field_size(owner, field)?;
                        index += 1;
                    }
                }
                Command::Marker { kind, needs_size } => {
                    let field = field_at(fields.get(index), position)?;
                    let size = if needs_size {
                        self.field_size(owner, field)?
                    } else {
                        field.size_descriptor().fixed_in(WordSpace::Byte).unwrap_or(0)
                    };
                    tracing::trace!("{:?} {}.{} at {}+{}", kind, schema.name(), field.name(), owner_ref, cursor);

                    let site = Site {
                        owner_ref,
                        offset: cursor,
                        field,
                    };
                    let flow = self
                        .visit_marker(&site, owner, &mut outcome, cb, &mut excluded)
                        .map_err(|e| frame_error(e, schema.name(), owner_ref, site.offset))?;
                    cursor += size;
                    index += 1;
                    if flow == Flow::End {
                        outcome.flow = Flow::End;
                        break;
                    }
                }
                Command::SwitchToDynamicFieldList => {
                    cursor += 4;
                    let child = match owner.extension_mut() {
                        Some(extension) => Some(self.timed(&mut excluded, |w| {
                            w.walk_record(owner_ref, cursor, extension, &mut *cb)
                        })?),
                        None => None,
                    };
                    if let Some(child) = child {
                        outcome.absorb_extension(owner, child.save, child.replacement)?;
                        if child.flow == Flow::End {
                            outcome.flow = Flow::End;
                            break;
                        }
                    }
                }
            }
        }

        if let (Some(started), Some(stats)) = (started, self.stats.as_mut()) {
            stats.record(schema.name(), started.elapsed().saturating_sub(excluded));
        }
        Ok(outcome)
    }

    // =========================================================================
    // Markers
    // =========================================================================

    fn visit_marker(
        &mut self,
        site: &Site<'_>,
        owner: &mut Instance,
        outcome: &mut WalkOutcome,
        cb: &mut WalkCallback<'_>,
        excluded: &mut Duration,
    ) -> Result<Flow> {
        match site.field.kind() {
            FieldKind::Reference { schema } => self.visit_reference(site, schema, owner, outcome, cb, excluded),
            FieldKind::ChunkPointer => self.visit_chain(site, owner, outcome, cb, excluded),
            FieldKind::Inline { .. } | FieldKind::Dynamic { .. } => self.visit_inline(site, owner, outcome, cb, excluded),
            FieldKind::List { .. } => self.visit_list(site, owner, outcome, cb, excluded),
            other => Err(StoreError::InvalidSchema {
                schema: owner.schema().name().to_string(),
                detail: format!("pointer marker on {} field {}", kind_name(other), site.field.name()),
            }),
        }
    }

    fn visit_reference(
        &mut self,
        site: &Site<'_>,
        schema_name: &str,
        owner: &mut Instance,
        outcome: &mut WalkOutcome,
        cb: &mut WalkCallback<'_>,
        excluded: &mut Duration,
    ) -> Result<Flow> {
        let Some(ptr) = site.field.get(owner).as_ptr() else {
            return Ok(Flow::Continue);
        };
        let (flags, target) = self.visit_pointer(site, Pointee::Reference(ptr), owner, outcome, cb, excluded)?;
        if flags.flow()? == Flow::End {
            return Ok(Flow::End);
        }

        let Some(target) = target else {
            return Ok(Flow::Continue);
        };
        if !self.visited.insert(target) {
            return Ok(Flow::Continue);
        }
        self.timed(excluded, |w| w.descend(target, schema_name, &mut *cb))
    }

    fn descend(&mut self, ptr: ChunkPtr, schema_name: &str, cb: &mut WalkCallback<'_>) -> Result<Flow> {
        tracing::trace!("Descending into {}@{}", schema_name, ptr);
        let schema = self.env.registry.schema(schema_name)?;
        let mut child = store::load_record(self.provider, &self.env, &schema, ptr)
            .map_err(|e| frame_error(e, schema_name, ptr, 0))?;
        self.walk_stored(ptr, &mut child, cb)
    }

    fn visit_chain(
        &mut self,
        site: &Site<'_>,
        owner: &mut Instance,
        outcome: &mut WalkOutcome,
        cb: &mut WalkCallback<'_>,
        excluded: &mut Duration,
    ) -> Result<Flow> {
        let Some(head) = site.field.get(owner).as_ptr() else {
            return Ok(Flow::Continue);
        };
        let (flags, head) = self.visit_pointer(site, Pointee::Chunk(head), owner, outcome, cb, excluded)?;
        if flags.flow()? == Flow::End {
            return Ok(Flow::End);
        }
        let Some(mut from) = head else {
            return Ok(Flow::Continue);
        };

        let mut seen = HashSet::from([from]);
        while let Some(to) = self.provider.next_of(from)? {
            let mut visit = Visit {
                owner_ref: site.owner_ref,
                offset: site.offset,
                owner: &mut *owner,
                field: site.field,
                pointee: Pointee::Link { from, to },
                holder: None,
            };
            let flags = self.invoke(cb, excluded, &mut visit)?;
            let holder = visit.holder.take();

            let mut follow = Some(to);
            if flags.wants_holder_copy() {
                follow = match holder {
                    Some(Value::Ptr(ptr)) => Some(ptr),
                    Some(Value::Null) => None,
                    Some(other) => {
                        return Err(StoreError::TypeMismatch {
                            field: site.field.name().to_string(),
                            expected: "pointer",
                            found: other.type_name().to_string(),
                        })
                    }
                    None => return Err(StoreError::InvalidWalkFlow(flags.bits())),
                };
                self.provider.set_next(from, follow)?;
            }
            if flags.wants_save() {
                outcome.mark_saved(owner, site.field);
            }
            if flags.flow()? == Flow::End {
                return Ok(Flow::End);
            }

            let Some(to) = follow else {
                break;
            };
            if !seen.insert(to) {
                return Err(StoreError::Corruption {
                    field: site.field.name().to_string(),
                    detail: format!("chunk chain loops back to {to}"),
                });
            }
            from = to;
        }
        Ok(Flow::Continue)
    }

    fn visit_inline(
        &mut self,
        site: &Site<'_>,
        owner: &mut Instance,
        outcome: &mut WalkOutcome,
        cb: &mut WalkCallback<'_>,
        excluded: &mut Duration,
    ) -> Result<Flow> {
        let child = match owner.field_value_mut(site.field) {
            Some(Value::Record(nested)) => {
                self.timed(excluded, |w| w.walk_record(site.owner_ref, site.offset, nested, &mut *cb))?
            }
            _ => return Ok(Flow::Continue),
        };
        let replacement = child.replacement.map(Value::from);
        outcome.absorb_child(owner, site.field, child.save, replacement);
        Ok(child.flow)
    }

    fn visit_list(
        &mut self,
        site: &Site<'_>,
        owner: &mut Instance,
        outcome: &mut WalkOutcome,
        cb: &mut WalkCallback<'_>,
        excluded: &mut Duration,
    ) -> Result<Flow> {
        let element = match site.field.kind() {
            FieldKind::List {
                element: ListElement::Named(schema),
                ..
            } => Some(Arc::clone(schema)),
            FieldKind::List {
                element: ListElement::Dynamic { .. },
                ..
            } => site
                .field
                .get(owner)
                .as_list()
                .and_then(|items| items.first())
                .map(|first| Arc::clone(first.schema())),
            _ => None,
        };
        let Some(element) = element else {
            return Ok(Flow::Continue);
        };
        if !element.has_pointers() {
            return Ok(Flow::Continue);
        }

        let mut flow = Flow::Continue;
        let mut save = false;
        let mut replaced = Vec::new();
        if let Some(Value::List(items)) = owner.field_value_mut(site.field) {
            let mut offset = site.offset;
            for (i, item) in items.iter_mut().enumerate() {
                let size = element.size_of(&self.prepare_env(), item)?;
                let child = self.timed(excluded, |w| w.walk_record(site.owner_ref, offset, item, &mut *cb))?;
                save |= child.save;
                if let Some(replacement) = child.replacement {
                    replaced.push((i, replacement));
                }
                offset += size;
                if child.flow == Flow::End {
                    flow = Flow::End;
                    break;
                }
            }
        }

        if replaced.is_empty() {
            outcome.absorb_child(owner, site.field, save, None);
        } else {
            let mut items = site.field.get(owner).as_list().map(<[Instance]>::to_vec).unwrap_or_default();
            for (i, replacement) in replaced {
                items[i] = replacement;
            }
            outcome.absorb_child(owner, site.field, save, Some(Value::List(items)));
        }
        Ok(flow)
    }

    // =========================================================================
    // Callback Plumbing
    // =========================================================================

    /// Call back for a pointer field and apply the action to the owner
    ///
    /// Returns the flags and the pointer the field holds afterwards.
    fn visit_pointer(
        &mut self,
        site: &Site<'_>,
        pointee: Pointee,
        owner: &mut Instance,
        outcome: &mut WalkOutcome,
        cb: &mut WalkCallback<'_>,
        excluded: &mut Duration,
    ) -> Result<(WalkFlags, Option<ChunkPtr>)> {
        let mut visit = Visit {
            owner_ref: site.owner_ref,
            offset: site.offset,
            owner: &mut *owner,
            field: site.field,
            pointee,
            holder: None,
        };
        let flags = self.invoke(cb, excluded, &mut visit)?;
        let holder = visit.holder.take();

        let mut target = site.field.get(owner).as_ptr();
        if flags.wants_holder_copy() {
            let value = holder.ok_or(StoreError::InvalidWalkFlow(flags.bits()))?;
            target = value.as_ptr();
            outcome.copy_field(owner, site.field, value);
        }
        if flags.wants_save() {
            outcome.mark_saved(owner, site.field);
        }
        Ok((flags, target))
    }

    fn invoke(&mut self, cb: &mut WalkCallback<'_>, excluded: &mut Duration, visit: &mut Visit<'_>) -> Result<WalkFlags> {
        let flags = self.timed(excluded, |_| cb(visit))?;
        flags.flow()?;
        if flags.mutates() && self.provider.is_read_only() {
            return Err(StoreError::ReadOnly(format!(
                "apply {:?} to {} during a walk",
                flags,
                visit.field.name()
            )));
        }
        Ok(flags)
    }

    /// Run `f`, counting its time as excluded from the current record's self time
    fn timed<T>(&mut self, excluded: &mut Duration, f: impl FnOnce(&mut Self) -> T) -> T {
        if self.stats.is_none() {
            return f(self);
        }
        let start = Instant::now();
        let result = f(self);
        *excluded += start.elapsed();
        result
    }

    /// Environment for companion regeneration; a read-only store never records type ids
    fn prepare_env(&self) -> CodecEnv<'a> {
        if self.provider.is_read_only() {
            self.env.frozen_types()
        } else {
            self.env
        }
    }

    fn field_size(&self, owner: &Instance, field: &FieldDescriptor) -> Result<u64> {
        let ctx = SizeContext {
            env: &self.env,
            instance: owner,
        };
        field.byte_size(&ctx)
    }
}

fn field_at(field: Option<&Arc<FieldDescriptor>>, position: usize) -> Result<&FieldDescriptor> {
    field.map(Arc::as_ref).ok_or_else(|| StoreError::MalformedCommands {
        position,
        detail: "command runs past the last field".to_string(),
    })
}

/// Wrap storage and decode failures with the record they happened in
fn frame_error(err: StoreError, schema: &str, owner_ref: ChunkPtr, offset: u64) -> StoreError {
    if err.is_io_failure() {
        err.in_walk_frame(format!("{schema}@{owner_ref}+{offset}"))
    } else {
        err
    }
}

fn kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Bool => "bool",
        FieldKind::Enum { .. } => "enum",
        FieldKind::NullFlag => "null flag",
        FieldKind::Width => "width",
        FieldKind::Int { .. } => "int",
        FieldKind::Float => "float",
        FieldKind::Str { .. } => "string",
        FieldKind::Bytes { .. } | FieldKind::CompressedBytes { .. } | FieldKind::Packed => "bytes",
        FieldKind::Length => "length",
        FieldKind::TypeId => "type id",
        FieldKind::BitGroup(_) => "bit group",
        FieldKind::Inline { .. }
        | FieldKind::Reference { .. }
        | FieldKind::ChunkPointer
        | FieldKind::Dynamic { .. }
        | FieldKind::List { .. } => "pointer",
    }
}
