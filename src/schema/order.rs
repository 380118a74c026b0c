//! Field ordering
//!
//! Topological sort of a schema's fields over their size dependencies. Among the
//! fields that are ready at each step the smallest [`OrderKey`] goes next, so the
//! result depends only on the declared field set and never on declaration order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::size::WordSpace;

use super::bitgroup::BitGroup;
use super::field::{FieldDescriptor, StoragePool};

/// Tie-break key among fields whose dependencies are all placed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    /// Fixed-size fields first, then bit space before byte space
    unknown_size: bool,
    space: WordSpace,
    /// I/O-scratch companions before everything else
    pool_rank: u8,
    /// Primitives and enums before composites
    composite: bool,
    /// Fields with identical dependency sets stay adjacent
    dependencies: Vec<String>,
    name: String,
}

impl OrderKey {
    pub fn of(field: &FieldDescriptor) -> Result<OrderKey> {
        let mut dependencies = field.dependencies()?.to_vec();
        dependencies.sort();
        let io_companion = field.is_virtual() && field.accessor().pool() == StoragePool::Io;
        Ok(OrderKey {
            unknown_size: !field.size_descriptor().has_fixed(),
            space: field.size_descriptor().word_space(),
            pool_rank: if io_companion { 0 } else { 1 },
            composite: !field.is_primitive(),
            dependencies,
            name: field.name().to_string(),
        })
    }
}

/// Order `fields` so every field follows its dependencies
pub fn order_fields(schema: &str, fields: &[Arc<FieldDescriptor>]) -> Result<Vec<Arc<FieldDescriptor>>> {
    let index: HashMap<&str, usize> = fields.iter().enumerate().map(|(i, f)| (f.name(), i)).collect();

    let mut pending = vec![0usize; fields.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); fields.len()];
    for (i, field) in fields.iter().enumerate() {
        for dep in field.dependencies()? {
            let d = *index.get(dep.as_str()).ok_or_else(|| StoreError::InvalidSchema {
                schema: schema.to_string(),
                detail: format!("field {} depends on unknown field {}", field.name(), dep),
            })?;
            pending[i] += 1;
            dependents[d].push(i);
        }
    }

    let keys = fields.iter().map(|f| OrderKey::of(f)).collect::<Result<Vec<_>>>()?;
    let mut ready: BTreeSet<(&OrderKey, usize)> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| (&keys[i], i))
        .collect();

    let mut ordered = Vec::with_capacity(fields.len());
    while let Some((_, i)) = ready.pop_first() {
        ordered.push(Arc::clone(&fields[i]));
        for &next in &dependents[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert((&keys[next], next));
            }
        }
    }

    if ordered.len() < fields.len() {
        let stuck: HashSet<usize> = (0..fields.len()).filter(|i| pending[*i] > 0).collect();
        return Err(StoreError::DependencyCycle {
            schema: schema.to_string(),
            cycle: describe_cycle(fields, &index, &stuck),
        });
    }
    Ok(ordered)
}

/// Follow unresolved dependencies from the smallest stuck field until one repeats
fn describe_cycle(fields: &[Arc<FieldDescriptor>], index: &HashMap<&str, usize>, stuck: &HashSet<usize>) -> String {
    let Some(&start) = stuck.iter().min_by_key(|i| fields[**i].name()) else {
        return String::new();
    };

    let mut path: Vec<usize> = vec![start];
    let mut current = start;
    loop {
        let next = fields[current]
            .dependencies()
            .unwrap_or(&[])
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .filter(|d| stuck.contains(d))
            .min_by_key(|d| fields[*d].name());
        let Some(next) = next else { break };
        if let Some(pos) = path.iter().position(|p| *p == next) {
            let mut names: Vec<&str> = path[pos..].iter().map(|i| fields[*i].name()).collect();
            names.push(fields[next].name());
            return names.join(" -> ");
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|i| fields[*i].name()).collect::<Vec<_>>().join(" -> ")
}

/// Check an explicit order against the compiled field set and arrange fields by it
pub fn apply_manual_order(
    schema: &str,
    fields: &[Arc<FieldDescriptor>],
    order: &[String],
) -> Result<Vec<Arc<FieldDescriptor>>> {
    let mismatch = |detail: String| StoreError::ManualOrderMismatch {
        schema: schema.to_string(),
        detail,
    };

    let by_name: HashMap<&str, &Arc<FieldDescriptor>> = fields.iter().map(|f| (f.name(), f)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for name in order {
        if !by_name.contains_key(name.as_str()) {
            return Err(mismatch(format!("unknown field {name}")));
        }
        if !seen.insert(name.as_str()) {
            return Err(mismatch(format!("field {name} listed twice")));
        }
    }
    let mut missing: Vec<&str> = by_name.keys().filter(|n| !seen.contains(*n)).copied().collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(mismatch(format!("missing fields {}", missing.join(", "))));
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(order.len());
    for name in order {
        let field = by_name[name.as_str()];
        for dep in field.dependencies()? {
            if !placed.contains(dep.as_str()) {
                return Err(mismatch(format!("{name} is placed before its dependency {dep}")));
            }
        }
        placed.insert(name.as_str());
        ordered.push(Arc::clone(field));
    }
    Ok(ordered)
}

/// Replace every maximal run of bit-space fields with one merged group field
pub fn merge_bit_runs(ordered: Vec<Arc<FieldDescriptor>>) -> Result<Vec<Arc<FieldDescriptor>>> {
    let mut merged = Vec::with_capacity(ordered.len());
    let mut run: Vec<Arc<FieldDescriptor>> = Vec::new();
    for field in ordered {
        if field.size_descriptor().word_space() == WordSpace::Bit {
            run.push(field);
            continue;
        }
        if !run.is_empty() {
            merged.push(Arc::new(BitGroup::merge(std::mem::take(&mut run))?));
        }
        merged.push(field);
    }
    if !run.is_empty() {
        merged.push(Arc::new(BitGroup::merge(run)?));
    }
    Ok(merged)
}
