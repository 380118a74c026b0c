//! Per-type walk timing

use std::collections::HashMap;
use std::time::Duration;

/// Cumulative time of one concrete type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTiming {
    /// Walk time spent on records of this type, callbacks and children excluded
    pub self_time: Duration,
    /// Records of this type walked
    pub records: u64,
}

/// Walk time by concrete type
#[derive(Debug, Clone, Default)]
pub struct WalkStats {
    types: HashMap<String, TypeTiming>,
}

impl WalkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, type_name: &str, self_time: Duration) {
        let entry = self.types.entry(type_name.to_string()).or_default();
        entry.self_time += self_time;
        entry.records += 1;
    }

    pub fn get(&self, type_name: &str) -> Option<TypeTiming> {
        self.types.get(type_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeTiming)> {
        self.types.iter().map(|(name, timing)| (name.as_str(), timing))
    }

    pub fn total_records(&self) -> u64 {
        self.types.values().map(|t| t.records).sum()
    }

    /// The `n` types with the most self time, hottest first
    pub fn hottest(&self, n: usize) -> Vec<(&str, TypeTiming)> {
        let mut all: Vec<(&str, TypeTiming)> = self.types.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        all.sort_by(|a, b| b.1.self_time.cmp(&a.1.self_time).then(a.0.cmp(b.0)));
        all.truncate(n);
        all
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }
}
