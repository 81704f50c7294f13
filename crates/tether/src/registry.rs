//! Name registry backing namespace references.
//!
//! Entries are overwritten, never removed. The map is shared by every session
//! of a process, so writes go through the map's shard locks.

use crate::value::Value;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct Registry {
    entries: DashMap<String, Value>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional write, last write wins. Returns the name.
    pub fn store(&self, name: impl Into<String>, value: Value) -> String {
        let name = name.into();
        log::debug!("registry: store `{name}` ({})", value.type_name());
        self.entries.insert(name.clone(), value);
        name
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
