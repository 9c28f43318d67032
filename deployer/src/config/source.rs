//! Configuration sources

use std::collections::{BTreeMap, HashMap};

/// Read-only string lookup by key
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// Sources consulted in order; the first one holding a key wins
pub struct Layered<'a> {
    sources: Vec<&'a dyn ConfigSource>,
}

impl<'a> Layered<'a> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Add a source with lower precedence than the ones already added
    pub fn with(mut self, source: &'a dyn ConfigSource) -> Self {
        self.sources.push(source);
        self
    }
}

impl Default for Layered<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigSource for Layered<'_> {
    fn get(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|source| source.get(key))
    }
}
