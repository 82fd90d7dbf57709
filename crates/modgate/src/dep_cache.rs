//! Dependency cache accumulated across builds.
//!
//! Maps each built module (root-relative id) to the dependency specifiers it
//! declares. The loader configuration response embeds a snapshot as
//! `System.config({ "depCache": ... })` so the loader can prefetch a module's
//! dependencies in parallel with the module itself.

use dashmap::DashMap;
use std::collections::BTreeMap;

/// Process-wide dependency map, merged after every successful build.
#[derive(Debug, Default)]
pub struct DependencyCache {
    entries: DashMap<String, Vec<String>>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the dependencies of one module; the latest build wins.
    pub fn merge(&self, module: impl Into<String>, specifiers: Vec<String>) {
        self.entries.insert(module.into(), specifiers);
    }

    /// Merge every entry of a builder's dependency map.
    pub fn merge_all(&self, dependencies: BTreeMap<String, Vec<String>>) {
        for (module, specifiers) in dependencies {
            self.merge(module, specifiers);
        }
    }

    /// Sorted copy of the current mapping.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loader statement appended to the served configuration file.
    pub fn config_statement(&self) -> serde_json::Result<String> {
        let body = serde_json::to_string_pretty(&serde_json::json!({
            "depCache": self.snapshot(),
        }))?;
        Ok(format!("\nSystem.config({});\n", body))
    }
}
