//! Test doubles shared by unit tests.

use crate::builder::{
    BuildFlags, BuildResult, InvalidateTarget, ModuleBuilder, ModuleGraph, ModuleRecord,
    SourceMap,
};
use crate::error::BuildError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Builder that records calls and returns canned output.
///
/// Module ids are file names, so `/any/dir/a.js` becomes `a.js`.
pub struct MockBuilder {
    invalidations: Mutex<Vec<InvalidateTarget>>,
    compiles: AtomicUsize,
    bundles: AtomicUsize,
    dependencies: Vec<String>,
    error: Option<String>,
    reentrant: bool,
    delay: Duration,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self {
            invalidations: Mutex::new(Vec::new()),
            compiles: AtomicUsize::new(0),
            bundles: AtomicUsize::new(0),
            dependencies: Vec::new(),
            error: None,
            reentrant: true,
            delay: Duration::ZERO,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new()
        }
    }

    pub fn with_dependencies(mut self, specifiers: &[&str]) -> Self {
        self.dependencies = specifiers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn non_reentrant(mut self) -> Self {
        self.reentrant = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invalidations(&self) -> Vec<InvalidateTarget> {
        self.invalidations.lock().clone()
    }

    pub fn compile_calls(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn bundle_calls(&self) -> usize {
        self.bundles.load(Ordering::SeqCst)
    }

    fn id(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn graph(&self, path: &Path) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        graph.insert(
            Self::id(path),
            ModuleRecord {
                path: path.to_path_buf(),
                source: "module.exports = 1;\n".to_string(),
                dependencies: self.dependencies.clone(),
            },
        );
        graph
    }

    fn source_map(id: &str) -> SourceMap {
        let raw = serde_json::json!({
            "version": 3,
            "file": id,
            "sources": [id],
            "names": [],
            "mappings": ";AAAA",
        });
        SourceMap::from_json_string(&raw.to_string()).unwrap()
    }

    async fn respond(&self, path: &Path) -> Result<BuildResult, BuildError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(message) = &self.error {
            return Err(BuildError::Custom(message.clone()));
        }

        let id = Self::id(path);
        Ok(BuildResult {
            source: format!("/* {} */\n", id),
            source_map: Some(Self::source_map(&id)),
            module_graph: Some(self.graph(path)),
            entry_modules: vec![id],
        })
    }
}

#[async_trait]
impl ModuleBuilder for MockBuilder {
    async fn compile(&self, path: &Path, _flags: &BuildFlags) -> Result<BuildResult, BuildError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.respond(path).await
    }

    async fn bundle(&self, path: &Path, _flags: &BuildFlags) -> Result<BuildResult, BuildError> {
        self.bundles.fetch_add(1, Ordering::SeqCst);
        self.respond(path).await
    }

    async fn invalidate(&self, target: InvalidateTarget) {
        self.invalidations.lock().push(target);
    }

    async fn trace(&self, path: &Path) -> Result<ModuleGraph, BuildError> {
        Ok(self.graph(path))
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
