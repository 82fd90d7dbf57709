//! Module builder abstraction.
//!
//! The middleware never translates source itself. It talks to a
//! [`ModuleBuilder`], which compiles a single module or bundles a module
//! graph, keeps its own per-file cache and can be told to drop entries.
//!
//! Two adapters are provided:
//! - [`NativeBuilder`] - in-process CommonJS translator, always available
//! - [`CommandBuilder`] - long-lived external process speaking JSON over stdio
//!
//! [`select_builder`] picks one at startup by probing availability.

pub mod command;
pub mod native;

pub use command::CommandBuilder;
pub use native::NativeBuilder;
pub use oxc_sourcemap::SourceMap;

use crate::config::{BuilderKind, ResolvedPaths, TranslateConfig};
use crate::error::{BuildError, ConfigError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Flags forwarded to every compile/bundle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildFlags {
    /// Development build (no minification, readable output)
    pub development: bool,
    /// Emit a source map alongside the output
    pub source_maps: bool,
    /// Embed original sources in the source map
    pub source_map_contents: bool,
    /// Normalize dependency specifiers in the output
    pub normalize: bool,
}

impl Default for BuildFlags {
    fn default() -> Self {
        Self {
            development: true,
            source_maps: true,
            source_map_contents: false,
            normalize: true,
        }
    }
}

/// One module that took part in a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRecord {
    /// Resolved file on disk
    pub path: PathBuf,
    /// Original source text
    pub source: String,
    /// Direct dependency specifiers, as written in the source
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Module id (root-relative, `/`-separated) to module record.
pub type ModuleGraph = BTreeMap<String, ModuleRecord>;

/// Output of a compile or bundle call.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// Translated source
    pub source: String,
    /// Source map, carried on the wire as a plain revision 3 JSON object
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::source_map::json"
    )]
    pub source_map: Option<SourceMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_graph: Option<ModuleGraph>,
    /// Module ids that participated, entry first
    #[serde(default)]
    pub entry_modules: Vec<String>,
}

impl BuildResult {
    /// Files whose changes must invalidate this result.
    pub fn files(&self) -> Vec<PathBuf> {
        self.module_graph
            .as_ref()
            .map(|graph| graph.values().map(|record| record.path.clone()).collect())
            .unwrap_or_default()
    }
}

/// What to drop from a builder's cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum InvalidateTarget {
    /// A single file
    Path(PathBuf),
    /// Every cached entry
    All,
}

/// Abstract module builder.
///
/// Implementations are expected to cache compiled modules per file until
/// [`ModuleBuilder::invalidate`] drops them, and must never cache failures.
#[async_trait]
pub trait ModuleBuilder: Send + Sync {
    /// Compile `path` alone; dependencies are loaded separately by the client.
    async fn compile(&self, path: &Path, flags: &BuildFlags) -> Result<BuildResult, BuildError>;

    /// Bundle `path` together with its transitive dependencies.
    async fn bundle(&self, path: &Path, flags: &BuildFlags) -> Result<BuildResult, BuildError>;

    /// Drop cached state for a file or for everything.
    async fn invalidate(&self, target: InvalidateTarget);

    /// Trace the module graph reachable from `path`.
    async fn trace(&self, path: &Path) -> Result<ModuleGraph, BuildError>;

    /// Direct dependency specifiers per module id.
    fn dependencies(&self, graph: &ModuleGraph) -> BTreeMap<String, Vec<String>> {
        graph
            .iter()
            .map(|(id, record)| (id.clone(), record.dependencies.clone()))
            .collect()
    }

    /// Whether concurrent builds of the same path are safe.
    ///
    /// When `false` the coordinator coalesces them into one in-flight build.
    fn is_reentrant(&self) -> bool {
        true
    }

    /// Human-readable adapter name for logs.
    fn name(&self) -> &'static str;
}

/// Pick a builder adapter for `config`.
///
/// `auto` prefers a configured command builder whose program can be found,
/// then falls back to the native builder. An explicitly requested adapter that
/// is unavailable is a configuration error.
pub async fn select_builder(
    config: &TranslateConfig,
    paths: &ResolvedPaths,
) -> Result<Arc<dyn ModuleBuilder>> {
    match config.builder {
        BuilderKind::Native => Ok(Arc::new(NativeBuilder::new(paths.root.clone()))),
        BuilderKind::Command => {
            let spec = config.builder_command.as_ref().ok_or_else(|| {
                ConfigError::MissingField {
                    field: "builderCommand".to_string(),
                    hint: "Set \"builderCommand\": { \"program\": \"...\" }".to_string(),
                }
            })?;
            if !CommandBuilder::is_available(spec) {
                return Err(ConfigError::BuilderUnavailable(format!(
                    "'{}' was not found on PATH",
                    spec.program
                ))
                .into());
            }
            let builder = CommandBuilder::spawn(spec, &paths.root)?;
            Ok(Arc::new(builder))
        }
        BuilderKind::Auto => {
            if let Some(spec) = &config.builder_command {
                if CommandBuilder::is_available(spec) {
                    match CommandBuilder::spawn(spec, &paths.root) {
                        Ok(builder) => return Ok(Arc::new(builder)),
                        Err(e) => {
                            tracing::warn!(
                                "Failed to start builder '{}', using native builder: {}",
                                spec.program,
                                e
                            );
                        }
                    }
                } else {
                    tracing::debug!(
                        "Builder '{}' not found on PATH, using native builder",
                        spec.program
                    );
                }
            }
            Ok(Arc::new(NativeBuilder::new(paths.root.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandSpec;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_build_flags_defaults() {
        let flags = BuildFlags::default();
        assert!(flags.development);
        assert!(flags.source_maps);
        assert!(!flags.source_map_contents);
        assert!(flags.normalize);
    }

    #[test]
    fn test_build_flags_partial_json() {
        let flags: BuildFlags = serde_json::from_str(r#"{ "development": false }"#).unwrap();
        assert!(!flags.development);
        assert!(flags.source_maps);
    }

    #[test]
    fn test_build_result_files_without_graph() {
        let result = BuildResult {
            source: String::new(),
            source_map: None,
            module_graph: None,
            entry_modules: vec![],
        };
        assert!(result.files().is_empty());
    }

    #[test]
    fn test_build_result_wire_format() {
        let result: BuildResult = serde_json::from_str(
            r#"{
                "source": "x;",
                "sourceMap": { "version": 3, "sources": ["a.js"], "names": [], "mappings": "AAAA" },
                "entryModules": ["a.js"]
            }"#,
        )
        .unwrap();
        assert_eq!(result.source_map.as_ref().unwrap().to_json().sources, vec!["a.js"]);
        assert!(result.module_graph.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sourceMap"]["sources"][0], "a.js");
        assert_eq!(json["sourceMap"]["mappings"], "AAAA");

        let result: BuildResult = serde_json::from_str(r#"{ "source": "x;" }"#).unwrap();
        assert!(result.source_map.is_none());
        assert!(!serde_json::to_string(&result).unwrap().contains("sourceMap"));
    }

    #[test]
    fn test_invalidate_target_wire_format() {
        let json = serde_json::to_string(&InvalidateTarget::Path(PathBuf::from("/a.js"))).unwrap();
        assert_eq!(json, r#"{"kind":"path","path":"/a.js"}"#);
        let json = serde_json::to_string(&InvalidateTarget::All).unwrap();
        assert_eq!(json, r#"{"kind":"all"}"#);
    }

    fn resolved(temp: &TempDir) -> ResolvedPaths {
        fs::write(temp.path().join("config.js"), "").unwrap();
        TranslateConfig::new(temp.path()).resolve().unwrap()
    }

    #[tokio::test]
    async fn test_select_auto_falls_back_to_native() {
        let temp = TempDir::new().unwrap();
        let paths = resolved(&temp);
        let config = TranslateConfig {
            builder_command: Some(CommandSpec {
                program: "modgate-no-such-builder".to_string(),
                args: vec![],
            }),
            ..TranslateConfig::new(temp.path())
        };

        let builder = select_builder(&config, &paths).await.unwrap();
        assert_eq!(builder.name(), "native");
    }

    #[tokio::test]
    async fn test_select_explicit_command_unavailable() {
        let temp = TempDir::new().unwrap();
        let paths = resolved(&temp);
        let config = TranslateConfig {
            builder: BuilderKind::Command,
            builder_command: Some(CommandSpec {
                program: "modgate-no-such-builder".to_string(),
                args: vec![],
            }),
            ..TranslateConfig::new(temp.path())
        };

        let err = select_builder(&config, &paths).await.err().unwrap();
        assert!(err.to_string().contains("modgate-no-such-builder"));
    }
}
