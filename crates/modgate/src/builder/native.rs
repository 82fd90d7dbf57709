//! In-process CommonJS builder built on the oxc parser.
//!
//! Each module is parsed once, its `require('...')` specifiers collected and
//! its `require` callees renamed to `$__require`, then wrapped in a
//! `System.registerDynamic` registration. Parsed modules are cached per file
//! until invalidated; failures are never cached.
//!
//! ES module syntax is rejected by the parser (modules are parsed as
//! CommonJS scripts); projects that need it should configure a command
//! builder.

use super::{
    BuildFlags, BuildResult, InvalidateTarget, ModuleBuilder, ModuleGraph, ModuleRecord,
    SourceMap,
};
use crate::error::BuildError;
use crate::paths::{maybe_real_path, module_id};
use async_trait::async_trait;
use dashmap::DashMap;
use oxc_allocator::Allocator;
use oxc_ast::ast::{Argument, CallExpression, Expression};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::{Parser, ParserReturn};
use oxc_sourcemap::SourceMapBuilder;
use oxc_span::SourceType;
use path_clean::PathClean;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use parking_lot::Mutex;
use std::sync::Arc;

const REQUIRE_ALIAS: &str = "$__require";
const BODY_INDENT: &str = "  ";

/// A parsed and rewritten module.
#[derive(Debug)]
struct CompiledModule {
    id: String,
    path: PathBuf,
    source: String,
    dependencies: Vec<String>,
    body: String,
}

/// In-process builder for CommonJS modules.
pub struct NativeBuilder {
    root: PathBuf,
    cache: DashMap<PathBuf, Arc<CompiledModule>>,
    /// Bumped on every invalidation. Held while a load stores its result and
    /// while an invalidation evicts, so a load that read a file before an
    /// invalidation can't repopulate the cache after it.
    generation: Mutex<u64>,
}

impl NativeBuilder {
    /// Create a builder resolving module ids against `root`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: DashMap::new(),
            generation: Mutex::new(0),
        }
    }

    /// Number of modules currently cached.
    pub fn cached_modules(&self) -> usize {
        self.cache.len()
    }

    async fn load(&self, path: &Path) -> Result<Arc<CompiledModule>, BuildError> {
        if let Some(module) = self.cache.get(path) {
            return Ok(Arc::clone(&module));
        }

        let generation = *self.generation.lock();
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::ModuleNotFound(path.to_path_buf())
            } else {
                BuildError::Read {
                    file: path.to_path_buf(),
                    message: e.to_string(),
                }
            }
        })?;

        let id = module_id(&self.root, path);
        let analysis = analyze(&source, Path::new(&id))?;
        let module = Arc::new(CompiledModule {
            id,
            path: path.to_path_buf(),
            source,
            dependencies: analysis.dependencies,
            body: analysis.body,
        });

        let current = self.generation.lock();
        if *current == generation {
            self.cache.insert(path.to_path_buf(), Arc::clone(&module));
        }
        drop(current);
        Ok(module)
    }

    /// Load `entry` and everything it reaches through relative requires.
    ///
    /// Modules come back dependencies-first with the entry last.
    async fn load_graph(&self, entry: &Path) -> Result<Vec<Arc<CompiledModule>>, BuildError> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        // (module, index of the next dependency to visit)
        let mut stack: Vec<(Arc<CompiledModule>, usize)> = Vec::new();

        let entry_module = self.load(entry).await?;
        seen.insert(entry_module.path.clone());
        stack.push((entry_module, 0));

        while let Some((module, next)) = stack.pop() {
            if next >= module.dependencies.len() {
                ordered.push(module);
                continue;
            }

            let specifier = module.dependencies[next].clone();
            stack.push((Arc::clone(&module), next + 1));

            let Some(resolved) = resolve_relative(&module.path, &specifier) else {
                if is_relative(&specifier) {
                    return Err(BuildError::ResolutionFailed {
                        module: specifier,
                        importer: PathBuf::from(&module.id),
                    });
                }
                continue;
            };

            if seen.insert(resolved.clone()) {
                let dependency = self.load(&resolved).await?;
                stack.push((dependency, 0));
            }
        }

        Ok(ordered)
    }
}

#[async_trait]
impl ModuleBuilder for NativeBuilder {
    async fn compile(&self, path: &Path, flags: &BuildFlags) -> Result<BuildResult, BuildError> {
        let module = self.load(path).await?;

        let mut emitter = Emitter::default();
        emitter.register(&module, None);
        let (source, source_map) = emitter.finish(&module.id, flags)?;

        let mut graph = ModuleGraph::new();
        graph.insert(module.id.clone(), record(&module));

        Ok(BuildResult {
            source,
            source_map,
            module_graph: Some(graph),
            entry_modules: vec![module.id.clone()],
        })
    }

    async fn bundle(&self, path: &Path, flags: &BuildFlags) -> Result<BuildResult, BuildError> {
        let modules = self.load_graph(path).await?;

        let mut emitter = Emitter::default();
        for module in &modules {
            emitter.register(module, Some(&module.id));
        }

        let entry = modules
            .last()
            .map(|m| m.id.clone())
            .unwrap_or_else(|| module_id(&self.root, path));
        let mut entry_modules = vec![entry.clone()];
        entry_modules.extend(
            modules
                .iter()
                .filter(|m| m.id != entry)
                .map(|m| m.id.clone()),
        );

        let (source, source_map) = emitter.finish(&entry, flags)?;
        Ok(BuildResult {
            source,
            source_map,
            module_graph: Some(modules.iter().map(|m| (m.id.clone(), record(m))).collect()),
            entry_modules,
        })
    }

    async fn invalidate(&self, target: InvalidateTarget) {
        let mut generation = self.generation.lock();
        *generation += 1;
        match target {
            InvalidateTarget::Path(path) => {
                if self.cache.remove(&path).is_some() {
                    tracing::debug!("Invalidated {}", path.display());
                }
            }
            InvalidateTarget::All => self.cache.clear(),
        }
    }

    async fn trace(&self, path: &Path) -> Result<ModuleGraph, BuildError> {
        let modules = self.load_graph(path).await?;
        Ok(modules.iter().map(|m| (m.id.clone(), record(m))).collect())
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

fn record(module: &CompiledModule) -> ModuleRecord {
    ModuleRecord {
        path: module.path.clone(),
        source: module.source.clone(),
        dependencies: module.dependencies.clone(),
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Resolve a relative specifier the way CommonJS loaders do for plain files.
fn resolve_relative(importer: &Path, specifier: &str) -> Option<PathBuf> {
    if !is_relative(specifier) {
        return None;
    }
    let base = importer.parent()?.join(specifier).clean();

    let mut with_js = base.clone().into_os_string();
    with_js.push(".js");
    let candidates = [base.clone(), PathBuf::from(with_js), base.join("index.js")];

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .and_then(|found| maybe_real_path(&found).ok())
}

#[derive(Debug)]
struct Analysis {
    dependencies: Vec<String>,
    body: String,
}

/// Parse `source`, collect its require specifiers and rename the callees.
fn analyze(source: &str, file: &Path) -> Result<Analysis, BuildError> {
    let allocator = Allocator::default();
    let ParserReturn {
        program, errors, ..
    } = Parser::new(&allocator, source, SourceType::cjs()).parse();

    if let Some(error) = errors.first() {
        let offset = error
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map(|label| label.offset())
            .unwrap_or(0);
        let (line, column) = offset_to_line_col(source, offset);
        return Err(BuildError::Syntax {
            file: file.to_path_buf(),
            message: format!("{} ({}:{})", error.message, line, column),
        });
    }

    let mut collector = RequireCollector::default();
    collector.visit_program(&program);

    let mut body = source.to_string();
    for (start, end) in collector.callee_spans.iter().rev() {
        body.replace_range(*start as usize..*end as usize, REQUIRE_ALIAS);
    }

    Ok(Analysis {
        dependencies: collector.specifiers,
        body,
    })
}

/// 1-based line and column for a byte offset.
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, column)
}

#[derive(Default)]
struct RequireCollector {
    specifiers: Vec<String>,
    callee_spans: Vec<(u32, u32)>,
}

impl<'a> Visit<'a> for RequireCollector {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if let Expression::Identifier(ident) = &call.callee {
            if ident.name.as_str() == "require" {
                self.callee_spans.push((ident.span.start, ident.span.end));
                if let Some(Argument::StringLiteral(literal)) = call.arguments.first() {
                    self.specifiers.push(literal.value.to_string());
                }
            }
        }
        walk::walk_call_expression(self, call);
    }
}

/// Accumulates generated code and its line-granular source map.
#[derive(Default)]
struct Emitter {
    code: String,
    line: u32,
    map: SourceMapBuilder,
}

impl Emitter {
    fn line(&mut self, text: &str) {
        self.code.push_str(text);
        self.code.push('\n');
        self.line += 1;
    }

    /// Emit one `System.registerDynamic` call for `module`.
    fn register(&mut self, module: &CompiledModule, name: Option<&str>) {
        // Specifier lists are plain strings; serializing them cannot fail
        let deps = serde_json::to_string(&module.dependencies).unwrap_or_else(|_| "[]".into());
        let header = match name {
            Some(name) => format!(
                "System.registerDynamic({}, {}, true, function($__require, exports, module) {{",
                serde_json::Value::String(name.to_string()),
                deps
            ),
            None => format!(
                "System.registerDynamic({}, true, function($__require, exports, module) {{",
                deps
            ),
        };
        self.line(&header);

        let source_id = self.map.add_source_and_content(&module.id, &module.source);
        for (index, text) in module.body.lines().enumerate() {
            if text.is_empty() {
                self.line("");
            } else {
                self.map.add_token(
                    self.line,
                    BODY_INDENT.len() as u32,
                    index as u32,
                    0,
                    Some(source_id),
                    None,
                );
                self.line(&format!("{BODY_INDENT}{text}"));
            }
        }

        self.line("  return module.exports;");
        self.line("});");
    }

    /// Split into the generated code and, if requested, its source map.
    fn finish(mut self, file: &str, flags: &BuildFlags) -> Result<(String, Option<SourceMap>), BuildError> {
        if !flags.source_maps {
            return Ok((self.code, None));
        }

        self.map.set_file(file);
        let map = self.map.into_sourcemap();
        if flags.source_map_contents {
            return Ok((self.code, Some(map)));
        }

        let mut json = map.to_json();
        json.sources_content = None;
        let map = SourceMap::from_json(json)
            .map_err(|e| BuildError::Custom(format!("Failed to build source map: {}", e)))?;
        Ok((self.code, Some(map)))
    }
}
