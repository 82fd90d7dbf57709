//! Translation request coordinator.
//!
//! [`Translator`] owns the builder, the dependency cache and the watch
//! invalidator, and drives each module request through them:
//!
//! 1. conditional headers are rewritten and the request goes upstream
//! 2. an upstream `304` is tagged and returned
//! 3. an upstream `200` triggers a compile or bundle in a spawned task
//! 4. the build result is recorded (watch + dependency cache), its source
//!    map repaired and inlined
//! 5. the translated body is hashed and negotiated into `200` or `304`
//!
//! Build failures end the pipeline with a `500` carrying the message.

use crate::builder::{
    BuildResult, InvalidateTarget, ModuleBuilder, select_builder,
};
use crate::config::{ResolvedPaths, TranslateConfig};
use crate::dep_cache::DependencyCache;
use crate::error::{BuildError, Result, ResultExt};
use crate::negotiate;
use crate::paths::{module_id, resolve_real_path, resolve_request_path};
use crate::source_map;
use crate::timing::StageTimer;
use crate::watch::WatchInvalidator;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Content type of translated modules.
pub const JAVASCRIPT_CONTENT_TYPE: &str = "application/javascript; charset=UTF-8";

/// Whether the builder compiles the entry alone or bundles its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildMode {
    Compile,
    Bundle,
}

/// How a request is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// The loader configuration file, served with the dependency cache appended
    LoaderConfig,
    /// A module to translate, with its file under the build root
    Module(PathBuf),
    /// Anything else, forwarded untouched
    PassThrough,
}

type SharedBuild = Arc<OnceCell<Result<Arc<BuildResult>, BuildError>>>;

struct TranslatorState {
    config: TranslateConfig,
    paths: ResolvedPaths,
    mode: BuildMode,
    builder: Arc<dyn ModuleBuilder>,
    dep_cache: Arc<DependencyCache>,
    watcher: Option<Arc<WatchInvalidator>>,
    in_flight: DashMap<(BuildMode, PathBuf), SharedBuild>,
}

/// The translation middleware.
///
/// Cheap to clone; all clones share the same builder and caches.
#[derive(Clone)]
pub struct Translator {
    state: Arc<TranslatorState>,
}

impl Translator {
    /// Validate `config`, pick a builder and start watching if enabled.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config is invalid or no builder
    /// can be used, and a watch error if the platform watcher can't start.
    pub async fn new(config: TranslateConfig) -> Result<Self> {
        let paths = config.resolve()?;
        let builder = select_builder(&config, &paths).await?;
        Self::from_parts(config, paths, builder, Arc::new(DependencyCache::new()))
    }

    /// Assemble a translator from already-built parts.
    ///
    /// Must be called from within a Tokio runtime when watching is enabled.
    pub fn from_parts(
        config: TranslateConfig,
        paths: ResolvedPaths,
        builder: Arc<dyn ModuleBuilder>,
        dep_cache: Arc<DependencyCache>,
    ) -> Result<Self> {
        let watcher = if config.watch {
            Some(WatchInvalidator::new(
                Arc::clone(&builder),
                Duration::from_millis(config.debounce_ms),
                config.debug,
            )?)
        } else {
            None
        };

        let mode = if config.bundle {
            BuildMode::Bundle
        } else {
            BuildMode::Compile
        };

        tracing::info!(
            "Translating modules under {} ({} builder, {:?} mode, watch {})",
            paths.root.display(),
            builder.name(),
            mode,
            if watcher.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            state: Arc::new(TranslatorState {
                config,
                paths,
                mode,
                builder,
                dep_cache,
                watcher,
                in_flight: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &TranslateConfig {
        &self.state.config
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.state.paths
    }

    pub fn builder(&self) -> &Arc<dyn ModuleBuilder> {
        &self.state.builder
    }

    pub fn dependency_cache(&self) -> &Arc<DependencyCache> {
        &self.state.dep_cache
    }

    pub fn watcher(&self) -> Option<&Arc<WatchInvalidator>> {
        self.state.watcher.as_ref()
    }

    /// Decide how `request` is handled.
    pub fn classify(&self, request: &Request) -> RequestKind {
        if request.method() != Method::GET {
            return RequestKind::PassThrough;
        }

        let path = request.uri().path();
        if self.state.config.dep_cache
            && self.state.paths.loader_config_url.as_deref() == Some(path)
        {
            return RequestKind::LoaderConfig;
        }

        if !negotiate::wants_translation(request.headers()) {
            return RequestKind::PassThrough;
        }

        match resolve_request_path(&self.state.paths.server_root, path) {
            Some(file) if file.starts_with(&self.state.paths.root) => RequestKind::Module(file),
            _ => RequestKind::PassThrough,
        }
    }

    /// Handle one request in front of `next`.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        match self.classify(&request) {
            RequestKind::PassThrough => next.run(request).await,
            RequestKind::LoaderConfig => self.serve_loader_config().await,
            RequestKind::Module(file) => self.translate(request, next, file).await,
        }
    }

    async fn serve_loader_config(&self) -> Response {
        match self.loader_config_source().await {
            Ok(body) => {
                let length = body.len();
                let mut response = Response::new(Body::from(body));
                let headers = response.headers_mut();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(JAVASCRIPT_CONTENT_TYPE),
                );
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                response
            }
            Err(e) => {
                tracing::warn!("Failed to serve loader config: {}", e);
                plain_error(e.to_string())
            }
        }
    }

    /// Loader config files concatenated, followed by the dependency cache.
    pub async fn loader_config_source(&self) -> Result<String> {
        let mut source = String::new();
        for file in &self.state.paths.loader_configs {
            let content = tokio::fs::read_to_string(file)
                .await
                .with_path(file)
                .with_hint("Check the 'loaderConfig' entries in modgate.config.json")?;
            source.push_str(&content);
            if !content.ends_with('\n') {
                source.push('\n');
            }
        }
        source.push_str(&self.state.dep_cache.config_statement()?);
        Ok(source)
    }

    async fn translate(&self, mut request: Request, next: Next, file: PathBuf) -> Response {
        let mut timer = StageTimer::start(
            format!("GET {}", request.uri().path()),
            self.state.config.debug,
        );

        let inbound = negotiate::rewrite_request_headers(request.headers_mut());
        let upstream = next.run(request).await;
        timer.stage("upstream");

        match upstream.status() {
            StatusCode::NOT_MODIFIED => {
                let (mut parts, body) = upstream.into_parts();
                negotiate::tag_not_modified(&mut parts.headers);
                timer.finish();
                return Response::from_parts(parts, body);
            }
            StatusCode::OK => {}
            _ => return upstream,
        }

        // The raw file body is replaced by the translation
        let (mut parts, _) = upstream.into_parts();

        // Detached so a dropped connection doesn't abort the build or its side effects
        let translator = self.clone();
        let task_file = file.clone();
        let outcome = tokio::spawn(async move { translator.build_module(&task_file).await })
            .await
            .unwrap_or_else(|e| Err(BuildError::Custom(format!("Build task failed: {}", e))));
        timer.stage("build");

        let response = match outcome {
            Ok(body) => {
                let etag = negotiate::compute_etag(body.as_bytes());
                let etag_value = HeaderValue::from_str(&etag).ok();

                parts.headers.remove(header::ETAG);
                parts.headers.remove(header::LAST_MODIFIED);
                parts.headers.remove(header::ACCEPT_RANGES);
                if let Some(value) = etag_value {
                    parts.headers.insert(header::ETAG, value);
                }

                if negotiate::matches(&etag, &inbound) {
                    parts.status = StatusCode::NOT_MODIFIED;
                    parts.headers.remove(header::CONTENT_LENGTH);
                    parts.headers.remove(header::CONTENT_TYPE);
                    Response::from_parts(parts, Body::empty())
                } else {
                    parts.headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(JAVASCRIPT_CONTENT_TYPE),
                    );
                    parts
                        .headers
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                    Response::from_parts(parts, Body::from(body))
                }
            }
            Err(e) => {
                tracing::warn!("Failed to translate {}: {}", file.display(), e);
                let message = e.to_string();
                parts.status = StatusCode::INTERNAL_SERVER_ERROR;
                for name in [
                    header::ETAG,
                    header::LAST_MODIFIED,
                    header::ACCEPT_RANGES,
                    header::CONTENT_LENGTH,
                ] {
                    parts.headers.remove(name);
                }
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(message.len()));
                Response::from_parts(parts, Body::from(message))
            }
        };

        timer.finish();
        response
    }

    /// Build `file` and return the body to send, source map included.
    async fn build_module(&self, file: &Path) -> Result<String, BuildError> {
        let file = resolve_real_path(file).await.map_err(|e| BuildError::Read {
            file: file.to_path_buf(),
            message: e.to_string(),
        })?;

        if self.state.watcher.is_none() {
            self.state.builder.invalidate(InvalidateTarget::All).await;
        }

        let result = self.build(self.state.mode, &file).await?;
        self.record_build(&file, &result);

        let mut source = result.source.clone();
        if self.state.config.build_flags.source_maps {
            if let Some(map) = &result.source_map {
                let entry_id = result
                    .entry_modules
                    .first()
                    .cloned()
                    .unwrap_or_else(|| module_id(&self.state.paths.root, &file));
                let entry_source = match result
                    .module_graph
                    .as_ref()
                    .and_then(|graph| graph.get(&entry_id))
                {
                    Some(record) => Some(record.source.clone()),
                    None => tokio::fs::read_to_string(&file).await.ok(),
                };

                let map = source_map::repair(
                    map,
                    &self.state.paths.source_root,
                    entry_source.as_deref().map(|text| (entry_id.as_str(), text)),
                )
                .map_err(|e| BuildError::Custom(format!("Invalid source map: {}", e)))?;
                source_map::inline(&mut source, &map);
            }
        }

        Ok(source)
    }

    /// Run the builder, coalescing same-path builds when it isn't re-entrant.
    async fn build(&self, mode: BuildMode, file: &Path) -> Result<Arc<BuildResult>, BuildError> {
        if self.state.builder.is_reentrant() {
            return self.run_builder(mode, file).await.map(Arc::new);
        }

        let key = (mode, file.to_path_buf());
        let cell = self.state.in_flight.entry(key.clone()).or_default().clone();
        let result = cell
            .get_or_init(|| async { self.run_builder(mode, file).await.map(Arc::new) })
            .await
            .clone();
        self.state
            .in_flight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    async fn run_builder(&self, mode: BuildMode, file: &Path) -> Result<BuildResult, BuildError> {
        let flags = &self.state.config.build_flags;
        match mode {
            BuildMode::Compile => self.state.builder.compile(file, flags).await,
            BuildMode::Bundle => self.state.builder.bundle(file, flags).await,
        }
    }

    /// Watch the files behind `result` and feed the dependency cache.
    fn record_build(&self, file: &Path, result: &BuildResult) {
        if let Some(watcher) = &self.state.watcher {
            let files = match self.state.mode {
                BuildMode::Compile => vec![file.to_path_buf()],
                BuildMode::Bundle => {
                    let files = result.files();
                    if files.is_empty() {
                        vec![file.to_path_buf()]
                    } else {
                        files
                    }
                }
            };
            watcher.watch(files);
        }

        if !self.state.config.dep_cache {
            return;
        }

        match (self.state.mode, &result.module_graph) {
            (BuildMode::Compile, Some(graph)) => {
                self.state
                    .dep_cache
                    .merge_all(self.state.builder.dependencies(graph));
            }
            _ => self.spawn_trace(file.to_path_buf()),
        }
    }

    /// Trace `file` in the background and merge its graph when done.
    fn spawn_trace(&self, file: PathBuf) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match state.builder.trace(&file).await {
                Ok(graph) => {
                    let dependencies = state.builder.dependencies(&graph);
                    tracing::debug!(
                        "Traced {} module(s) from {}",
                        dependencies.len(),
                        file.display()
                    );
                    state.dep_cache.merge_all(dependencies);
                }
                Err(e) => tracing::debug!("Failed to trace {}: {}", file.display(), e),
            }
        });
    }
}

fn plain_error(message: String) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=UTF-8"));
    response
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("root", &self.state.paths.root)
            .field("builder", &self.state.builder.name())
            .field("mode", &self.state.mode)
            .field("watch", &self.state.watcher.is_some())
            .finish()
    }
}
