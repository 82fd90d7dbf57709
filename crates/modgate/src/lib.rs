//! modgate - module translation middleware for axum.
//!
//! Sits in front of a static file server and answers module-loader requests
//! with translated source instead of the raw file, while keeping HTTP
//! revalidation cheap and correct.
//!
//! # Architecture
//!
//! - [`coordinator`] - classifies requests and drives the build pipeline
//! - [`negotiate`] - `If-None-Match`/`ETag` handling against the upstream server
//! - [`dep_cache`] - per-module dependency map injected into the loader config
//! - [`watch`] - invalidates builder state when built files change
//! - [`source_map`] - repairs and inlines builder source maps
//! - [`builder`] - the builder abstraction and its native and command adapters
//! - [`config`] - configuration loading and validation
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::Router;
//! use modgate::{TranslateConfig, Translator};
//! use tower_http::services::ServeDir;
//!
//! #[tokio::main]
//! async fn main() -> modgate::Result<()> {
//!     let config = TranslateConfig::new("www");
//!     let translator = Translator::new(config).await?;
//!     let app = translator.apply(Router::new().fallback_service(ServeDir::new("www")));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod coordinator;
pub mod dep_cache;
pub mod error;
pub mod middleware;
pub mod negotiate;
pub mod paths;
pub mod source_map;
pub mod timing;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_utils;

pub use builder::{
    BuildFlags, BuildResult, CommandBuilder, InvalidateTarget, ModuleBuilder, ModuleGraph,
    NativeBuilder, select_builder,
};
pub use config::{BuilderKind, CommandSpec, ResolvedPaths, TranslateConfig};
pub use coordinator::{BuildMode, RequestKind, Translator};
pub use dep_cache::DependencyCache;
pub use error::{BuildError, ConfigError, Result, ResultExt, TranslateError};
pub use middleware::translate_modules;
