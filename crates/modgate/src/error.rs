//! Error types for the translation middleware.
//!
//! The hierarchy mirrors the error taxonomy of the middleware:
//! - **Configuration errors** (`ConfigError`) are fatal and surface from
//!   [`Translator::new`](crate::Translator::new) before any request is served.
//! - **Build errors** (`BuildError`) are recovered per request and become a
//!   `500` response carrying the error message.
//! - **Watch errors** are best-effort and only logged.
//!
//! # Example
//!
//! ```rust,no_run
//! use modgate::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_loader_config(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Check the 'loaderConfig' entry in modgate.config.json")
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the middleware.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// Configuration-related errors (missing root, unreadable loader config, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised by the module builder
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// File or directory not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// I/O errors from file system operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File watching errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with custom messages
    #[error("{0}")]
    Custom(String),
}

/// Configuration errors.
///
/// All of these are fatal: they are returned while the middleware is being
/// constructed so the host process fails before it starts serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Build root doesn't exist or is not a directory
    #[error("Build root is not a directory: {}\n\nHint: Set 'root' to an existing directory", .0.display())]
    RootNotFound(PathBuf),

    /// Loader configuration file doesn't exist
    #[error("Loader config file not found: {}\n\nHint: Check the 'loaderConfig' entries, they are resolved against 'root'", .0.display())]
    LoaderConfigNotFound(PathBuf),

    /// No usable module builder
    #[error("No module builder available: {0}\n\nHint: Use \"builder\": \"auto\" to fall back to the native builder")]
    BuilderUnavailable(String),

    /// Missing required configuration field
    #[error("Missing required field: {field}\n\nHint: {hint}")]
    MissingField {
        /// Name of the missing field
        field: String,
        /// Helpful hint for providing the field
        hint: String,
    },

    /// Invalid value for a configuration option
    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The invalid value
        value: String,
        /// Helpful hint for correct values
        hint: String,
    },

    /// Failed to extract configuration from its sources
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Errors produced while compiling, bundling or tracing a module.
///
/// The `Display` output of a build error is sent verbatim as the body of the
/// `500` response, so messages stay short and free of hints.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// Requested module doesn't exist on disk
    #[error("Module not found: {}", .0.display())]
    ModuleNotFound(PathBuf),

    /// Source failed to parse
    #[error("{message} in {}", .file.display())]
    Syntax {
        /// File that failed to parse
        file: PathBuf,
        /// Parser message, including line and column
        message: String,
    },

    /// A relative dependency could not be resolved while tracing
    #[error("Failed to resolve module '{module}' imported from {}", .importer.display())]
    ResolutionFailed {
        /// The specifier that couldn't be resolved
        module: String,
        /// The file that required it
        importer: PathBuf,
    },

    /// Reading a source file failed
    #[error("Failed to read {}: {message}", .file.display())]
    Read {
        /// File that couldn't be read
        file: PathBuf,
        /// Underlying I/O error message
        message: String,
    },

    /// The external builder process failed or replied with garbage
    #[error("External builder error: {0}")]
    External(String),

    /// Generic build error
    #[error("{0}")]
    Custom(String),
}

/// Result type alias using `TranslateError` as the default error type.
pub type Result<T, E = TranslateError> = std::result::Result<T, E>;

/// Extension trait for adding context to `Result` types.
pub trait ResultExt<T> {
    /// Turn a `NotFound` I/O error into [`TranslateError::FileNotFound`] for `path`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Append a hint to the error message.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    /// Prefix the error message with `msg`.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<TranslateError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| {
            let err: TranslateError = e.into();
            match err {
                TranslateError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                    TranslateError::FileNotFound(path.as_ref().to_path_buf())
                }
                other => other,
            }
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: TranslateError = e.into();
            TranslateError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: TranslateError = e.into();
            TranslateError::Custom(format!("{}: {}", msg, err))
        })
    }
}
