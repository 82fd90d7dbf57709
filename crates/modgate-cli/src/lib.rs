//! modgate CLI - a development static server with module translation.
//!
//! Serves a directory with `tower-http`'s `ServeDir` and layers the
//! [`modgate`] middleware on top, so module-loader requests get translated
//! source while everything else is served as-is.
//!
//! # Architecture
//!
//! - [`cli`] - argument definitions
//! - [`commands`] - command implementations
//! - [`error`] - CLI error type and miette conversion
//! - [`logger`] - tracing subscriber setup
//! - [`server`] - router assembly and the HTTP server loop
//! - [`ui`] - terminal status messages

pub mod cli;
pub mod commands;
pub mod error;
pub mod logger;
pub mod server;
pub mod ui;

pub use error::{CliError, Result};
