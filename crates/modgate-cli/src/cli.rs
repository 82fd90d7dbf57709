//! Command-line interface definition.
//!
//! - `modgate serve` - serve a directory, translating module-loader requests

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// modgate - module translation for static development servers
#[derive(Parser, Debug)]
#[command(
    name = "modgate",
    version,
    about = "Serve a directory with on-the-fly module translation",
    long_about = "modgate serves a directory over HTTP and translates CommonJS modules\n\
                  requested by a module loader, with ETag revalidation, file watching\n\
                  and a dependency cache injected into the loader configuration."
)]
pub struct Cli {
    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a directory and translate module requests
    Serve(ServeArgs),
}

impl Command {
    /// Whether the command asked for debug output.
    pub fn wants_debug(&self) -> bool {
        match self {
            Command::Serve(args) => args.debug,
        }
    }
}

/// Arguments for `modgate serve`.
///
/// Flags override values from `modgate.config.json` and `MODGATE_*`
/// environment variables.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Build root: module paths are resolved against this directory
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Directory served over HTTP (defaults to the build root)
    #[arg(long, value_name = "DIR")]
    pub server_root: Option<PathBuf>,

    /// Configuration file (defaults to ./modgate.config.json if present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value = "3000", value_name = "PORT")]
    pub port: u16,

    /// Bundle each module with its dependencies
    #[arg(long)]
    pub bundle: bool,

    /// Rebuild on every request instead of watching files
    #[arg(long)]
    pub no_watch: bool,

    /// Don't inject the dependency cache into the loader configuration
    #[arg(long)]
    pub no_dep_cache: bool,

    /// Log per-request stage timings and watch failures
    #[arg(long)]
    pub debug: bool,
}
