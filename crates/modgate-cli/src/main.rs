//! modgate CLI entry point.
//!
//! Parses arguments, initializes logging and dispatches the command.

use clap::Parser;
use miette::Result;
use modgate_cli::{cli, commands, error, logger, ui};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let verbose = args.verbose || args.command.wants_debug();
    logger::init_logger(verbose, args.quiet, args.no_color);
    ui::init_colors(args.no_color);

    let result = match args.command {
        cli::Command::Serve(serve_args) => commands::serve::execute(serve_args).await,
    };

    result.map_err(error::cli_error_to_miette)
}
