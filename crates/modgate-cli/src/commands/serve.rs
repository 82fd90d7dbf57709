//! `modgate serve` implementation.
//!
//! 1. Merge CLI flags over the file and environment configuration
//! 2. Build the translator (validates config, picks a builder, starts watching)
//! 3. Serve the server root on 127.0.0.1 until Ctrl+C

use crate::cli::ServeArgs;
use crate::error::Result;
use crate::{server, ui};
use figment::providers::Serialized;
use modgate::{TranslateConfig, TranslateError, Translator};
use std::net::{Ipv4Addr, SocketAddr};

/// Execute the serve command.
///
/// # Errors
///
/// Returns errors for invalid configuration, an unavailable builder, or a
/// server that fails to bind.
pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = load_config(&args)?;
    let translator = Translator::new(config).await?;

    let paths = translator.paths().clone();
    ui::info(&format!("Build root: {}", paths.root.display()));
    if paths.server_root != paths.root {
        ui::info(&format!("Server root: {}", paths.server_root.display()));
    }
    ui::info(&format!("Module builder: {}", translator.builder().name()));
    if translator.config().dep_cache {
        if let Some(url) = &paths.loader_config_url {
            ui::info(&format!("Loader config: {} (with dependency cache)", url));
        }
    }
    if translator.watcher().is_none() {
        ui::warning("File watching disabled, every module request rebuilds");
    }

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, args.port));
    let app = server::build_router(translator, &paths.server_root);
    server::serve(addr, app).await
}

/// Load the configuration with CLI flags taking precedence.
pub fn load_config(args: &ServeArgs) -> Result<TranslateConfig> {
    if let Some(path) = &args.config {
        if !path.is_file() {
            return Err(TranslateError::FileNotFound(path.clone()).into());
        }
    }

    let mut figment = TranslateConfig::figment(args.config.as_deref());

    if let Some(root) = &args.root {
        figment = figment.merge(Serialized::default("root", root));
    }
    if let Some(server_root) = &args.server_root {
        figment = figment.merge(Serialized::default("serverRoot", server_root));
    }
    if args.bundle {
        figment = figment.merge(Serialized::default("bundle", true));
    }
    if args.no_watch {
        figment = figment.merge(Serialized::default("watch", false));
    }
    if args.no_dep_cache {
        figment = figment.merge(Serialized::default("depCache", false));
    }
    if args.debug {
        figment = figment.merge(Serialized::default("debug", true));
    }

    Ok(TranslateConfig::from_figment(figment)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use serial_test::serial;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_flags_override_file() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("modgate.config.json");
        fs::write(
            &config_path,
            r#"{ "root": "from-file", "watch": true, "bundle": false, "debounceMs": 25 }"#,
        )
        .unwrap();

        let args = ServeArgs {
            root: Some(PathBuf::from("from-flag")),
            config: Some(config_path),
            bundle: true,
            no_watch: true,
            ..ServeArgs::default()
        };
        let config = load_config(&args).unwrap();

        assert_eq!(config.root, PathBuf::from("from-flag"));
        assert!(config.bundle);
        assert!(!config.watch);
        assert!(config.dep_cache);
        assert_eq!(config.debounce_ms, 25);
    }

    #[test]
    #[serial]
    fn test_flags_override_environment() {
        unsafe {
            std::env::set_var("MODGATE_DEBUG", "false");
        }
        let args = ServeArgs {
            debug: true,
            no_dep_cache: true,
            server_root: Some(PathBuf::from("/srv")),
            ..ServeArgs::default()
        };
        let config = load_config(&args);
        unsafe {
            std::env::remove_var("MODGATE_DEBUG");
        }

        let config = config.unwrap();
        assert!(config.debug);
        assert!(!config.dep_cache);
        assert_eq!(config.server_root, Some(PathBuf::from("/srv")));
    }

    #[test]
    fn test_missing_config_file() {
        let args = ServeArgs {
            config: Some(PathBuf::from("/no/such/modgate.config.json")),
            ..ServeArgs::default()
        };
        let err = load_config(&args).unwrap_err();
        assert!(matches!(
            err,
            CliError::Translate(TranslateError::FileNotFound(_))
        ));
    }
}
