//! Middleware configuration with multi-source loading.
//!
//! Settings are merged from defaults, `modgate.config.json`, `MODGATE_*`
//! environment variables and finally caller overrides (the CLI).
//! Priority: overrides > environment > file > defaults

use crate::builder::BuildFlags;
use crate::error::{ConfigError, Result};
use crate::paths::{maybe_real_path, url_path_between};
use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "modgate.config.json";

/// Which module builder adapter to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    /// Probe the command builder first, fall back to the native builder
    #[default]
    Auto,
    /// In-process CommonJS translator
    Native,
    /// External builder process speaking JSON over stdio
    Command,
}

/// External builder invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Program to spawn (looked up on `PATH` when not a path)
    pub program: String,
    /// Arguments passed to the program
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Middleware configuration, loaded from `modgate.config.json` or built in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TranslateConfig {
    /// Build root: module request paths are resolved against this directory
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Directory the static server serves; defaults to `root`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_root: Option<PathBuf>,

    /// Loader configuration file(s), relative to `root`, concatenated in order
    #[serde(default = "default_loader_config", deserialize_with = "one_or_many")]
    pub loader_config: Vec<PathBuf>,

    /// Bundle the whole module graph instead of compiling the entry only
    #[serde(default)]
    pub bundle: bool,

    /// Watch built files and invalidate on change
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Inject the dependency cache into the loader configuration
    #[serde(default = "default_true")]
    pub dep_cache: bool,

    /// Log stage timings and watch setup failures
    #[serde(default)]
    pub debug: bool,

    /// Window in which repeated change events for one file coalesce
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Flags passed through to the builder
    #[serde(default)]
    pub build_flags: BuildFlags,

    /// Builder adapter selection
    #[serde(default)]
    pub builder: BuilderKind,

    /// External builder command (required for `builder: "command"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_command: Option<CommandSpec>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_loader_config() -> Vec<PathBuf> {
    vec![PathBuf::from("config.js")]
}

fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    10
}

/// Accept either `"config.js"` or `["a.js", "b.js"]`.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            server_root: None,
            loader_config: default_loader_config(),
            bundle: false,
            watch: true,
            dep_cache: true,
            debug: false,
            debounce_ms: default_debounce_ms(),
            build_flags: BuildFlags::default(),
            builder: BuilderKind::Auto,
            builder_command: None,
        }
    }
}

/// Absolute locations derived from a validated [`TranslateConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Canonical build root
    pub root: PathBuf,
    /// Canonical static server root
    pub server_root: PathBuf,
    /// Absolute loader configuration files, in merge order
    pub loader_configs: Vec<PathBuf>,
    /// Request path that serves the (augmented) loader configuration
    pub loader_config_url: Option<String>,
    /// `sourceRoot` written into source maps
    pub source_root: String,
}

impl TranslateConfig {
    /// Create a configuration for `root` with every other option defaulted.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Base figment: defaults, then the config file, then `MODGATE_*` env vars.
    ///
    /// Callers merge their own overrides on top and finish with
    /// [`TranslateConfig::from_figment`].
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            let default_path = Path::new(CONFIG_FILE_NAME);
            default_path.exists().then(|| default_path.to_path_buf())
        });

        if let Some(path) = config_file {
            figment = figment.merge(Json::file(path));
        }

        // Only single-word keys map cleanly from upper-case env names
        figment.merge(Env::prefixed("MODGATE_").only(&["root", "bundle", "watch", "debug"]))
    }

    /// Extract the configuration from a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()).into())
    }

    /// Load from defaults, the config file and the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(config_path))
    }

    /// Check the configuration without keeping the resolved paths.
    pub fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }

    /// Validate the configuration and resolve every path it names.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if:
    /// - `root` is not an existing directory
    /// - `serverRoot` does not contain `root`
    /// - a loader config file is missing while `depCache` is enabled
    /// - `builder` is `"command"` without a `builderCommand`
    pub fn resolve(&self) -> Result<ResolvedPaths> {
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotFound(self.root.clone()).into());
        }
        let root = maybe_real_path(&std::path::absolute(&self.root)?)?;

        let server_root = match &self.server_root {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(ConfigError::InvalidValue {
                        field: "serverRoot".to_string(),
                        value: dir.display().to_string(),
                        hint: "Server root must be an existing directory".to_string(),
                    }
                    .into());
                }
                maybe_real_path(&std::path::absolute(dir)?)?
            }
            None => root.clone(),
        };

        let source_root = url_path_between(&server_root, &root).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "serverRoot".to_string(),
                value: server_root.display().to_string(),
                hint: format!("Server root must contain the build root {}", root.display()),
            }
        })?;

        if self.loader_config.is_empty() && self.dep_cache {
            return Err(ConfigError::MissingField {
                field: "loaderConfig".to_string(),
                hint: "Name the loader configuration file or set \"depCache\": false".to_string(),
            }
            .into());
        }

        let mut loader_configs = Vec::with_capacity(self.loader_config.len());
        for file in &self.loader_config {
            let path = root.join(file);
            if self.dep_cache && !path.is_file() {
                return Err(ConfigError::LoaderConfigNotFound(path).into());
            }
            loader_configs.push(path);
        }

        let loader_config_url = loader_configs
            .first()
            .and_then(|first| url_path_between(&server_root, first));

        if self.builder == BuilderKind::Command && self.builder_command.is_none() {
            return Err(ConfigError::MissingField {
                field: "builderCommand".to_string(),
                hint: "Set \"builderCommand\": { \"program\": \"...\" }".to_string(),
            }
            .into());
        }

        if self.debounce_ms > 1_000 {
            return Err(ConfigError::InvalidValue {
                field: "debounceMs".to_string(),
                value: self.debounce_ms.to_string(),
                hint: "Debounce window is meant to swallow bursts of events, keep it under 1000"
                    .to_string(),
            }
            .into());
        }

        Ok(ResolvedPaths {
            root,
            server_root,
            loader_configs,
            loader_config_url,
            source_root,
        })
    }
}
