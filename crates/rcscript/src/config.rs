//! Host configuration.
//!
//! Supported formats, detected from the file extension: YAML, TOML, JSON,
//! INI, RON, JSON5. File contents may reference environment variables as
//! `${VAR}` or `$VAR`. Environment overrides use a prefix and `__` as the
//! nesting separator, e.g. `RCSCRIPT_ENGINE__MAX_OPERATIONS=500`.

use crate::data::DEFAULT_INIT_FUNCTION;
use crate::engine::EngineConfig;
use crate::pool::DEFAULT_WORKER_THREADS;
use config::{Config as Cfg, Environment, File, FileFormat};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Default environment prefix.
pub const ENV_PREFIX: &str = "RCSCRIPT";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for a [`ScriptHost`](crate::ScriptHost) and the managers it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Width of the shared worker pool
    pub worker_threads: usize,
    /// Init function name given to new managers; empty means none
    pub default_init_function: String,
    /// Base directory for relative file scripts
    pub scripts_dir: Option<PathBuf>,
    /// Directory backing resource lookups
    pub resource_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            worker_threads: DEFAULT_WORKER_THREADS,
            default_init_function: DEFAULT_INIT_FUNCTION.to_string(),
            scripts_dir: None,
            resource_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::from_content(&content, format)
    }

    pub fn from_content(content: &str, format: FileFormat) -> ConfigResult<Self> {
        let substituted = substitute_env_vars(content);
        deserialize(Cfg::builder().add_source(File::from_str(&substituted, format)))
    }

    /// Defaults overridden by `PREFIX_*` variables.
    pub fn from_env(prefix: &str) -> ConfigResult<Self> {
        deserialize(Cfg::builder().add_source(environment(prefix)))
    }

    /// File values, then `PREFIX_*` environment overrides.
    pub fn load(path: impl AsRef<Path>, prefix: &str) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = substitute_env_vars(&std::fs::read_to_string(path)?);
        deserialize(
            Cfg::builder()
                .add_source(File::from_str(&content, format))
                .add_source(environment(prefix)),
        )
    }
}

fn environment(prefix: &str) -> Environment {
    Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn deserialize(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> ConfigResult<HostConfig> {
    builder
        .build()
        .and_then(Cfg::try_deserialize)
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Detects the configuration format from a file extension.
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Replaces `${VAR}` and `$VAR` with environment values; unknown variables stay as written.
pub fn substitute_env_vars(content: &str) -> String {
    static BRACED: OnceLock<Option<Regex>> = OnceLock::new();
    static SIMPLE: OnceLock<Option<Regex>> = OnceLock::new();

    let braced = BRACED.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());
    let simple = SIMPLE.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").ok());

    let mut result = content.to_string();
    for re in [braced, simple].into_iter().flatten() {
        result = re
            .replace_all(&result, |caps: &Captures| {
                std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
            })
            .into_owned();
    }
    result
}
