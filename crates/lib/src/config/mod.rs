//! Build configuration: loading, resolution and validation.

mod load;
mod types;
mod validate;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{load_config, parse_config, resolve};
pub use types::{
  BuildConfig, ConfigOverrides, Mode, NativeConfig, Profile, RawConfig, RawEntry, RawNative, entry_name_from_path,
};
pub use validate::validate;

/// Configuration errors. Detected before any stage runs; never retryable
/// without changing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config{}: {message}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
  Parse { path: Option<PathBuf>, message: String },

  #[error("missing required config key `{0}`")]
  MissingKey(&'static str),

  #[error("invalid value for `{key}`: {message}")]
  InvalidValue { key: &'static str, message: String },

  #[error("output directory {out_dir} aliases input {input}")]
  OutputAliasesInput { out_dir: PathBuf, input: PathBuf },

  #[error("asset directory {asset_dir} contains {file}, which the native module also writes")]
  AssetCollision { asset_dir: PathBuf, file: String },

  #[error("stage `{0}` is declared more than once")]
  DuplicateStage(String),

  #[error("stage `{stage}` depends on undeclared stage `{dependency}`")]
  MissingDependency { stage: String, dependency: String },

  #[error("dependency cycle detected involving stage `{0}`")]
  CycleDetected(String),
}
