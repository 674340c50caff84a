//! Build configuration types.
//!
//! `RawConfig` mirrors the TOML file; `BuildConfig` is the resolved, immutable
//! form every stage reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::WASM_TARGET_TRIPLE;
use crate::minify::MinifyOptions;

/// Build mode.
///
/// Production minifies chunks and compiles the native module with the release
/// profile; development skips minification and uses the dev profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  #[default]
  Production,
  Development,
}

impl Mode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Mode::Production => "production",
      Mode::Development => "development",
    }
  }

  /// Cargo profile handed to the native toolchain.
  pub fn profile(&self) -> Profile {
    match self {
      Mode::Production => Profile::Release,
      Mode::Development => Profile::Dev,
    }
  }
}

impl std::fmt::Display for Mode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Native compile profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
  Release,
  Dev,
}

impl Profile {
  /// Flag understood by `wasm-pack build`.
  pub fn flag(&self) -> &'static str {
    match self {
      Profile::Release => "--release",
      Profile::Dev => "--dev",
    }
  }
}

/// Entry point declaration: a single path or a table of named entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEntry {
  Single(PathBuf),
  Named(BTreeMap<String, PathBuf>),
}

/// `[native]` section as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNative {
  pub crate_dir: Option<PathBuf>,
  pub out_name: Option<String>,
  pub target: Option<String>,
  pub shim_target: Option<String>,
  pub shim_dir: Option<PathBuf>,
  pub alias: Option<String>,
  pub toolchain: Option<String>,
  #[serde(default)]
  pub extra_args: Vec<String>,
}

/// The config file as written on disk. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
  pub mode: Option<Mode>,
  pub out_dir: Option<PathBuf>,
  pub filename: Option<String>,
  #[serde(default)]
  pub assets: Vec<PathBuf>,
  #[serde(default)]
  pub clean: bool,
  pub entry: Option<RawEntry>,
  pub native: Option<RawNative>,
  #[serde(default)]
  pub minify: MinifyOptions,
}

/// Values supplied on the command line that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
  pub mode: Option<Mode>,
}

/// Resolved `[native]` section. All paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
  /// Crate source directory handed to the toolchain.
  pub crate_dir: PathBuf,
  /// Base name of the generated files (`<name>_bg.wasm`, `<name>.js`).
  pub out_name: String,
  /// Target triple.
  pub target: String,
  /// Shim flavour passed to `wasm-pack --target`.
  pub shim_target: String,
  /// Directory (inside the crate) the shim is addressed from by imports.
  pub shim_dir: PathBuf,
  /// Optional bare specifier resolving to the shim.
  pub alias: Option<String>,
  /// Toolchain program.
  pub toolchain: String,
  /// Extra arguments appended to the toolchain invocation.
  pub extra_args: Vec<String>,
}

impl NativeConfig {
  pub const DEFAULT_SHIM_TARGET: &'static str = "web";
  pub const DEFAULT_SHIM_DIR: &'static str = "pkg";
  pub const DEFAULT_TOOLCHAIN: &'static str = "wasm-pack";

  /// Build a native section with defaults for everything but the crate
  /// directory and output name.
  pub fn new(crate_dir: impl Into<PathBuf>, out_name: impl Into<String>) -> Self {
    let crate_dir = crate_dir.into();
    Self {
      shim_dir: crate_dir.join(Self::DEFAULT_SHIM_DIR),
      crate_dir,
      out_name: out_name.into(),
      target: WASM_TARGET_TRIPLE.to_string(),
      shim_target: Self::DEFAULT_SHIM_TARGET.to_string(),
      alias: None,
      toolchain: Self::DEFAULT_TOOLCHAIN.to_string(),
      extra_args: Vec::new(),
    }
  }

  /// File name of the compiled binary, both in the cache and the output.
  pub fn binary_file_name(&self) -> String {
    format!("{}_bg.wasm", self.out_name)
  }

  /// Virtual path of the interop shim in the module graph.
  pub fn shim_path(&self) -> PathBuf {
    self.shim_dir.join(format!("{}.js", self.out_name))
  }
}

/// Immutable configuration resolved once per build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Directory containing the config file; relative paths resolve against it.
  pub root: PathBuf,
  pub mode: Mode,
  /// Entry name -> absolute entry module path.
  pub entries: BTreeMap<String, PathBuf>,
  pub out_dir: PathBuf,
  /// Output file name template; `[name]` is replaced by the entry name.
  pub filename: String,
  /// Static asset directories in copy order (later wins).
  pub assets: Vec<PathBuf>,
  pub native: Option<NativeConfig>,
  pub minify: MinifyOptions,
  /// Empty the output directory before building.
  pub clean: bool,
}

impl BuildConfig {
  pub const DEFAULT_FILENAME: &'static str = "[name].js";

  /// Minimal configuration: one entry, no assets, no native module.
  pub fn new(root: impl Into<PathBuf>, entry: impl AsRef<Path>, out_dir: impl AsRef<Path>) -> Self {
    let root = root.into();
    let entry = crate::util::fs::absolutize(&root, entry.as_ref());
    let name = entry_name_from_path(&entry);
    Self {
      out_dir: crate::util::fs::absolutize(&root, out_dir.as_ref()),
      entries: BTreeMap::from([(name, entry)]),
      root,
      mode: Mode::default(),
      filename: Self::DEFAULT_FILENAME.to_string(),
      assets: Vec::new(),
      native: None,
      minify: MinifyOptions::default(),
      clean: false,
    }
  }

  /// Output file name for an entry.
  pub fn chunk_file_name(&self, entry: &str) -> String {
    self.filename.replace("[name]", entry)
  }

  /// Whether chunks go through the minifier in this mode.
  pub fn minify_enabled(&self) -> bool {
    self.mode == Mode::Production
  }
}

/// Entry name for a single-path `entry`: the file stem, as webpack's `main`
/// would otherwise be uninformative.
pub fn entry_name_from_path(path: &Path) -> String {
  path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| "main".to_string())
}
