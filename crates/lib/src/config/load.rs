//! Reading `wasmpipe.toml` and resolving it into a `BuildConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::consts::WASM_TARGET_TRIPLE;
use crate::util::fs::absolutize;

use super::ConfigError;
use super::types::{BuildConfig, ConfigOverrides, NativeConfig, RawConfig, RawEntry, RawNative, entry_name_from_path};

/// Load and resolve a config file. Relative paths resolve against the file's
/// directory.
pub fn load_config(path: &Path, overrides: &ConfigOverrides) -> Result<BuildConfig, ConfigError> {
  let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let path = crate::util::fs::canonical_or_normalized(path);
  let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

  debug!(path = %path.display(), "loading config");
  parse_config(&text, &root, overrides).map_err(|e| match e {
    ConfigError::Parse { message, .. } => ConfigError::Parse { path: Some(path), message },
    other => other,
  })
}

/// Parse config text with an explicit project root.
pub fn parse_config(text: &str, root: &Path, overrides: &ConfigOverrides) -> Result<BuildConfig, ConfigError> {
  let raw: RawConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
    path: None,
    message: e.to_string(),
  })?;
  resolve(raw, root, overrides)
}

/// Turn the raw file into a resolved configuration.
pub fn resolve(raw: RawConfig, root: &Path, overrides: &ConfigOverrides) -> Result<BuildConfig, ConfigError> {
  let out_dir = raw.out_dir.ok_or(ConfigError::MissingKey("out_dir"))?;
  let entry = raw.entry.ok_or(ConfigError::MissingKey("entry"))?;

  let entries: BTreeMap<String, PathBuf> = match entry {
    RawEntry::Single(path) => {
      let path = absolutize(root, &path);
      BTreeMap::from([(entry_name_from_path(&path), path)])
    }
    RawEntry::Named(map) => map
      .into_iter()
      .map(|(name, path)| (name, absolutize(root, &path)))
      .collect(),
  };

  if entries.is_empty() {
    return Err(ConfigError::InvalidValue {
      key: "entry",
      message: "at least one entry point is required".to_string(),
    });
  }

  let native = raw.native.map(|n| resolve_native(n, root)).transpose()?;

  if !raw.minify.ignored.is_empty() {
    debug!(keys = ?raw.minify.ignored.keys().collect::<Vec<_>>(), "ignoring unrecognized minify options");
  }

  Ok(BuildConfig {
    root: root.to_path_buf(),
    mode: overrides.mode.or(raw.mode).unwrap_or_default(),
    entries,
    out_dir: absolutize(root, &out_dir),
    filename: raw.filename.unwrap_or_else(|| BuildConfig::DEFAULT_FILENAME.to_string()),
    assets: raw.assets.iter().map(|p| absolutize(root, p)).collect(),
    native,
    minify: raw.minify,
    clean: raw.clean,
  })
}

fn resolve_native(raw: RawNative, root: &Path) -> Result<NativeConfig, ConfigError> {
  let crate_dir = raw.crate_dir.ok_or(ConfigError::MissingKey("native.crate_dir"))?;
  let crate_dir = absolutize(root, &crate_dir);

  let out_name = match raw.out_name {
    Some(name) => name,
    None => crate_out_name(&crate_dir).ok_or(ConfigError::MissingKey("native.out_name"))?,
  };

  let mut native = NativeConfig::new(&crate_dir, out_name);
  if let Some(target) = raw.target {
    native.target = target;
  }
  if let Some(shim_target) = raw.shim_target {
    native.shim_target = shim_target;
  }
  if let Some(shim_dir) = raw.shim_dir {
    native.shim_dir = absolutize(&crate_dir, &shim_dir);
  }
  if let Some(toolchain) = raw.toolchain {
    native.toolchain = toolchain;
  }
  native.alias = raw.alias;
  native.extra_args = raw.extra_args;

  if native.target != WASM_TARGET_TRIPLE {
    warn!(target = %native.target, "non-default native target triple");
  }

  Ok(native)
}

#[derive(Deserialize)]
struct CargoManifest {
  package: Option<CargoPackage>,
}

#[derive(Deserialize)]
struct CargoPackage {
  name: String,
}

/// Derive the output name the way wasm-pack does: the crate name with dashes
/// replaced by underscores.
fn crate_out_name(crate_dir: &Path) -> Option<String> {
  let text = std::fs::read_to_string(crate_dir.join("Cargo.toml")).ok()?;
  let manifest: CargoManifest = toml::from_str(&text).ok()?;
  manifest.package.map(|p| p.name.replace('-', "_"))
}
