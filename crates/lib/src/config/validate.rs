//! Configuration invariants checked before any stage runs.

use std::path::Path;

use crate::util::fs::{canonical_or_normalized, is_within};

use super::ConfigError;
use super::types::BuildConfig;

/// Check the invariants of a resolved configuration.
///
/// - the output directory must not alias an input: it may not equal an asset,
///   entry or crate directory, contain one, or sit inside an asset directory
///   (the crate directory is allowed to contain it)
/// - the filename template must keep chunk names distinct
/// - no asset directory may ship a file where the native binary lands
pub fn validate(config: &BuildConfig) -> Result<(), ConfigError> {
  let out_dir = canonical_or_normalized(&config.out_dir);

  if config.entries.is_empty() {
    return Err(ConfigError::InvalidValue {
      key: "entry",
      message: "at least one entry point is required".to_string(),
    });
  }

  for asset in &config.assets {
    let asset_dir = canonical_or_normalized(asset);
    if is_within(&out_dir, &asset_dir) || is_within(&asset_dir, &out_dir) {
      return Err(ConfigError::OutputAliasesInput {
        out_dir: config.out_dir.clone(),
        input: asset.clone(),
      });
    }
  }

  for entry in config.entries.values() {
    let entry = canonical_or_normalized(entry);
    if is_within(&entry, &out_dir) {
      return Err(ConfigError::OutputAliasesInput {
        out_dir: config.out_dir.clone(),
        input: entry,
      });
    }
  }

  if let Some(native) = &config.native {
    let crate_dir = canonical_or_normalized(&native.crate_dir);
    if is_within(&crate_dir, &out_dir) {
      return Err(ConfigError::OutputAliasesInput {
        out_dir: config.out_dir.clone(),
        input: native.crate_dir.clone(),
      });
    }

    if native.out_name.is_empty() {
      return Err(ConfigError::InvalidValue {
        key: "native.out_name",
        message: "must not be empty".to_string(),
      });
    }

    let binary = native.binary_file_name();
    for asset in &config.assets {
      if asset.join(&binary).exists() {
        return Err(ConfigError::AssetCollision {
          asset_dir: asset.clone(),
          file: binary,
        });
      }
    }
  }

  if config.entries.len() > 1 && !config.filename.contains("[name]") {
    return Err(ConfigError::InvalidValue {
      key: "filename",
      message: format!(
        "`{}` must contain [name] when more than one entry is configured",
        config.filename
      ),
    });
  }

  if Path::new(&config.filename).is_absolute() {
    return Err(ConfigError::InvalidValue {
      key: "filename",
      message: "must be relative to out_dir".to_string(),
    });
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::NativeConfig;
  use std::fs;
  use tempfile::TempDir;

  fn config_in(root: &Path) -> BuildConfig {
    BuildConfig::new(root, "js/index.js", "dist")
  }

  #[test]
  fn default_layout_is_valid() {
    let temp = TempDir::new().unwrap();
    let mut config = config_in(temp.path());
    config.assets = vec![temp.path().join("static")];
    // dist/ inside the crate directory, as in a wasm-pack template
    config.native = Some(NativeConfig::new(temp.path(), "index"));

    validate(&config).unwrap();
  }

  #[test]
  fn output_equal_to_asset_dir_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = config_in(temp.path());
    config.assets = vec![temp.path().join("dist")];

    assert!(matches!(validate(&config), Err(ConfigError::OutputAliasesInput { .. })));
  }

  #[test]
  fn output_inside_asset_dir_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = config_in(temp.path());
    config.assets = vec![temp.path().to_path_buf()];

    assert!(matches!(validate(&config), Err(ConfigError::OutputAliasesInput { .. })));
  }

  #[test]
  fn output_containing_crate_dir_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = config_in(temp.path());
    config.native = Some(NativeConfig::new(temp.path().join("dist/crate"), "index"));

    assert!(matches!(validate(&config), Err(ConfigError::OutputAliasesInput { .. })));
  }

  #[test]
  fn entry_inside_output_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = BuildConfig::new(temp.path(), "dist/index.js", "dist");

    assert!(matches!(validate(&config), Err(ConfigError::OutputAliasesInput { .. })));
  }

  #[test]
  fn asset_shipping_native_binary_is_rejected() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("static")).unwrap();
    fs::write(temp.path().join("static/index_bg.wasm"), b"stale").unwrap();

    let mut config = config_in(temp.path());
    config.assets = vec![temp.path().join("static")];
    config.native = Some(NativeConfig::new(temp.path(), "index"));

    assert!(matches!(validate(&config), Err(ConfigError::AssetCollision { .. })));
  }

  #[test]
  fn multiple_entries_need_name_placeholder() {
    let temp = TempDir::new().unwrap();
    let mut config = config_in(temp.path());
    config
      .entries
      .insert("admin".to_string(), temp.path().join("js/admin.js"));
    config.filename = "bundle.js".to_string();

    assert!(matches!(
      validate(&config),
      Err(ConfigError::InvalidValue { key: "filename", .. })
    ));
  }
}
