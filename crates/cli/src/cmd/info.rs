use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use wasmpipe_lib::config::{ConfigOverrides, load_config};
use wasmpipe_lib::consts::NATIVE_CACHE_SUBDIR;
use wasmpipe_lib::platform::paths::cache_dir;

use crate::output::{OutputFormat, print_json, print_stat, print_warning};

#[derive(Serialize)]
struct Info {
  version: &'static str,
  config: PathBuf,
  config_found: bool,
  cache_dir: PathBuf,
  native_cache_dir: PathBuf,
  out_dir: Option<PathBuf>,
  mode: Option<String>,
  entries: Vec<String>,
}

pub fn cmd_info(config: &Path, format: OutputFormat) -> Result<()> {
  let cache = cache_dir();
  let mut info = Info {
    version: env!("CARGO_PKG_VERSION"),
    config: config.to_path_buf(),
    config_found: config.is_file(),
    native_cache_dir: cache.join(NATIVE_CACHE_SUBDIR),
    cache_dir: cache,
    out_dir: None,
    mode: None,
    entries: Vec::new(),
  };

  if info.config_found {
    match load_config(config, &ConfigOverrides::default()) {
      Ok(resolved) => {
        info.out_dir = Some(resolved.out_dir.clone());
        info.mode = Some(resolved.mode.to_string());
        info.entries = resolved.entries.keys().cloned().collect();
      }
      Err(e) => print_warning(&format!("Config could not be loaded: {e}")),
    }
  }

  if format.is_json() {
    return print_json(&info);
  }

  println!("wasmpipe {}", info.version);
  print_stat("Config", &describe(&info.config, info.config_found));
  print_stat("Cache", &info.cache_dir.display().to_string());
  print_stat("Native cache", &info.native_cache_dir.display().to_string());
  if let Some(out_dir) = &info.out_dir {
    print_stat("Output", &out_dir.display().to_string());
  }
  if let Some(mode) = &info.mode {
    print_stat("Mode", mode);
  }
  if !info.entries.is_empty() {
    print_stat("Entries", &info.entries.join(", "));
  }
  Ok(())
}

fn describe(path: &Path, found: bool) -> String {
  if found {
    path.display().to_string()
  } else {
    format!("{} (not found)", path.display())
  }
}
