//! Fingerprint-keyed native module cache.
//!
//! Layout: `<root>/<fingerprint>/entry.json` next to the binary. Entries are
//! assembled in a temporary directory and renamed into place, so a reader
//! never observes a half-written entry. Anything that fails validation is a
//! miss.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::{CACHE_ENTRY_FILENAME, CACHE_ENTRY_VERSION, NATIVE_CACHE_SUBDIR};
use crate::util::hash::{ContentHash, Fingerprint, hash_bytes, hash_file};

use super::toolchain::ToolchainOutput;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub version: u32,
  pub fingerprint: Fingerprint,
  /// Binary file name inside the entry directory.
  pub binary_path: String,
  pub binary_hash: ContentHash,
  pub shim_source_text: String,
  /// Seconds since the Unix epoch when the entry was written.
  pub timestamp: u64,
}

/// A validated cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModule {
  pub binary_path: PathBuf,
  pub shim_source: String,
}

#[derive(Debug, Clone)]
pub struct NativeCache {
  root: PathBuf,
}

impl NativeCache {
  /// Cache stored below `cache_root/native`.
  pub fn new(cache_root: &Path) -> Self {
    Self {
      root: cache_root.join(NATIVE_CACHE_SUBDIR),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
    self.root.join(&fingerprint.0)
  }

  /// Return the entry for `fingerprint` when it exists and is intact.
  pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedModule> {
    let dir = self.entry_dir(fingerprint);
    let text = match fs::read_to_string(dir.join(CACHE_ENTRY_FILENAME)) {
      Ok(text) => text,
      Err(_) => {
        debug!(fingerprint = %fingerprint.short(), "cache miss");
        return None;
      }
    };

    let entry: CacheEntry = match serde_json::from_str(&text) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(fingerprint = %fingerprint.short(), error = %e, "ignoring corrupt cache entry");
        return None;
      }
    };

    if entry.version != CACHE_ENTRY_VERSION || &entry.fingerprint != fingerprint {
      warn!(fingerprint = %fingerprint.short(), version = entry.version, "ignoring mismatched cache entry");
      return None;
    }

    // the binary name is data from disk; never let it escape the entry
    let plain_name = Path::new(&entry.binary_path)
      .file_name()
      .is_some_and(|name| name == std::ffi::OsStr::new(&entry.binary_path));
    if !plain_name {
      warn!(fingerprint = %fingerprint.short(), binary = %entry.binary_path, "ignoring cache entry with invalid binary path");
      return None;
    }

    let binary_path = dir.join(&entry.binary_path);
    match hash_file(&binary_path) {
      Ok(hash) if hash == entry.binary_hash => {}
      Ok(_) => {
        warn!(fingerprint = %fingerprint.short(), "ignoring cache entry with modified binary");
        return None;
      }
      Err(e) => {
        warn!(fingerprint = %fingerprint.short(), error = %e, "ignoring cache entry with unreadable binary");
        return None;
      }
    }

    debug!(fingerprint = %fingerprint.short(), "cache hit");
    Some(CachedModule {
      binary_path,
      shim_source: entry.shim_source_text,
    })
  }

  /// Write an entry for `fingerprint`, replacing any previous one.
  pub fn store(
    &self,
    fingerprint: &Fingerprint,
    binary_file_name: &str,
    output: &ToolchainOutput,
  ) -> io::Result<CachedModule> {
    fs::create_dir_all(&self.root)?;
    let staging = tempfile::Builder::new().prefix(".tmp-").tempdir_in(&self.root)?;

    fs::write(staging.path().join(binary_file_name), &output.binary)?;

    let entry = CacheEntry {
      version: CACHE_ENTRY_VERSION,
      fingerprint: fingerprint.clone(),
      binary_path: binary_file_name.to_string(),
      binary_hash: hash_bytes(&output.binary),
      shim_source_text: output.shim_source.clone(),
      timestamp: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
    };
    let json = serde_json::to_string_pretty(&entry).map_err(io::Error::other)?;
    fs::write(staging.path().join(CACHE_ENTRY_FILENAME), json)?;

    let dir = self.entry_dir(fingerprint);
    if dir.exists() {
      fs::remove_dir_all(&dir)?;
    }
    fs::rename(staging.path(), &dir)?;
    debug!(fingerprint = %fingerprint.short(), path = %dir.display(), "stored cache entry");

    Ok(CachedModule {
      binary_path: dir.join(binary_file_name),
      shim_source: entry.shim_source_text,
    })
  }
}
