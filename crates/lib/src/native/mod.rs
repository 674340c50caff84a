//! Native module compilation with a fingerprint cache.
//!
//! A compile is keyed by a fingerprint over the crate source tree and the
//! compile options. Compiles of one fingerprint are serialised twice: by an
//! in-process async mutex (so tasks in one build queue up without blocking
//! threads) and by an advisory file lock (so separate processes sharing the
//! cache do too). Whoever gets the locks second finds the cache populated.

mod cache;
mod lock;
mod toolchain;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::consts::FINGERPRINT_EXCLUSIONS;
use crate::util::hash::{Fingerprint, hash_directory};

pub use cache::{CacheEntry, CachedModule, NativeCache};
pub use lock::{CacheLockError, FingerprintLock, LockMetadata};
pub use toolchain::{CompileOptions, Toolchain, ToolchainOutput, WasmPackToolchain};

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("native toolchain failed{}:\n{stderr}", exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
  ToolchainFailed { stderr: String, exit_code: Option<i32> },

  #[error("failed to run `{program}`: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("unsupported target `{target}`: wasm-pack only builds wasm32-unknown-unknown")]
  UnsupportedTarget { target: String },

  #[error("toolchain reported success but did not produce {}", path.display())]
  MissingOutput { path: PathBuf },

  #[error("failed to fingerprint native sources: {0}")]
  Fingerprint(String),

  #[error("native cache I/O failed at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Lock(#[from] CacheLockError),

  #[error("native compile task failed: {0}")]
  Task(String),
}

/// A compiled native module as served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeArtifact {
  pub fingerprint: Fingerprint,
  /// Binary inside the cache entry.
  pub binary_path: PathBuf,
  pub shim_source: String,
  /// The toolchain was not invoked.
  pub cache_hit: bool,
}

/// Compiles native modules through a [`Toolchain`], caching by fingerprint.
///
/// Share one compiler between concurrent builds; the in-process mutexes only
/// coordinate callers of the same instance.
pub struct NativeModuleCompiler {
  cache: NativeCache,
  cache_root: PathBuf,
  toolchain: Arc<dyn Toolchain>,
  inflight: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl NativeModuleCompiler {
  pub fn new(cache_root: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>) -> Self {
    let cache_root = cache_root.into();
    Self {
      cache: NativeCache::new(&cache_root),
      cache_root,
      toolchain,
      inflight: Mutex::new(HashMap::new()),
    }
  }

  pub fn cache(&self) -> &NativeCache {
    &self.cache
  }

  /// Fingerprint `source_dir` plus `options`. `exclude` names extra entries
  /// (file names or `/`-separated relative paths) left out of the tree hash.
  pub async fn fingerprint(
    &self,
    source_dir: &Path,
    options: &CompileOptions,
    exclude: &[String],
  ) -> Result<Fingerprint, CompileError> {
    let dir = source_dir.to_path_buf();
    let mut excluded: Vec<String> = FINGERPRINT_EXCLUSIONS.iter().map(|s| s.to_string()).collect();
    excluded.extend(exclude.iter().cloned());

    let tree = tokio::task::spawn_blocking(move || {
      let excluded: Vec<&str> = excluded.iter().map(String::as_str).collect();
      hash_directory(&dir, &excluded)
    })
    .await
    .map_err(|e| CompileError::Task(e.to_string()))?
    .map_err(|e| CompileError::Fingerprint(e.to_string()))?;

    Fingerprint::compute(&tree, options).map_err(|e| CompileError::Fingerprint(e.to_string()))
  }

  /// Compile `source_dir`, or serve the cached result for its fingerprint.
  pub async fn compile(
    &self,
    source_dir: &Path,
    options: &CompileOptions,
    exclude: &[String],
  ) -> Result<NativeArtifact, CompileError> {
    let fingerprint = self.fingerprint(source_dir, options, exclude).await?;
    debug!(fingerprint = %fingerprint.short(), crate_dir = %source_dir.display(), "fingerprinted native sources");

    let slot = {
      let mut inflight = self.inflight.lock().await;
      inflight.entry(fingerprint.clone()).or_default().clone()
    };

    let result = async {
      let _local = slot.clone().lock_owned().await;
      let _file = FingerprintLock::acquire(self.cache.root(), &fingerprint).await?;
      self.compile_locked(source_dir, options, &fingerprint).await
    }
    .await;

    let mut inflight = self.inflight.lock().await;
    // the map and `slot` are the only owners once nobody else is waiting
    if inflight.get(&fingerprint).is_some_and(|s| Arc::strong_count(s) == 2) {
      inflight.remove(&fingerprint);
    }

    result
  }

  async fn compile_locked(
    &self,
    source_dir: &Path,
    options: &CompileOptions,
    fingerprint: &Fingerprint,
  ) -> Result<NativeArtifact, CompileError> {
    let cache = self.cache.clone();
    let key = fingerprint.clone();
    let cached = tokio::task::spawn_blocking(move || cache.lookup(&key))
      .await
      .map_err(|e| CompileError::Task(e.to_string()))?;

    if let Some(cached) = cached {
      info!(fingerprint = %fingerprint.short(), "native module served from cache");
      return Ok(NativeArtifact {
        fingerprint: fingerprint.clone(),
        binary_path: cached.binary_path,
        shim_source: cached.shim_source,
        cache_hit: true,
      });
    }

    let scratch = tempfile::tempdir().map_err(|source| CompileError::Io {
      path: std::env::temp_dir(),
      source,
    })?;
    let output = self.toolchain.compile(source_dir, scratch.path(), options).await?;

    let cache = self.cache.clone();
    let key = fingerprint.clone();
    let binary_name = options.binary_file_name();
    let entry_dir = self.cache.entry_dir(fingerprint);
    let stored = tokio::task::spawn_blocking(move || cache.store(&key, &binary_name, &output))
      .await
      .map_err(|e| CompileError::Task(e.to_string()))?
      .map_err(|source| CompileError::Io { path: entry_dir, source })?;

    info!(fingerprint = %fingerprint.short(), cache = %self.cache_root.display(), "native module compiled and cached");
    Ok(NativeArtifact {
      fingerprint: fingerprint.clone(),
      binary_path: stored.binary_path,
      shim_source: stored.shim_source,
      cache_hit: false,
    })
  }
}
