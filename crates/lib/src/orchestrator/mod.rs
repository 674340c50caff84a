//! Build orchestration.
//!
//! [`BuildOrchestrator`] validates a [`BuildConfig`], prepares the output
//! directory, runs the standard stages through the executor and folds the
//! outcome into a [`BuildReport`].

mod output;
mod stages;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::config::{BuildConfig, validate};
use crate::execute::{
  Artifact, BuildError, BuildReport, BuildResult, DagResult, ExecuteConfig, StageFailure, execute_stages,
};
use crate::native::{NativeModuleCompiler, Toolchain, WasmPackToolchain};
use crate::platform::paths::cache_dir;

pub use output::{OutputPathError, prepare_output_dir};
pub use stages::{ASSETS, BUNDLE, EMIT, MINIFY, NATIVE, PipelineRunner, standard_stages};

/// Pseudo-stage reported for configuration errors.
pub const CONFIGURE_STAGE: &str = "configure";
/// Pseudo-stage reported for output directory errors.
pub const OUTPUT_STAGE: &str = "output";

/// Runs builds. One orchestrator (and its compiler) can serve many builds,
/// including concurrent ones.
pub struct BuildOrchestrator {
  compiler: Arc<NativeModuleCompiler>,
  execute: ExecuteConfig,
}

impl BuildOrchestrator {
  pub fn new(compiler: Arc<NativeModuleCompiler>) -> Self {
    Self {
      compiler,
      execute: ExecuteConfig::default(),
    }
  }

  /// Orchestrator with the given toolchain and cache root.
  pub fn with_toolchain(cache_root: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>) -> Self {
    Self::new(Arc::new(NativeModuleCompiler::new(cache_root, toolchain)))
  }

  /// Orchestrator invoking `wasm-pack` with the user cache directory.
  pub fn with_defaults() -> Self {
    Self::with_toolchain(cache_dir(), Arc::new(WasmPackToolchain))
  }

  pub fn with_execute_config(mut self, execute: ExecuteConfig) -> Self {
    self.execute = execute;
    self
  }

  pub fn compiler(&self) -> &Arc<NativeModuleCompiler> {
    &self.compiler
  }

  /// Build `config`.
  pub async fn run(&self, config: &BuildConfig) -> BuildResult {
    self.run_report(config).await.result
  }

  /// Build `config`, keeping timings, skipped stages and cache status.
  pub async fn run_report(&self, config: &BuildConfig) -> BuildReport {
    let start = Instant::now();
    info!(
      mode = %config.mode,
      entries = config.entries.len(),
      out_dir = %config.out_dir.display(),
      "starting build"
    );

    if let Err(e) = validate(config) {
      return early_failure(CONFIGURE_STAGE, e.into());
    }

    let out_dir = config.out_dir.clone();
    let clean = config.clean;
    let prepared = tokio::task::spawn_blocking(move || prepare_output_dir(&out_dir, clean))
      .await
      .map_err(|e| BuildError::Task(e.to_string()))
      .and_then(|r| r.map_err(BuildError::from));
    if let Err(e) = prepared {
      return early_failure(OUTPUT_STAGE, e);
    }

    let stages = standard_stages(config);
    let runner = Arc::new(PipelineRunner::new(Arc::new(config.clone()), self.compiler.clone()));
    let dag = match execute_stages(&stages, runner, &self.execute).await {
      Ok(dag) => dag,
      Err(e) => return early_failure(CONFIGURE_STAGE, e.into()),
    };

    let report = into_report(dag);
    match &report.result {
      BuildResult::Success(paths) => info!(
        files = paths.len(),
        cache_hit = ?report.cache_hit,
        elapsed = ?start.elapsed(),
        "build succeeded"
      ),
      BuildResult::Failure(failures) => error!(
        failures = failures.len(),
        skipped = report.skipped.len(),
        elapsed = ?start.elapsed(),
        "build failed"
      ),
    }
    report
  }
}

fn early_failure(stage: &str, error: BuildError) -> BuildReport {
  error!(stage, error = %error, "build aborted before any stage ran");
  BuildReport {
    result: BuildResult::Failure(vec![StageFailure {
      stage: stage.to_string(),
      error,
    }]),
    timings: Vec::new(),
    skipped: Vec::new(),
    cache_hit: None,
  }
}

fn into_report(dag: DagResult) -> BuildReport {
  let cache_hit = dag.artifacts.values().find_map(|artifact| match artifact {
    Artifact::Native { module, .. } => Some(module.cache_hit),
    _ => None,
  });

  let result = if dag.is_success() {
    BuildResult::Success(emitted_paths(dag.artifacts.values()))
  } else {
    BuildResult::Failure(dag.failures)
  };

  BuildReport {
    result,
    timings: dag.timings,
    skipped: dag.skipped,
    cache_hit,
  }
}

fn emitted_paths<'a>(artifacts: impl Iterator<Item = &'a Artifact>) -> Vec<PathBuf> {
  artifacts
    .flat_map(Artifact::emitted_paths)
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}

/// Resolve and load the config at `path`, then build it.
pub async fn build_file(orchestrator: &BuildOrchestrator, path: &Path) -> BuildReport {
  match crate::config::load_config(path, &Default::default()) {
    Ok(config) => orchestrator.run_report(&config).await,
    Err(e) => early_failure(CONFIGURE_STAGE, e.into()),
  }
}
