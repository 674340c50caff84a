//! Types for stage execution.
//!
//! This module defines the stage declarations, the artifacts stages hand to
//! each other, and the error and result types a build reports.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::assets::AssetError;
use crate::bundle::{Chunk, GraphError};
use crate::config::ConfigError;
use crate::minify::MinifyError;
use crate::native::{CompileError, NativeArtifact};
use crate::orchestrator::OutputPathError;

pub type StageId = String;

/// Which kind of artifact a stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
  Files,
  Native,
  Chunks,
}

impl std::fmt::Display for ArtifactKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ArtifactKind::Files => write!(f, "files"),
      ArtifactKind::Native => write!(f, "native"),
      ArtifactKind::Chunks => write!(f, "chunks"),
    }
  }
}

/// A declared stage: `depends_on` must name other declared stages and form a
/// DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDef {
  pub id: StageId,
  pub depends_on: Vec<StageId>,
  pub produces: ArtifactKind,
}

impl StageDef {
  pub fn new(id: impl Into<StageId>, depends_on: &[&str], produces: ArtifactKind) -> Self {
    Self {
      id: id.into(),
      depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
      produces,
    }
  }
}

/// The value a stage hands to its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
  /// Files written to the output directory.
  Files(Vec<PathBuf>),
  /// A compiled native module and where its binary was placed.
  Native { module: NativeArtifact, emitted: PathBuf },
  Chunks(Vec<Chunk>),
}

impl Artifact {
  pub fn kind(&self) -> ArtifactKind {
    match self {
      Artifact::Files(_) => ArtifactKind::Files,
      Artifact::Native { .. } => ArtifactKind::Native,
      Artifact::Chunks(_) => ArtifactKind::Chunks,
    }
  }

  /// Paths this artifact placed in the output directory.
  pub fn emitted_paths(&self) -> Vec<PathBuf> {
    match self {
      Artifact::Files(paths) => paths.clone(),
      Artifact::Native { emitted, .. } => vec![emitted.clone()],
      Artifact::Chunks(_) => Vec::new(),
    }
  }
}

/// Artifacts of completed stages, keyed by stage id.
pub type ArtifactRegistry = BTreeMap<StageId, Artifact>;

/// Errors a stage can fail with.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  OutputPath(#[from] OutputPathError),

  #[error(transparent)]
  Asset(#[from] AssetError),

  #[error(transparent)]
  Compile(#[from] CompileError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Minify(#[from] MinifyError),

  #[error("failed to write {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A dependency finished without the artifact this stage reads.
  #[error("stage `{stage}` expected {expected} artifact from `{dependency}`")]
  MissingArtifact {
    stage: StageId,
    dependency: StageId,
    expected: ArtifactKind,
  },

  #[error("stage `{0}` has no runner")]
  UnknownStage(StageId),

  /// The stage task panicked or was cancelled.
  #[error("stage task failed: {0}")]
  Task(String),
}

/// One stage's error.
#[derive(Debug)]
pub struct StageFailure {
  pub stage: StageId,
  pub error: BuildError,
}

impl std::fmt::Display for StageFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "[{}] {}", self.stage, self.error)
  }
}

/// Outcome of a build.
#[derive(Debug)]
pub enum BuildResult {
  /// Every stage succeeded. Paths written to the output directory, sorted.
  Success(Vec<PathBuf>),
  /// Failures in wave order, then declaration order within a wave.
  Failure(Vec<StageFailure>),
}

impl BuildResult {
  pub fn is_success(&self) -> bool {
    matches!(self, BuildResult::Success(_))
  }

  pub fn failures(&self) -> &[StageFailure] {
    match self {
      BuildResult::Success(_) => &[],
      BuildResult::Failure(failures) => failures,
    }
  }
}

/// A stage that did not run because a dependency failed or was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedStage {
  pub stage: StageId,
  pub failed_dependency: StageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
  pub stage: StageId,
  #[serde(with = "duration_millis")]
  pub duration: Duration,
}

/// A build result plus what it took to get there.
#[derive(Debug)]
pub struct BuildReport {
  pub result: BuildResult,
  /// Completed stages (successful or not) in completion order per wave.
  pub timings: Vec<StageTiming>,
  pub skipped: Vec<SkippedStage>,
  /// Whether the native stage was served from the cache. `None` when no
  /// native module is configured or the stage did not complete.
  pub cache_hit: Option<bool>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.result.is_success()
  }
}

/// Raw executor output before the orchestrator turns it into a result.
#[derive(Debug, Default)]
pub struct DagResult {
  pub artifacts: ArtifactRegistry,
  pub failures: Vec<StageFailure>,
  pub skipped: Vec<SkippedStage>,
  pub timings: Vec<StageTiming>,
}

impl DagResult {
  pub fn is_success(&self) -> bool {
    self.failures.is_empty() && self.skipped.is_empty()
  }

  /// Number of stages that completed successfully.
  pub fn completed(&self) -> usize {
    self.artifacts.len()
  }
}

/// Configuration for stage execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of stages running at once.
  pub parallelism: usize,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

mod duration_millis {
  use std::time::Duration;

  use serde::Serializer;

  pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
  }
}
