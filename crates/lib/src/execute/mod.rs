//! Stage execution.
//!
//! Stages run wave by wave. Within a wave every ready stage is spawned on its
//! own task, bounded by a semaphore, and the wave is joined before the next
//! one starts. A failed stage does not stop its siblings; stages depending on
//! it (directly or through a skipped stage) are skipped. Nothing is rolled
//! back.

pub mod dag;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ConfigError;

pub use dag::StageDag;
pub use types::{
  Artifact, ArtifactKind, ArtifactRegistry, BuildError, BuildReport, BuildResult, DagResult, ExecuteConfig,
  SkippedStage, StageDef, StageFailure, StageId, StageTiming,
};

/// Runs one stage given the artifacts of every stage completed so far.
#[async_trait]
pub trait StageRunner: Send + Sync + 'static {
  async fn run(&self, stage: &StageDef, inputs: Arc<ArtifactRegistry>) -> Result<Artifact, BuildError>;
}

/// Execute `stages` with `runner`.
///
/// Fails only when the declarations themselves are invalid; stage errors are
/// collected in the returned [`DagResult`].
pub async fn execute_stages<R: StageRunner>(
  stages: &[StageDef],
  runner: Arc<R>,
  config: &ExecuteConfig,
) -> Result<DagResult, ConfigError> {
  let dag = StageDag::new(stages)?;
  let waves = dag.waves();
  info!(stages = dag.stage_count(), wave_count = waves.len(), "computed execution waves");

  let defs: HashMap<&str, &StageDef> = stages.iter().map(|s| (s.id.as_str(), s)).collect();
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
  let mut result = DagResult::default();
  let mut failed: HashSet<StageId> = HashSet::new();

  for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, stages = wave.len(), "executing wave");

    let mut ready = Vec::new();
    for id in wave {
      let failed_dep = dag.dependencies(id).into_iter().find(|dep| failed.contains(dep));
      match failed_dep {
        Some(dep) => {
          warn!(stage = %id, failed_dep = %dep, "skipping stage due to failed dependency");
          result.skipped.push(SkippedStage {
            stage: id.clone(),
            failed_dependency: dep,
          });
          failed.insert(id.clone());
        }
        None => {
          if let Some(def) = defs.get(id.as_str()) {
            ready.push((*def).clone());
          }
        }
      }
    }

    if ready.is_empty() {
      continue;
    }

    let snapshot = Arc::new(std::mem::take(&mut result.artifacts));
    let outcomes = execute_wave(&ready, runner.clone(), snapshot.clone(), semaphore.clone()).await;
    result.artifacts = Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone());

    for outcome in outcomes {
      result.timings.push(StageTiming {
        stage: outcome.stage.clone(),
        duration: outcome.duration,
      });
      match outcome.result {
        Ok(artifact) => {
          info!(stage = %outcome.stage, elapsed_ms = outcome.duration.as_millis() as u64, "stage succeeded");
          result.artifacts.insert(outcome.stage, artifact);
        }
        Err(e) => {
          error!(stage = %outcome.stage, error = %e, "stage failed");
          failed.insert(outcome.stage.clone());
          result.failures.push(StageFailure {
            stage: outcome.stage,
            error: e,
          });
        }
      }
    }
  }

  info!(
    completed = result.completed(),
    failed = result.failures.len(),
    skipped = result.skipped.len(),
    "stage execution complete"
  );

  Ok(result)
}

struct StageOutcome {
  stage: StageId,
  duration: std::time::Duration,
  result: Result<Artifact, BuildError>,
}

/// Run one wave to completion. Outcomes come back in the wave's order.
async fn execute_wave<R: StageRunner>(
  stages: &[StageDef],
  runner: Arc<R>,
  inputs: Arc<ArtifactRegistry>,
  semaphore: Arc<Semaphore>,
) -> Vec<StageOutcome> {
  let mut join_set = JoinSet::new();

  for (position, stage) in stages.iter().enumerate() {
    let stage = stage.clone();
    let runner = runner.clone();
    let inputs = inputs.clone();
    let semaphore = semaphore.clone();
    let span = info_span!("stage", id = %stage.id);

    join_set.spawn(
      async move {
        let started = Instant::now();
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => runner.run(&stage, inputs).await,
          Err(e) => Err(BuildError::Task(e.to_string())),
        };
        (position, started.elapsed(), result)
      }
      .instrument(span),
    );
  }

  let mut slots: Vec<Option<StageOutcome>> = stages.iter().map(|_| None).collect();
  let mut panics = Vec::new();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((position, duration, result)) => {
        slots[position] = Some(StageOutcome {
          stage: stages[position].id.clone(),
          duration,
          result,
        });
      }
      Err(e) => {
        error!(error = %e, "stage task panicked");
        panics.push(e.to_string());
      }
    }
  }

  // a panicked task never reports its position; it is one of the empty slots
  let mut panics = panics.into_iter();
  slots
    .into_iter()
    .zip(stages)
    .map(|(slot, stage)| {
      slot.unwrap_or_else(|| StageOutcome {
        stage: stage.id.clone(),
        duration: std::time::Duration::ZERO,
        result: Err(BuildError::Task(
          panics.next().unwrap_or_else(|| "stage task did not complete".to_string()),
        )),
      })
    })
    .collect()
}
