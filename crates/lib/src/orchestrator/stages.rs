//! The standard build pipeline.
//!
//! `assets` and `native` have no dependencies and run in the first wave.
//! `bundle` waits for both so that the interop shim is a resolved node by the
//! time the module graph is walked; `minify` and `emit` follow in order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::assets::AssetStager;
use crate::bundle::{BundleGraphBuilder, Chunk, ExtraNode, ExtraNodes};
use crate::config::BuildConfig;
use crate::execute::{Artifact, ArtifactKind, ArtifactRegistry, BuildError, StageDef, StageRunner};
use crate::minify::Minifier;
use crate::native::{CompileError, CompileOptions, NativeModuleCompiler};
use crate::util::fs::{canonical_or_normalized, is_within, relative_to, to_slash};

pub const ASSETS: &str = "assets";
pub const NATIVE: &str = "native";
pub const BUNDLE: &str = "bundle";
pub const MINIFY: &str = "minify";
pub const EMIT: &str = "emit";

/// Stage declarations for `config`. `native` is only declared when a native
/// module is configured.
pub fn standard_stages(config: &BuildConfig) -> Vec<StageDef> {
  let mut stages = vec![StageDef::new(ASSETS, &[], ArtifactKind::Files)];
  if config.native.is_some() {
    stages.push(StageDef::new(NATIVE, &[], ArtifactKind::Native));
    stages.push(StageDef::new(BUNDLE, &[ASSETS, NATIVE], ArtifactKind::Chunks));
  } else {
    stages.push(StageDef::new(BUNDLE, &[ASSETS], ArtifactKind::Chunks));
  }
  stages.push(StageDef::new(MINIFY, &[BUNDLE], ArtifactKind::Chunks));
  stages.push(StageDef::new(EMIT, &[MINIFY], ArtifactKind::Files));
  stages
}

/// Runs the standard stages against one configuration.
pub struct PipelineRunner {
  config: Arc<BuildConfig>,
  compiler: Arc<NativeModuleCompiler>,
  stager: AssetStager,
  minifier: Arc<Minifier>,
}

impl PipelineRunner {
  pub fn new(config: Arc<BuildConfig>, compiler: Arc<NativeModuleCompiler>) -> Self {
    let minifier = Arc::new(Minifier::new(config.minify.clone()));
    Self {
      config,
      compiler,
      stager: AssetStager::new(),
      minifier,
    }
  }

  async fn run_assets(&self) -> Result<Artifact, BuildError> {
    let stager = self.stager.clone();
    let sources = self.config.assets.clone();
    let dest = self.config.out_dir.clone();
    let copied = tokio::task::spawn_blocking(move || stager.stage(&sources, &dest))
      .await
      .map_err(|e| BuildError::Task(e.to_string()))??;
    Ok(Artifact::Files(copied))
  }

  async fn run_native(&self) -> Result<Artifact, BuildError> {
    let Some(native) = &self.config.native else {
      return Err(BuildError::UnknownStage(NATIVE.to_string()));
    };

    let options = CompileOptions::new(native, self.config.mode);
    let exclude = fingerprint_exclusions(&native.crate_dir, &[&native.shim_dir, &self.config.out_dir]);
    let module = self.compiler.compile(&native.crate_dir, &options, &exclude).await?;

    let emitted = self.config.out_dir.join(native.binary_file_name());
    tokio::fs::copy(&module.binary_path, &emitted)
      .await
      .map_err(|source| BuildError::Compile(CompileError::Io {
        path: emitted.clone(),
        source,
      }))?;

    info!(
      binary = %emitted.display(),
      fingerprint = %module.fingerprint.short(),
      cache_hit = module.cache_hit,
      "native module placed"
    );
    Ok(Artifact::Native { module, emitted })
  }

  async fn run_bundle(&self, stage: &StageDef, inputs: &ArtifactRegistry) -> Result<Artifact, BuildError> {
    let mut extra = ExtraNodes::default();
    if let Some(native) = &self.config.native {
      let node = match inputs.get(NATIVE) {
        Some(Artifact::Native { module, .. }) => ExtraNode::Ready(module.shim_source.clone()),
        Some(_) => {
          return Err(BuildError::MissingArtifact {
            stage: stage.id.clone(),
            dependency: NATIVE.to_string(),
            expected: ArtifactKind::Native,
          });
        }
        None => ExtraNode::Pending,
      };
      let shim = native.shim_path();
      extra.insert(&shim, node);
      if let Some(alias) = &native.alias {
        extra.alias(alias.clone(), &shim);
      }
    }

    let builder = BundleGraphBuilder::new(self.config.root.clone());
    let entries = self.config.entries.clone();
    let chunks = tokio::task::spawn_blocking(move || builder.build(&entries, &extra))
      .await
      .map_err(|e| BuildError::Task(e.to_string()))??;

    debug!(chunks = chunks.len(), "module graph rendered");
    Ok(Artifact::Chunks(chunks))
  }

  async fn run_minify(&self, stage: &StageDef, inputs: &ArtifactRegistry) -> Result<Artifact, BuildError> {
    let chunks = chunks_from(inputs, stage, BUNDLE)?;
    if !self.config.minify_enabled() {
      debug!(mode = %self.config.mode, "minification disabled");
      return Ok(Artifact::Chunks(chunks));
    }

    let minifier = self.minifier.clone();
    let minified = tokio::task::spawn_blocking(move || {
      chunks
        .iter()
        .map(|chunk| minifier.minify(chunk))
        .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| BuildError::Task(e.to_string()))??;
    Ok(Artifact::Chunks(minified))
  }

  async fn run_emit(&self, stage: &StageDef, inputs: &ArtifactRegistry) -> Result<Artifact, BuildError> {
    let chunks = chunks_from(inputs, stage, MINIFY)?;
    let mut written = Vec::with_capacity(chunks.len());

    for chunk in chunks {
      let path = self.config.out_dir.join(self.config.chunk_file_name(&chunk.name));
      if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|source| BuildError::Io {
          path: parent.to_path_buf(),
          source,
        })?;
      }
      tokio::fs::write(&path, chunk.code.as_bytes())
        .await
        .map_err(|source| BuildError::Io {
          path: path.clone(),
          source,
        })?;
      debug!(chunk = %chunk.name, path = %path.display(), bytes = chunk.code.len(), "chunk written");
      written.push(path);
    }

    written.sort();
    Ok(Artifact::Files(written))
  }
}

#[async_trait]
impl StageRunner for PipelineRunner {
  async fn run(&self, stage: &StageDef, inputs: Arc<ArtifactRegistry>) -> Result<Artifact, BuildError> {
    match stage.id.as_str() {
      ASSETS => self.run_assets().await,
      NATIVE => self.run_native().await,
      BUNDLE => self.run_bundle(stage, &inputs).await,
      MINIFY => self.run_minify(stage, &inputs).await,
      EMIT => self.run_emit(stage, &inputs).await,
      other => Err(BuildError::UnknownStage(other.to_string())),
    }
  }
}

fn chunks_from(inputs: &ArtifactRegistry, stage: &StageDef, dependency: &str) -> Result<Vec<Chunk>, BuildError> {
  match inputs.get(dependency) {
    Some(Artifact::Chunks(chunks)) => Ok(chunks.clone()),
    _ => Err(BuildError::MissingArtifact {
      stage: stage.id.clone(),
      dependency: dependency.to_string(),
      expected: ArtifactKind::Chunks,
    }),
  }
}

/// Relative `/`-separated paths of `dirs` that lie inside `crate_dir`. The
/// generated shim directory and a nested output directory change on every
/// build and must not feed the fingerprint.
fn fingerprint_exclusions(crate_dir: &Path, dirs: &[&PathBuf]) -> Vec<String> {
  let base = canonical_or_normalized(crate_dir);
  dirs
    .iter()
    .map(|dir| canonical_or_normalized(dir))
    .filter(|dir| dir != &base && is_within(dir, &base))
    .map(|dir| to_slash(&relative_to(&dir, &base)))
    .collect()
}
