//! Implementation of the `wasmpipe build` command.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use wasmpipe_lib::config::{BuildConfig, ConfigOverrides, Mode, load_config};
use wasmpipe_lib::consts::CONFIG_FILENAME;
use wasmpipe_lib::execute::{BuildReport, BuildResult, SkippedStage, StageTiming};
use wasmpipe_lib::orchestrator::BuildOrchestrator;

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_error, print_file, print_info, print_json, print_success,
  print_warning,
};
use crate::watch;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
  Production,
  Development,
}

impl From<ModeArg> for Mode {
  fn from(mode: ModeArg) -> Self {
    match mode {
      ModeArg::Production => Mode::Production,
      ModeArg::Development => Mode::Development,
    }
  }
}

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Path to the config file
  #[arg(short, long, default_value = CONFIG_FILENAME)]
  pub config: PathBuf,

  /// Build mode (overrides the config file)
  #[arg(short, long, value_enum)]
  pub mode: Option<ModeArg>,

  /// Rebuild whenever an input changes
  #[arg(short, long)]
  pub watch: bool,

  /// Quiet period before a watch rebuild starts (e.g. "200ms", "1s")
  #[arg(long, default_value = "200ms", value_parser = humantime::parse_duration)]
  pub debounce: Duration,

  /// Output format
  #[arg(short, long, value_enum, default_value_t)]
  pub output: OutputFormat,
}

impl BuildArgs {
  pub fn overrides(&self) -> ConfigOverrides {
    ConfigOverrides {
      mode: self.mode.map(Mode::from),
    }
  }
}

#[derive(Serialize)]
struct FailureSummary {
  stage: String,
  error: String,
}

#[derive(Serialize)]
struct BuildSummary {
  success: bool,
  mode: Mode,
  out_dir: PathBuf,
  files: Vec<PathBuf>,
  failures: Vec<FailureSummary>,
  skipped: Vec<SkippedStage>,
  timings: Vec<StageTiming>,
  cache_hit: Option<bool>,
  elapsed_ms: u64,
}

/// Execute the build command.
///
/// Returns a failing exit code when any stage failed; every collected error
/// is printed to stderr.
pub fn cmd_build(args: BuildArgs) -> Result<ExitCode> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let orchestrator = BuildOrchestrator::with_defaults();

  if args.watch {
    rt.block_on(watch::watch(&orchestrator, &args))?;
    return Ok(ExitCode::SUCCESS);
  }

  let config = load(&args.config, &args.overrides())?;
  let success = rt.block_on(build_once(&orchestrator, &config, args.output))?;
  Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

pub fn load(path: &Path, overrides: &ConfigOverrides) -> Result<BuildConfig> {
  load_config(path, overrides).with_context(|| format!("Failed to load config {}", path.display()))
}

/// Run one build and print its report. Returns whether it succeeded.
pub async fn build_once(orchestrator: &BuildOrchestrator, config: &BuildConfig, format: OutputFormat) -> Result<bool> {
  let start = Instant::now();
  if !format.is_json() {
    print_info(&format!("Building {} ({})", config.root.display(), config.mode));
  }

  let report = orchestrator.run_report(config).await;
  print_report(config, &report, start.elapsed(), format)?;
  Ok(report.is_success())
}

fn print_report(config: &BuildConfig, report: &BuildReport, elapsed: Duration, format: OutputFormat) -> Result<()> {
  for failure in report.result.failures() {
    print_error(&failure.to_string());
  }
  for skipped in &report.skipped {
    print_warning(&format!(
      "[{}] skipped because `{}` failed",
      skipped.stage, skipped.failed_dependency
    ));
  }

  if format.is_json() {
    return print_json(&summary(config, report, elapsed));
  }

  match &report.result {
    BuildResult::Success(files) => {
      print_success(&format!("Built {} file(s) in {}", files.len(), format_duration(elapsed)));
      for file in files {
        let size = std::fs::metadata(file).map(|m| format_bytes(m.len())).unwrap_or_default();
        let shown = file.strip_prefix(&config.root).unwrap_or(file);
        print_file(&shown.display().to_string(), &size);
      }
      match report.cache_hit {
        Some(true) => print_info("Native module served from cache"),
        Some(false) => print_info("Native module compiled"),
        None => {}
      }
    }
    BuildResult::Failure(failures) => {
      print_error(&format!(
        "Build failed with {} error(s) after {}",
        failures.len(),
        format_duration(elapsed)
      ));
    }
  }
  Ok(())
}

fn summary(config: &BuildConfig, report: &BuildReport, elapsed: Duration) -> BuildSummary {
  let files = match &report.result {
    BuildResult::Success(files) => files.clone(),
    BuildResult::Failure(_) => Vec::new(),
  };
  BuildSummary {
    success: report.is_success(),
    mode: config.mode,
    out_dir: config.out_dir.clone(),
    files,
    failures: report
      .result
      .failures()
      .iter()
      .map(|f| FailureSummary {
        stage: f.stage.clone(),
        error: f.error.to_string(),
      })
      .collect(),
    skipped: report.skipped.clone(),
    timings: report.timings.clone(),
    cache_hit: report.cache_hit,
    elapsed_ms: elapsed.as_millis() as u64,
  }
}
