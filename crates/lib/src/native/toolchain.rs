//! The external compiler seam.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{Mode, NativeConfig, Profile};
use crate::consts::{SOURCE_DATE_EPOCH, WASM_TARGET_TRIPLE};

use super::CompileError;

/// Everything besides the source tree that influences the compiled output.
/// Serialised into the fingerprint, so field changes invalidate the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileOptions {
  pub target: String,
  pub profile: Profile,
  pub out_name: String,
  pub shim_target: String,
  pub toolchain: String,
  pub extra_args: Vec<String>,
}

impl CompileOptions {
  pub fn new(native: &NativeConfig, mode: Mode) -> Self {
    Self {
      target: native.target.clone(),
      profile: mode.profile(),
      out_name: native.out_name.clone(),
      shim_target: native.shim_target.clone(),
      toolchain: native.toolchain.clone(),
      extra_args: native.extra_args.clone(),
    }
  }

  pub fn binary_file_name(&self) -> String {
    format!("{}_bg.wasm", self.out_name)
  }

  pub fn shim_file_name(&self) -> String {
    format!("{}.js", self.out_name)
  }
}

/// Raw toolchain output, before it is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainOutput {
  pub binary: Vec<u8>,
  pub shim_source: String,
}

/// Compiles a crate into a WebAssembly binary plus its JavaScript shim.
#[async_trait]
pub trait Toolchain: Send + Sync {
  /// Compile `crate_dir`, using `scratch` as the private output directory.
  async fn compile(
    &self,
    crate_dir: &Path,
    scratch: &Path,
    options: &CompileOptions,
  ) -> Result<ToolchainOutput, CompileError>;
}

/// Runs `wasm-pack build`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmPackToolchain;

impl WasmPackToolchain {
  fn args(crate_dir: &Path, scratch: &Path, options: &CompileOptions) -> Vec<String> {
    let mut args = vec![
      "build".to_string(),
      crate_dir.display().to_string(),
      "--target".to_string(),
      options.shim_target.clone(),
      "--out-dir".to_string(),
      scratch.display().to_string(),
      "--out-name".to_string(),
      options.out_name.clone(),
      options.profile.flag().to_string(),
    ];
    args.extend(options.extra_args.iter().cloned());
    args
  }
}

#[async_trait]
impl Toolchain for WasmPackToolchain {
  async fn compile(
    &self,
    crate_dir: &Path,
    scratch: &Path,
    options: &CompileOptions,
  ) -> Result<ToolchainOutput, CompileError> {
    if options.target != WASM_TARGET_TRIPLE {
      return Err(CompileError::UnsupportedTarget {
        target: options.target.clone(),
      });
    }

    let args = Self::args(crate_dir, scratch, options);
    info!(program = %options.toolchain, crate_dir = %crate_dir.display(), profile = ?options.profile, "compiling native module");
    debug!(args = ?args, "spawning toolchain");

    let output = Command::new(&options.toolchain)
      .args(&args)
      .current_dir(crate_dir)
      // fixed timestamps for reproducible output
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|source| CompileError::Spawn {
        program: options.toolchain.clone(),
        source,
      })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
      debug!(stdout = %stdout.trim(), "toolchain stdout");
    }

    if !output.status.success() {
      return Err(CompileError::ToolchainFailed {
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
      });
    }

    let binary_path = scratch.join(options.binary_file_name());
    let binary = tokio::fs::read(&binary_path)
      .await
      .map_err(|_| CompileError::MissingOutput { path: binary_path })?;

    let shim_path = scratch.join(options.shim_file_name());
    let shim_source = tokio::fs::read_to_string(&shim_path)
      .await
      .map_err(|_| CompileError::MissingOutput { path: shim_path })?;

    Ok(ToolchainOutput { binary, shim_source })
  }
}
