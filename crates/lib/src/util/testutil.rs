//! Test utilities for wasmpipe-lib.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::native::{CompileError, CompileOptions, Toolchain, ToolchainOutput};

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
  let path = root.join(rel);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(&path, contents).unwrap();
  path
}

/// Run `script` with node and return its stdout. Returns `None` when node is
/// not on PATH, so callers can skip.
pub fn run_node(script: &Path) -> Option<String> {
  let output = match Command::new("node").arg(script).output() {
    Ok(output) => output,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      eprintln!("skipping: node not found on PATH");
      return None;
    }
    Err(e) => panic!("failed to run node: {e}"),
  };
  assert!(
    output.status.success(),
    "node {} failed:\n{}",
    script.display(),
    String::from_utf8_lossy(&output.stderr)
  );
  Some(String::from_utf8(output.stdout).unwrap())
}

/// Run the unbundled program rooted at `entry` as ES modules and `chunk` as a
/// classic script, returning `(modules, chunk)` stdout. `root` must contain
/// every module the entry reaches.
pub fn run_modules_and_chunk(root: &Path, entry: &Path, chunk: &str) -> Option<(String, String)> {
  write_file(root, "package.json", "{ \"type\": \"module\" }\n");
  let script = write_file(root, "chunk.cjs", chunk);
  let modules = run_node(entry)?;
  let bundled = run_node(&script)?;
  Some((modules, bundled))
}

/// A shim in the shape `wasm-pack --target web` generates: a default `init`
/// export locating the binary relative to `import.meta.url`.
pub fn web_shim(out_name: &str) -> String {
  format!(
    r#"let wasm;
export function greet(name) {{
  return "hello " + name;
}}
async function __wbg_init(module_or_path) {{
  if (module_or_path === undefined) {{
    module_or_path = new URL("{out_name}_bg.wasm", import.meta.url);
  }}
  wasm = module_or_path;
  return wasm;
}}
export {{ __wbg_init as initSync }};
export default __wbg_init;
"#
  )
}

/// Toolchain double that counts invocations and produces deterministic output.
pub struct FakeToolchain {
  invocations: AtomicUsize,
  delay: Option<Duration>,
  failure: Option<(String, i32)>,
}

impl FakeToolchain {
  pub fn new() -> Self {
    Self {
      invocations: AtomicUsize::new(0),
      delay: None,
      failure: None,
    }
  }

  pub fn failing(stderr: &str, exit_code: i32) -> Self {
    Self {
      failure: Some((stderr.to_string(), exit_code)),
      ..Self::new()
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn invocations(&self) -> usize {
    self.invocations.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Toolchain for FakeToolchain {
  async fn compile(
    &self,
    crate_dir: &Path,
    _scratch: &Path,
    options: &CompileOptions,
  ) -> Result<ToolchainOutput, CompileError> {
    self.invocations.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    if let Some((stderr, exit_code)) = &self.failure {
      return Err(CompileError::ToolchainFailed {
        stderr: stderr.clone(),
        exit_code: Some(*exit_code),
      });
    }

    let source = std::fs::read(crate_dir.join("src/lib.rs")).unwrap_or_default();
    let mut binary = b"\0asm\x01\0\0\0".to_vec();
    binary.extend_from_slice(&source);

    Ok(ToolchainOutput {
      binary,
      shim_source: web_shim(&options.out_name),
    })
  }
}
