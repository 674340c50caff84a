//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Minimal project: one asset directory, one entry, no native module.
pub const WEB_ONLY_CONFIG: &str = r#"
out_dir = "dist"
assets = ["static"]
entry = "js/index.js"
"#;

/// Isolated project directory. The cache root and helper tools live outside
/// the project so they never feed a native fingerprint.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
  pub outside: TempDir,
}

impl TestEnv {
  /// Create a project from config text, with the default entry and asset
  /// files in place.
  pub fn with_config(config: &str) -> Self {
    let env = Self::empty();
    env.write_file("wasmpipe.toml", config);
    env.write_file("static/index.html", "<script type=\"module\" src=\"index.js\"></script>\n");
    env.write_file(
      "js/index.js",
      "import { label } from \"./label.js\";\nconst count = label.length;\nconsole.log(label, count);\n",
    );
    env.write_file("js/label.js", "export const label = \"world\";\n");
    env
  }

  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("wasmpipe.toml");
    Self {
      temp,
      config_path,
      outside: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap_or_else(|_| self.temp.path().to_path_buf())
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  pub fn cache_path(&self) -> PathBuf {
    self.outside.path().join("cache")
  }

  /// Directory for helper programs such as the fake toolchain.
  pub fn tools_dir(&self) -> &Path {
    self.outside.path()
  }

  /// `wasmpipe` with the cache redirected to this test's cache root.
  pub fn cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("wasmpipe");
    cmd.current_dir(self.temp.path());
    cmd.env("WASMPIPE_CACHE_DIR", self.cache_path());
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `wasmpipe build --config <project config>`.
  pub fn build_cmd(&self) -> Command {
    let mut cmd = self.cmd();
    cmd.arg("build").arg("--config").arg(&self.config_path);
    cmd
  }
}

/// Install an executable shell script standing in for `wasm-pack`. It writes
/// `<name>_bg.wasm` (derived from `src/lib.rs`) and a web shim to the
/// requested output directory, and appends one line to `invocations.log`.
#[cfg(unix)]
pub fn fake_wasm_pack(dir: &Path) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join("fake-wasm-pack");
  let log = dir.join("invocations.log");
  let script = format!(
    r#"#!/bin/sh
crate="$2"; out=""; name=""
while [ $# -gt 0 ]; do
  case "$1" in
    --out-dir) out="$2"; shift ;;
    --out-name) name="$2"; shift ;;
  esac
  shift
done
echo "$name" >> "{log}"
cat "$crate/src/lib.rs" > "$out/${{name}}_bg.wasm"
cat > "$out/$name.js" <<'EOF'
let wasm;
export function greet(name) {{
  return "hello " + name;
}}
export default async function init(input) {{
  if (input === undefined) {{
    input = new URL("index_bg.wasm", import.meta.url);
  }}
  wasm = input;
  return wasm;
}}
EOF
"#,
    log = log.display()
  );
  std::fs::write(&path, script).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// Number of times the fake toolchain in `dir` ran.
pub fn invocations(dir: &Path) -> usize {
  std::fs::read_to_string(dir.join("invocations.log"))
    .map(|log| log.lines().count())
    .unwrap_or(0)
}
