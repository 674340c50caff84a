//! Build command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, WEB_ONLY_CONFIG};

#[test]
fn build_web_only_project() {
  let env = TestEnv::with_config(WEB_ONLY_CONFIG);

  env
    .build_cmd()
    .assert()
    .success()
    .stdout(predicate::str::contains("Built 2 file(s)"));

  assert!(env.path("dist/index.html").exists());
  let chunk = std::fs::read_to_string(env.path("dist/index.js")).unwrap();
  assert!(chunk.contains("world"));
  assert!(!chunk.contains("count"));
}

#[test]
fn development_mode_flag_keeps_source_readable() {
  let env = TestEnv::with_config(WEB_ONLY_CONFIG);

  env.build_cmd().args(["--mode", "development"]).assert().success();

  let chunk = std::fs::read_to_string(env.path("dist/index.js")).unwrap();
  assert!(chunk.contains("const count = __import0[\"label\"].length;"));
}

#[test]
fn json_output_reports_files_and_timings() {
  let env = TestEnv::with_config(WEB_ONLY_CONFIG);

  let output = env.build_cmd().args(["--output", "json"]).output().unwrap();
  assert!(output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["success"], true);
  assert_eq!(report["mode"], "production");
  assert_eq!(report["files"].as_array().unwrap().len(), 2);
  assert_eq!(report["timings"].as_array().unwrap().len(), 4);
  assert!(report["cache_hit"].is_null());
}

#[test]
fn missing_entry_module_fails() {
  let env = TestEnv::with_config(WEB_ONLY_CONFIG);
  env.write_file("js/index.js", "import { nope } from \"./missing.js\";\n");

  env
    .build_cmd()
    .assert()
    .failure()
    .stderr(predicate::str::contains("[bundle]"))
    .stderr(predicate::str::contains("./missing.js"))
    .stderr(predicate::str::contains("[minify] skipped"));
}

#[test]
fn every_failure_is_printed() {
  let env = TestEnv::with_config(
    r#"
out_dir = "dist"
assets = ["static", "missing-assets"]
entry = "js/index.js"

[native]
crate_dir = "."
out_name = "index"
toolchain = "wasmpipe-test-no-such-toolchain"
"#,
  );
  env.write_file("src/lib.rs", "pub fn greet() {}\n");

  env
    .build_cmd()
    .assert()
    .failure()
    .stderr(predicate::str::contains("[assets]"))
    .stderr(predicate::str::contains("[native]"))
    .stderr(predicate::str::contains("Build failed with 2 error(s)"));
}

#[test]
fn output_aliasing_an_asset_directory_is_rejected() {
  let env = TestEnv::with_config(
    r#"
out_dir = "static"
assets = ["static"]
entry = "js/index.js"
"#,
  );

  env
    .build_cmd()
    .assert()
    .failure()
    .stderr(predicate::str::contains("[configure]"))
    .stderr(predicate::str::contains("aliases input"));
}

#[test]
fn missing_required_key_is_reported() {
  let env = TestEnv::with_config("entry = \"js/index.js\"\n");

  env
    .build_cmd()
    .assert()
    .failure()
    .stderr(predicate::str::contains("out_dir"));
}

#[test]
fn named_entries_follow_filename_template() {
  let env = TestEnv::with_config(
    r#"
out_dir = "dist"
filename = "[name].bundle.js"

[entry]
main = "js/index.js"
label = "js/label.js"
"#,
  );

  env.build_cmd().assert().success();
  assert!(env.path("dist/main.bundle.js").exists());
  assert!(env.path("dist/label.bundle.js").exists());
}

#[cfg(unix)]
mod native {
  use predicates::prelude::*;

  use super::super::common::{TestEnv, fake_wasm_pack, invocations};

  fn native_env() -> TestEnv {
    let env = TestEnv::empty();
    let toolchain = fake_wasm_pack(env.tools_dir());
    env.write_file(
      "wasmpipe.toml",
      &format!(
        r#"
out_dir = "dist"
assets = ["static"]
entry = "js/index.js"

[native]
crate_dir = "."
out_name = "index"
alias = "wasm"
toolchain = "{}"
"#,
        toolchain.display()
      ),
    );
    env.write_file("Cargo.toml", "[package]\nname = \"app\"\nversion = \"0.1.0\"\n");
    env.write_file("src/lib.rs", "pub fn greet() {}\n");
    env.write_file("static/index.html", "<script type=\"module\" src=\"index.js\"></script>\n");
    env.write_file(
      "js/index.js",
      "import init, { greet } from \"wasm\";\ninit().then(() => console.log(greet(\"world\")));\n",
    );
    env
  }

  #[test]
  fn native_module_is_compiled_and_cached() {
    let env = native_env();

    env
      .build_cmd()
      .assert()
      .success()
      .stdout(predicate::str::contains("Native module compiled"));
    assert_eq!(invocations(env.tools_dir()), 1);
    let first = std::fs::read(env.path("dist/index.js")).unwrap();
    assert_eq!(
      std::fs::read_to_string(env.path("dist/index_bg.wasm")).unwrap(),
      "pub fn greet() {}\n"
    );

    env
      .build_cmd()
      .assert()
      .success()
      .stdout(predicate::str::contains("Native module served from cache"));
    assert_eq!(invocations(env.tools_dir()), 1);
    assert_eq!(std::fs::read(env.path("dist/index.js")).unwrap(), first);
  }

  #[test]
  fn source_change_recompiles() {
    let env = native_env();

    env.build_cmd().assert().success();
    env.write_file("src/lib.rs", "pub fn greet() { /* v2 */ }\n");
    env.build_cmd().assert().success();

    assert_eq!(invocations(env.tools_dir()), 2);
  }

  #[test]
  fn shim_is_bundled_with_import_meta_rewritten() {
    let env = native_env();

    env.build_cmd().assert().success();

    let chunk = std::fs::read_to_string(env.path("dist/index.js")).unwrap();
    assert!(chunk.contains("hello "));
    assert!(!chunk.contains("import.meta"));
    assert!(!env.path("pkg/index.js").exists());
  }
}
