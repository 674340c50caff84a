//! Info command integration tests.

use predicates::prelude::*;

use super::common::{TestEnv, WEB_ONLY_CONFIG};

#[test]
fn info_shows_cache_override() {
  let env = TestEnv::with_config(WEB_ONLY_CONFIG);

  env
    .cmd()
    .arg("info")
    .assert()
    .success()
    .stdout(predicate::str::contains(env.cache_path().display().to_string()))
    .stdout(predicate::str::contains("Entries: index"));
}

#[test]
fn info_json_describes_resolved_config() {
  let env = TestEnv::with_config(WEB_ONLY_CONFIG);

  let output = env.cmd().args(["info", "--output", "json"]).output().unwrap();
  assert!(output.status.success());

  let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(info["config_found"], true);
  assert_eq!(info["mode"], "production");
  assert_eq!(info["entries"], serde_json::json!(["index"]));
  assert!(info["native_cache_dir"].as_str().unwrap().ends_with("native"));
}

#[test]
fn info_without_config_still_succeeds() {
  let env = TestEnv::empty();

  env
    .cmd()
    .arg("info")
    .assert()
    .success()
    .stdout(predicate::str::contains("(not found)"));
}
