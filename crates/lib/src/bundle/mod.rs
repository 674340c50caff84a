//! Module graph construction and chunk rendering.
//!
//! Each entry point is walked depth-first; dependencies are visited in source
//! import order and emitted in post-order, so a chunk lists every module after
//! the modules it imports. Cycles are allowed: a module already on the walk is
//! not revisited.
//!
//! The interop shim produced by the native stage does not live on disk where
//! imports address it. It is handed in as an [`ExtraNode`] and consulted
//! before the filesystem.

mod render;
mod resolve;
mod scan;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::util::fs::{normalize, relative_to, to_slash};

use render::RenderModule;
use scan::ModuleScan;

/// Rendered output for one entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
  /// Entry name the chunk was built from.
  pub name: String,
  /// Module ids in emission order (dependencies first).
  pub modules: Vec<String>,
  pub code: String,
}

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("cannot resolve `{specifier}` imported from {}", importer.display())]
  MissingModule { specifier: String, importer: PathBuf },

  #[error("entry `{name}` does not exist: {}", path.display())]
  MissingEntry { name: String, path: PathBuf },

  #[error(
    "`{specifier}` imported from {} refers to {}, which has not been produced yet",
    importer.display(),
    path.display()
  )]
  PrematureReference {
    specifier: String,
    importer: PathBuf,
    path: PathBuf,
  },

  #[error("failed to parse {}: {message}", module.display())]
  Parse { module: PathBuf, message: String },

  #[error("failed to read module {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A module that exists only in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraNode {
  /// Declared by an upstream stage that has not produced it yet.
  Pending,
  /// Source text available.
  Ready(String),
}

/// Pre-resolved nodes keyed by the absolute path imports address them by,
/// plus bare-specifier aliases pointing at paths.
#[derive(Debug, Clone, Default)]
pub struct ExtraNodes {
  pub nodes: BTreeMap<PathBuf, ExtraNode>,
  pub aliases: BTreeMap<String, PathBuf>,
}

impl ExtraNodes {
  pub fn insert(&mut self, path: impl AsRef<Path>, node: ExtraNode) {
    self.nodes.insert(normalize(path.as_ref()), node);
  }

  pub fn alias(&mut self, specifier: impl Into<String>, path: impl AsRef<Path>) {
    self.aliases.insert(specifier.into(), normalize(path.as_ref()));
  }
}

struct ModuleRecord {
  id: String,
  source: String,
  scan: ModuleScan,
  /// Specifier -> module id.
  resolved: BTreeMap<String, String>,
  /// Resolved dependency paths in source order, without duplicates.
  dependencies: Vec<PathBuf>,
}

/// Builds chunks from entry points. Module ids are paths relative to `root`.
#[derive(Debug, Clone)]
pub struct BundleGraphBuilder {
  root: PathBuf,
}

impl BundleGraphBuilder {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: normalize(&root.into()),
    }
  }

  /// Build one chunk per entry, ordered by entry name.
  pub fn build(&self, entries: &BTreeMap<String, PathBuf>, extra: &ExtraNodes) -> Result<Vec<Chunk>, GraphError> {
    let mut records: HashMap<PathBuf, ModuleRecord> = HashMap::new();
    let mut chunks = Vec::with_capacity(entries.len());

    for (name, entry) in entries {
      let entry = normalize(entry);
      let available = match extra.nodes.get(&entry) {
        Some(ExtraNode::Ready(_)) => true,
        Some(ExtraNode::Pending) => false,
        None => entry.is_file(),
      };
      if !available {
        return Err(GraphError::MissingEntry {
          name: name.clone(),
          path: entry,
        });
      }

      let mut visited = HashSet::new();
      let mut order = Vec::new();
      self.visit(&entry, extra, &mut records, &mut visited, &mut order)?;

      let modules: Vec<RenderModule<'_>> = order
        .iter()
        .filter_map(|path| records.get(path))
        .map(|record| RenderModule {
          id: &record.id,
          source: &record.source,
          scan: &record.scan,
          resolved: &record.resolved,
        })
        .collect();
      let entry_id = self.module_id(&entry);
      let code = render::render_chunk(&modules, &entry_id);
      let ids: Vec<String> = modules.iter().map(|m| m.id.to_string()).collect();

      info!(entry = %name, modules = ids.len(), bytes = code.len(), "rendered chunk");
      chunks.push(Chunk {
        name: name.clone(),
        modules: ids,
        code,
      });
    }

    Ok(chunks)
  }

  fn visit(
    &self,
    path: &Path,
    extra: &ExtraNodes,
    records: &mut HashMap<PathBuf, ModuleRecord>,
    visited: &mut HashSet<PathBuf>,
    order: &mut Vec<PathBuf>,
  ) -> Result<(), GraphError> {
    if !visited.insert(path.to_path_buf()) {
      return Ok(());
    }

    if !records.contains_key(path) {
      let record = self.load(path, extra)?;
      records.insert(path.to_path_buf(), record);
    }

    let dependencies = records
      .get(path)
      .map(|r| r.dependencies.clone())
      .unwrap_or_default();
    for dependency in &dependencies {
      self.visit(dependency, extra, records, visited, order)?;
    }

    order.push(path.to_path_buf());
    Ok(())
  }

  fn load(&self, path: &Path, extra: &ExtraNodes) -> Result<ModuleRecord, GraphError> {
    let source = match extra.nodes.get(path) {
      Some(ExtraNode::Ready(source)) => source.clone(),
      // imports of pending nodes fail during resolution, entries in `build`
      Some(ExtraNode::Pending) => {
        return Err(GraphError::Io {
          path: path.to_path_buf(),
          source: std::io::ErrorKind::NotFound.into(),
        });
      }
      None => std::fs::read_to_string(path).map_err(|source| GraphError::Io {
        path: path.to_path_buf(),
        source,
      })?,
    };

    let scan = scan::scan(path, &source)?;

    let mut resolved = BTreeMap::new();
    let mut dependencies = Vec::new();
    for specifier in &scan.specifiers {
      let target = resolve::resolve(specifier, path, extra)?;
      resolved.insert(specifier.clone(), self.module_id(&target));
      if !dependencies.contains(&target) {
        dependencies.push(target);
      }
    }

    let id = self.module_id(path);
    debug!(module = %id, dependencies = dependencies.len(), "scanned module");

    Ok(ModuleRecord {
      id,
      source,
      scan,
      resolved,
      dependencies,
    })
  }

  fn module_id(&self, path: &Path) -> String {
    to_slash(&relative_to(path, &self.root))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::run_modules_and_chunk;
  use std::fs;
  use tempfile::TempDir;

  fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
  }

  fn entries(pairs: &[(&str, PathBuf)]) -> BTreeMap<String, PathBuf> {
    pairs.iter().map(|(n, p)| (n.to_string(), p.clone())).collect()
  }

  /// Bundle `entry` and run it next to the unbundled modules; both must print
  /// `expected`.
  fn assert_runs_like_modules(root: &Path, entry: PathBuf, expected: &str) {
    let chunks = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", entry.clone())]), &ExtraNodes::default())
      .unwrap();
    let Some((modules, bundled)) = run_modules_and_chunk(root, &entry, &chunks[0].code) else {
      return;
    };
    assert_eq!(modules, expected);
    assert_eq!(bundled, modules, "chunk:\n{}", chunks[0].code);
  }

  #[test]
  fn post_order_follows_import_order() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(
      root,
      "js/index.js",
      "import { b } from \"./b.js\";\nimport { a } from \"./a\";\nconsole.log(a, b);\n",
    );
    write(root, "js/a.js", "import { c } from \"./c.js\";\nexport const a = c + 1;\n");
    write(root, "js/b.js", "import { c } from \"./c.js\";\nexport const b = c + 2;\n");
    write(root, "js/c.js", "export const c = 1;\n");

    let chunks = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &ExtraNodes::default())
      .unwrap();

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].name, "index");
    assert_eq!(chunks[0].modules, vec!["js/c.js", "js/b.js", "js/a.js", "js/index.js"]);
  }

  #[test]
  fn circular_imports_are_allowed() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(root, "index.js", "import { even } from \"./even.js\";\nconsole.log(even(4));\n");
    write(
      root,
      "even.js",
      "import { odd } from \"./odd.js\";\nexport function even(n) { return n === 0 || odd(n - 1); }\n",
    );
    write(
      root,
      "odd.js",
      "import { even } from \"./even.js\";\nexport function odd(n) { return n !== 0 && even(n - 1); }\n",
    );

    let chunks = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &ExtraNodes::default())
      .unwrap();
    assert_eq!(chunks[0].modules, vec!["odd.js", "even.js", "index.js"]);
    assert_runs_like_modules(root, root.join("index.js"), "true\n");
  }

  #[test]
  fn cycle_reads_bindings_only_when_used() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let entry = write(
      root,
      "a.js",
      "import { b } from \"./b.js\";\nexport const a = 1;\nconsole.log(b());\n",
    );
    write(root, "b.js", "import { a } from \"./a.js\";\nexport function b() { return a; }\n");

    assert_runs_like_modules(root, entry, "1\n");
  }

  #[test]
  fn importers_observe_reassigned_exports() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "counter.js", "export let count = 0;\nexport function inc() { count++; }\n");
    let entry = write(
      root,
      "index.js",
      "import { count, inc } from \"./counter.js\";\nconsole.log(count);\ninc();\ninc();\nconsole.log(count);\n",
    );

    assert_runs_like_modules(root, entry, "0\n2\n");
  }

  #[test]
  fn mixed_import_and_export_forms_run_like_modules() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
      root,
      "lib/math.js",
      "export let calls = 0;\nexport default function add(a, b) { calls++; return a + b; }\nexport function self() { return this === undefined; }\n",
    );
    write(root, "lib/index.js", "export * from \"./math.js\";\nexport { default as add } from \"./math.js\";\n");
    write(root, "lib/tags.js", "export const tag = (parts, x) => parts[0] + x;\n");
    write(root, "forward.js", "import { calls } from \"./lib/math.js\";\nexport { calls as total };\n");
    let entry = write(
      root,
      "index.js",
      r#"import sum, { self } from "./lib/math.js";
import * as lib from "./lib/index.js";
import { total } from "./forward.js";
import { tag } from "./lib/tags.js";
const result = { sum: sum(1, 2), viaNamespace: lib.add(3, 4), self: self() };
console.log(JSON.stringify({ result, total }));
console.log(tag`n=${lib.calls}`);
"#,
    );

    assert_runs_like_modules(
      root,
      entry,
      "{\"result\":{\"sum\":3,\"viaNamespace\":7,\"self\":true},\"total\":2}\nn=2\n",
    );
  }

  #[test]
  fn chunks_are_ordered_by_entry_name_and_deterministic() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let zeta = write(root, "zeta.js", "import \"./shared.js\";\n");
    let alpha = write(root, "alpha.js", "import \"./shared.js\";\n");
    write(root, "shared.js", "globalThis.shared = true;\n");

    let builder = BundleGraphBuilder::new(root);
    let all = entries(&[("zeta", zeta), ("alpha", alpha)]);
    let first = builder.build(&all, &ExtraNodes::default()).unwrap();
    let second = builder.build(&all, &ExtraNodes::default()).unwrap();

    assert_eq!(first.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["alpha", "zeta"]);
    assert_eq!(first, second);
  }

  #[test]
  fn shim_is_served_from_extra_nodes() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(
      root,
      "js/index.js",
      "import init, { greet } from \"../pkg/hello.js\";\ninit().then(() => greet(\"web\"));\n",
    );
    let shim = root.join("pkg/hello.js");

    let mut extra = ExtraNodes::default();
    extra.insert(
      &shim,
      ExtraNode::Ready(
        "export function greet(n) { return n; }\nexport default async function init() { return new URL(\"hello_bg.wasm\", import.meta.url); }\n"
          .to_string(),
      ),
    );

    let chunks = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &extra)
      .unwrap();
    assert_eq!(chunks[0].modules, vec!["pkg/hello.js", "js/index.js"]);
    assert!(chunks[0].code.contains("__importMeta.url"));
  }

  #[test]
  fn shim_alias_resolves_bare_specifier() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(root, "index.js", "import * as wasm from \"hello-wasm\";\nwasm.greet();\n");
    let shim = root.join("crate/pkg/hello.js");

    let mut extra = ExtraNodes::default();
    extra.insert(&shim, ExtraNode::Ready("export function greet() {}\n".to_string()));
    extra.alias("hello-wasm", &shim);

    let chunks = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &extra)
      .unwrap();
    assert!(chunks[0].code.contains("var wasm = __require(\"crate/pkg/hello.js\");"));
  }

  #[test]
  fn pending_shim_is_a_premature_reference() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(root, "index.js", "import init from \"./pkg/hello.js\";\ninit();\n");

    let mut extra = ExtraNodes::default();
    extra.insert(root.join("pkg/hello.js"), ExtraNode::Pending);

    let err = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &extra)
      .unwrap_err();
    assert!(matches!(err, GraphError::PrematureReference { .. }));
  }

  #[test]
  fn pending_entry_is_a_missing_entry() {
    let temp = TempDir::new().unwrap();
    let shim = temp.path().join("pkg/hello.js");
    write(temp.path(), "pkg/hello.js", "export const stale = true;\n");

    let mut extra = ExtraNodes::default();
    extra.insert(&shim, ExtraNode::Pending);

    let err = BundleGraphBuilder::new(temp.path())
      .build(&entries(&[("shim", shim.clone())]), &extra)
      .unwrap_err();
    assert!(matches!(err, GraphError::MissingEntry { name, path } if name == "shim" && path == normalize(&shim)));
  }

  #[test]
  fn missing_and_bare_imports_fail() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(root, "index.js", "import React from \"react\";\n");

    let err = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &ExtraNodes::default())
      .unwrap_err();
    assert!(matches!(err, GraphError::MissingModule { specifier, .. } if specifier == "react"));
  }

  #[test]
  fn missing_entry_fails() {
    let temp = TempDir::new().unwrap();
    let err = BundleGraphBuilder::new(temp.path())
      .build(&entries(&[("index", temp.path().join("index.js"))]), &ExtraNodes::default())
      .unwrap_err();
    assert!(matches!(err, GraphError::MissingEntry { .. }));
  }

  #[test]
  fn parse_errors_name_the_module() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let index = write(root, "index.js", "import \"./broken.js\";\n");
    let broken = write(root, "broken.js", "export const = ;\n");

    let err = BundleGraphBuilder::new(root)
      .build(&entries(&[("index", index)]), &ExtraNodes::default())
      .unwrap_err();
    assert!(matches!(err, GraphError::Parse { module, .. } if module == broken));
  }
}
