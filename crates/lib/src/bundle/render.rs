//! Chunk rendering.
//!
//! A chunk is one IIFE holding a tiny module registry. Every module becomes a
//! factory that receives its exports object; export getters are installed
//! before the body runs so circular importers see hoisted functions. Imports
//! hold on to the exports object, never to a copied value.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::scan::{Hoisted, IMPORT_META_BINDING, ModuleScan, apply_edits, js_string};

const RUNTIME: &str = r#"  var __modules = {};
  var __cache = {};
  function __define(id, factory) {
    __modules[id] = factory;
  }
  function __require(id) {
    if (Object.prototype.hasOwnProperty.call(__cache, id)) return __cache[id];
    var exports = (__cache[id] = {});
    __modules[id](exports);
    return exports;
  }
  function __export(exports, getters) {
    for (var name in getters) {
      Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
    }
  }
  function __reexport(exports, source) {
    Object.keys(source).forEach(function (name) {
      if (name === "default" || Object.prototype.hasOwnProperty.call(exports, name)) return;
      Object.defineProperty(exports, name, {
        enumerable: true,
        get: function () {
          return source[name];
        },
      });
    });
  }
"#;

/// What the renderer needs to know about one module.
pub(crate) struct RenderModule<'a> {
  pub id: &'a str,
  pub source: &'a str,
  pub scan: &'a ModuleScan,
  /// Specifier -> module id of the resolved dependency.
  pub resolved: &'a BTreeMap<String, String>,
}

/// Render modules (already in dependency order) into one chunk that evaluates
/// `entry_id` when loaded.
pub(crate) fn render_chunk(modules: &[RenderModule<'_>], entry_id: &str) -> String {
  let mut out = String::new();
  out.push_str("(function () {\n");
  out.push_str(RUNTIME);
  let _ = writeln!(
    out,
    "  var {IMPORT_META_BINDING} = {{ url: typeof document !== \"undefined\" && document.currentScript ? \
     document.currentScript.src : typeof location !== \"undefined\" ? location.href : \"\" }};"
  );

  for module in modules {
    render_module(&mut out, module);
  }

  let _ = writeln!(out, "  __require({});", js_string(entry_id));
  out.push_str("})();\n");
  out
}

fn render_module(out: &mut String, module: &RenderModule<'_>) {
  let _ = writeln!(out, "  __define({}, function (exports) {{", js_string(module.id));
  out.push_str("\"use strict\";\n");

  if !module.scan.exports.is_empty() {
    out.push_str("__export(exports, {\n");
    for export in &module.scan.exports {
      let _ = writeln!(
        out,
        "  {}: function () {{ return {}; }},",
        js_string(&export.exported),
        export.expression
      );
    }
    out.push_str("});\n");
  }

  for hoisted in &module.scan.hoisted {
    let target = module
      .resolved
      .get(hoisted.specifier())
      .map(String::as_str)
      .unwrap_or(hoisted.specifier());
    let require = format!("__require({})", js_string(target));
    match hoisted {
      Hoisted::Bind { local, .. } => {
        let _ = writeln!(out, "var {local} = {require};");
      }
      Hoisted::Evaluate { .. } => {
        let _ = writeln!(out, "{require};");
      }
      Hoisted::ReexportAll { .. } => {
        let _ = writeln!(out, "__reexport(exports, {require});");
      }
    }
  }

  out.push_str(&apply_edits(module.source, &module.scan.edits));
  if !out.ends_with('\n') {
    out.push('\n');
  }
  out.push_str("  });\n");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bundle::scan::scan;
  use oxc_allocator::Allocator;
  use oxc_parser::Parser;
  use oxc_span::SourceType;
  use std::path::Path;

  fn parses_as_script(code: &str) -> bool {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::default().with_module(false)).parse();
    !ret.panicked && ret.errors.is_empty()
  }

  #[test]
  fn renders_a_script_with_registry() {
    let dep_source = "export function add(a, b) { return a + b; }\nexport default add;\n";
    let entry_source = "import sum, { add } from \"./math.js\";\nconsole.log(add(1, 2), sum === add, import.meta.url);\n";
    let dep_scan = scan(Path::new("/p/js/math.js"), dep_source).unwrap();
    let entry_scan = scan(Path::new("/p/js/index.js"), entry_source).unwrap();
    let no_deps = BTreeMap::new();
    let entry_deps = BTreeMap::from([("./math.js".to_string(), "js/math.js".to_string())]);

    let code = render_chunk(
      &[
        RenderModule {
          id: "js/math.js",
          source: dep_source,
          scan: &dep_scan,
          resolved: &no_deps,
        },
        RenderModule {
          id: "js/index.js",
          source: entry_source,
          scan: &entry_scan,
          resolved: &entry_deps,
        },
      ],
      "js/index.js",
    );

    assert!(parses_as_script(&code), "{code}");
    assert!(code.contains("__define(\"js/math.js\""));
    assert!(code.contains("var __import0 = __require(\"js/math.js\");"));
    assert!(code.contains("(0, __import0[\"add\"])(1, 2), __import0[\"default\"] === __import0[\"add\"]"));
    assert!(code.contains("\"default\": function () { return __default; }"));
    assert!(code.trim_end().ends_with("__require(\"js/index.js\");\n})();"));
    assert!(!code.contains("import.meta"));
    assert!(!code.contains("import "));

    let math_at = code.find("__define(\"js/math.js\"").unwrap();
    let index_at = code.find("__define(\"js/index.js\"").unwrap();
    assert!(math_at < index_at);
  }
}
