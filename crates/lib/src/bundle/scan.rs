//! Per-module analysis: which specifiers a module requests, what it exports
//! and which source spans have to be rewritten for the chunk runtime.
//!
//! Default and named imports are not copied into locals. Each import
//! declaration binds the dependency's exports object once, and every
//! reference to an imported name becomes a property read on that object, so
//! importers observe later assignments and circular importers only touch a
//! binding when the code using it runs.

use std::collections::HashMap;
use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
  BindingPattern, BindingPatternKind, CallExpression, Declaration, ExportDefaultDeclarationKind, Expression,
  ImportDeclarationSpecifier, MetaProperty, ModuleDeclaration, ModuleExportName, ObjectProperty,
  TaggedTemplateExpression,
};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::Parser;
use oxc_semantic::{SemanticBuilder, SymbolId};
use oxc_span::{GetSpan, SourceType, Span};

use super::GraphError;

/// Name the rewritten `import.meta` expressions refer to.
pub(crate) const IMPORT_META_BINDING: &str = "__importMeta";
const DEFAULT_BINDING: &str = "__default";

/// A dependency request hoisted to the top of the module factory, in source
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Hoisted {
  /// Bind `local` to the dependency's exports object.
  Bind { specifier: String, local: String },
  /// `import "x"`: evaluate for side effects only.
  Evaluate { specifier: String },
  /// `export * from "x"`
  ReexportAll { specifier: String },
}

impl Hoisted {
  pub(crate) fn specifier(&self) -> &str {
    match self {
      Hoisted::Bind { specifier, .. } | Hoisted::Evaluate { specifier } | Hoisted::ReexportAll { specifier } => {
        specifier
      }
    }
  }
}

/// Exported name and the expression producing its current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExportEntry {
  pub exported: String,
  pub expression: String,
}

/// Replace `source[start..end]` with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edit {
  pub start: u32,
  pub end: u32,
  pub replacement: String,
}

impl Edit {
  fn remove(span: Span) -> Self {
    Self::replace(span.start, span.end, "")
  }

  fn replace(start: u32, end: u32, replacement: impl Into<String>) -> Self {
    Self {
      start,
      end,
      replacement: replacement.into(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleScan {
  /// Unique specifiers in first-occurrence order.
  pub specifiers: Vec<String>,
  pub hoisted: Vec<Hoisted>,
  pub exports: Vec<ExportEntry>,
  pub edits: Vec<Edit>,
}

impl ModuleScan {
  fn request(&mut self, hoisted: Hoisted) {
    let specifier = hoisted.specifier();
    if !self.specifiers.iter().any(|s| s == specifier) {
      self.specifiers.push(specifier.to_string());
    }
    self.hoisted.push(hoisted);
  }

  fn export(&mut self, exported: impl Into<String>, expression: impl Into<String>) {
    self.exports.push(ExportEntry {
      exported: exported.into(),
      expression: expression.into(),
    });
  }
}

/// Parse `source` as an ES module and collect everything the renderer needs.
pub(crate) fn scan(path: &Path, source: &str) -> Result<ModuleScan, GraphError> {
  let allocator = Allocator::default();
  let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();

  if parsed.panicked || !parsed.errors.is_empty() {
    let message = parsed
      .errors
      .iter()
      .map(|e| e.to_string())
      .collect::<Vec<_>>()
      .join("; ");
    return Err(GraphError::Parse {
      module: path.to_path_buf(),
      message: if message.is_empty() {
        "parser aborted".to_string()
      } else {
        message
      },
    });
  }

  let program = parsed.program;
  let semantic = SemanticBuilder::new().build(&program).semantic;
  let mut scan = ModuleScan::default();
  let mut reexports = 0usize;
  let mut next_reexport_binding = || {
    let name = format!("__reexport{reexports}");
    reexports += 1;
    name
  };
  let mut imports = 0usize;
  // imported binding -> member expression reading it
  let mut imported: Vec<(Option<SymbolId>, String, String)> = Vec::new();

  for stmt in program.body.iter() {
    let Some(module_decl) = stmt.as_module_declaration() else {
      continue;
    };

    match module_decl {
      ModuleDeclaration::ImportDeclaration(import) => {
        if import.import_kind.is_type() {
          continue;
        }
        let specifier = import.source.value.to_string();
        scan.edits.push(Edit::remove(import.span));

        let Some(specs) = import.specifiers.as_ref().filter(|specs| !specs.is_empty()) else {
          scan.request(Hoisted::Evaluate { specifier });
          continue;
        };

        let mut binding: Option<String> = None;
        for spec in specs {
          let (local, name) = match spec {
            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
              scan.request(Hoisted::Bind {
                specifier: specifier.clone(),
                local: s.local.name.to_string(),
              });
              continue;
            }
            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => (&s.local, "default".to_string()),
            ImportDeclarationSpecifier::ImportSpecifier(s) => {
              if s.import_kind.is_type() {
                continue;
              }
              (&s.local, export_name(&s.imported))
            }
          };

          let binding = binding.get_or_insert_with(|| {
            let name = format!("__import{imports}");
            imports += 1;
            scan.request(Hoisted::Bind {
              specifier: specifier.clone(),
              local: name.clone(),
            });
            name
          });
          imported.push((local.symbol_id.get(), local.name.to_string(), member(binding, &name)));
        }
      }

      ModuleDeclaration::ExportNamedDeclaration(named) => {
        if named.export_kind.is_type() {
          continue;
        }

        if let Some(decl) = &named.declaration {
          // keep the declaration, drop the `export` keyword
          scan.edits.push(Edit::replace(named.span.start, decl.span().start, ""));
          for name in declared_names(decl) {
            scan.export(name.clone(), name);
          }
          continue;
        }

        scan.edits.push(Edit::remove(named.span));
        match &named.source {
          Some(source) => {
            let binding = next_reexport_binding();
            scan.request(Hoisted::Bind {
              specifier: source.value.to_string(),
              local: binding.clone(),
            });
            for spec in &named.specifiers {
              let imported = export_name(&spec.local);
              scan.export(export_name(&spec.exported), member(&binding, &imported));
            }
          }
          None => {
            for spec in &named.specifiers {
              scan.export(export_name(&spec.exported), export_name(&spec.local));
            }
          }
        }
      }

      ModuleDeclaration::ExportDefaultDeclaration(default) => {
        let decl_span = default.declaration.span();
        let named_local = match &default.declaration {
          ExportDefaultDeclarationKind::FunctionDeclaration(func) => Some(func.id.as_ref().map(|id| id.name.to_string())),
          ExportDefaultDeclarationKind::ClassDeclaration(class) => Some(class.id.as_ref().map(|id| id.name.to_string())),
          _ => None,
        };

        match named_local {
          // `export default function f() {}` keeps the hoisted declaration
          Some(Some(local)) => {
            scan.edits.push(Edit::replace(default.span.start, decl_span.start, ""));
            scan.export("default", local);
          }
          // anonymous function or class declaration becomes an expression
          Some(None) => {
            scan.edits.push(Edit::replace(
              default.span.start,
              decl_span.start,
              format!("var {DEFAULT_BINDING} = "),
            ));
            scan.edits.push(Edit::replace(decl_span.end, decl_span.end, ";"));
            scan.export("default", DEFAULT_BINDING);
          }
          None => {
            scan.edits.push(Edit::replace(
              default.span.start,
              decl_span.start,
              format!("var {DEFAULT_BINDING} = "),
            ));
            scan.export("default", DEFAULT_BINDING);
          }
        }
      }

      ModuleDeclaration::ExportAllDeclaration(all) => {
        if all.export_kind.is_type() {
          continue;
        }
        let specifier = all.source.value.to_string();
        scan.edits.push(Edit::remove(all.span));

        match &all.exported {
          Some(exported) => {
            let binding = next_reexport_binding();
            scan.request(Hoisted::Bind {
              specifier,
              local: binding.clone(),
            });
            scan.export(export_name(exported), binding);
          }
          None => scan.request(Hoisted::ReexportAll { specifier }),
        }
      }

      _ => {}
    }
  }

  let mut sites = SiteCollector::default();
  sites.visit_program(&program);
  for span in &sites.import_meta {
    scan.edits.push(Edit::replace(span.start, span.end, IMPORT_META_BINDING));
  }

  let scoping = semantic.scoping();
  let nodes = semantic.nodes();
  for (symbol, local, read) in &imported {
    let Some(symbol) = symbol else { continue };
    for &reference_id in scoping.get_resolved_reference_ids(*symbol) {
      let span = nodes.get_node(scoping.get_reference(reference_id).node_id()).span();
      let replacement = if sites.shorthand.contains(&span) {
        format!("{local}: {read}")
      } else if sites.callees.contains(&span) {
        format!("(0, {read})")
      } else {
        read.clone()
      };
      scan.edits.push(Edit::replace(span.start, span.end, replacement));
    }
  }

  // `export { local }` of an imported name forwards the live binding
  let by_local: HashMap<&str, &str> = imported
    .iter()
    .map(|(_, local, read)| (local.as_str(), read.as_str()))
    .collect();
  for export in &mut scan.exports {
    if let Some(read) = by_local.get(export.expression.as_str()) {
      export.expression = read.to_string();
    }
  }

  Ok(scan)
}

/// Apply non-overlapping edits to `source`.
pub(crate) fn apply_edits(source: &str, edits: &[Edit]) -> String {
  let mut sorted: Vec<&Edit> = edits.iter().collect();
  sorted.sort_by_key(|e| (e.start, e.end));

  let mut out = String::with_capacity(source.len());
  let mut cursor = 0usize;
  for edit in sorted {
    let start = edit.start as usize;
    if start < cursor {
      continue;
    }
    out.push_str(&source[cursor..start]);
    out.push_str(&edit.replacement);
    cursor = edit.end as usize;
  }
  out.push_str(&source[cursor..]);
  out
}

fn export_name(name: &ModuleExportName<'_>) -> String {
  match name {
    ModuleExportName::IdentifierName(ident) => ident.name.to_string(),
    ModuleExportName::IdentifierReference(ident) => ident.name.to_string(),
    ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
  }
}

fn member(object: &str, property: &str) -> String {
  format!("{object}[{}]", js_string(property))
}

/// Quote `value` as a JavaScript string literal.
pub(crate) fn js_string(value: &str) -> String {
  serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

fn declared_names(decl: &Declaration<'_>) -> Vec<String> {
  match decl {
    Declaration::VariableDeclaration(var) => {
      let mut names = Vec::new();
      for declarator in &var.declarations {
        collect_bound_names(&declarator.id, &mut names);
      }
      names
    }
    Declaration::FunctionDeclaration(func) => func.id.iter().map(|id| id.name.to_string()).collect(),
    Declaration::ClassDeclaration(class) => class.id.iter().map(|id| id.name.to_string()).collect(),
    _ => Vec::new(),
  }
}

fn collect_bound_names(pattern: &BindingPattern<'_>, names: &mut Vec<String>) {
  match &pattern.kind {
    BindingPatternKind::BindingIdentifier(ident) => names.push(ident.name.to_string()),
    BindingPatternKind::ObjectPattern(object) => {
      for property in &object.properties {
        collect_bound_names(&property.value, names);
      }
      if let Some(rest) = &object.rest {
        collect_bound_names(&rest.argument, names);
      }
    }
    BindingPatternKind::ArrayPattern(array) => {
      for element in array.elements.iter().flatten() {
        collect_bound_names(element, names);
      }
      if let Some(rest) = &array.rest {
        collect_bound_names(&rest.argument, names);
      }
    }
    BindingPatternKind::AssignmentPattern(assign) => collect_bound_names(&assign.left, names),
  }
}

/// Source positions whose rewrite depends on the surrounding syntax.
#[derive(Default)]
struct SiteCollector {
  import_meta: Vec<Span>,
  /// Identifiers written as `{ name }` object shorthand.
  shorthand: Vec<Span>,
  /// Identifiers called directly, as `name()` or a template tag.
  callees: Vec<Span>,
}

impl<'a> Visit<'a> for SiteCollector {
  fn visit_meta_property(&mut self, it: &MetaProperty<'a>) {
    if it.meta.name.as_str() == "import" && it.property.name.as_str() == "meta" {
      self.import_meta.push(it.span);
    }
    walk::walk_meta_property(self, it);
  }

  fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
    if let (true, Expression::Identifier(ident)) = (it.shorthand, &it.value) {
      self.shorthand.push(ident.span);
    }
    walk::walk_object_property(self, it);
  }

  fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
    if let Expression::Identifier(ident) = &it.callee {
      self.callees.push(ident.span);
    }
    walk::walk_call_expression(self, it);
  }

  fn visit_tagged_template_expression(&mut self, it: &TaggedTemplateExpression<'a>) {
    if let Expression::Identifier(ident) = &it.tag {
      self.callees.push(ident.span);
    }
    walk::walk_tagged_template_expression(self, it);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scan_str(source: &str) -> ModuleScan {
    scan(Path::new("/p/mod.js"), source).unwrap()
  }

  fn rewrite(source: &str) -> String {
    apply_edits(source, &scan_str(source).edits)
  }

  #[test]
  fn collects_specifiers_in_source_order() {
    let scan = scan_str(
      r#"
import b from "./b.js";
export { x } from "./c.js";
import "./a.js";
export * from "./b.js";
"#,
    );
    assert_eq!(scan.specifiers, vec!["./b.js", "./c.js", "./a.js"]);
    assert_eq!(scan.hoisted.len(), 4);
    assert!(matches!(&scan.hoisted[2], Hoisted::Evaluate { specifier } if specifier == "./a.js"));
    assert!(matches!(&scan.hoisted[3], Hoisted::ReexportAll { .. }));
  }

  #[test]
  fn import_declarations_bind_the_exports_object() {
    let scan = scan_str(
      "import init, { greet as hello, \"odd-name\" as odd } from \"../pkg/hello.js\";\nimport * as ns from \"./ns.js\";\n",
    );
    assert_eq!(
      scan.hoisted,
      vec![
        Hoisted::Bind {
          specifier: "../pkg/hello.js".to_string(),
          local: "__import0".to_string(),
        },
        Hoisted::Bind {
          specifier: "./ns.js".to_string(),
          local: "ns".to_string(),
        },
      ]
    );
  }

  #[test]
  fn imported_references_read_through_the_binding() {
    let source = "import init, { count, inc } from \"./c.js\";\ninc();\nconsole.log(count, { count }, init);\nfunction f(count) { return count; }\n";
    assert_eq!(
      rewrite(source),
      "\n(0, __import0[\"inc\"])();\nconsole.log(__import0[\"count\"], { count: __import0[\"count\"] }, __import0[\"default\"]);\nfunction f(count) { return count; }\n"
    );
  }

  #[test]
  fn tagged_templates_are_called_without_receiver() {
    let out = rewrite("import { html } from \"./h.js\";\nhtml`<p>`;\n");
    assert_eq!(out, "\n(0, __import0[\"html\"])`<p>`;\n");
  }

  #[test]
  fn export_list_forwards_imported_binding() {
    let scan = scan_str("import { a } from \"./a.js\";\nexport { a as b };\n");
    assert_eq!(
      scan.exports,
      vec![ExportEntry {
        exported: "b".to_string(),
        expression: "__import0[\"a\"]".to_string(),
      }]
    );
    assert_eq!(apply_edits("import { a } from \"./a.js\";\nexport { a as b };\n", &scan.edits), "\n\n");
  }

  #[test]
  fn export_declarations_lose_keyword() {
    let source = "export function f() {}\nexport const a = 1, { b, c: [d] } = obj;\nexport class K {}\n";
    let scan = scan_str(source);
    let names: Vec<_> = scan.exports.iter().map(|e| e.exported.as_str()).collect();
    assert_eq!(names, vec!["f", "a", "b", "d", "K"]);

    let out = rewrite(source);
    assert!(!out.contains("export"));
    assert!(out.contains("function f() {}"));
    assert!(out.contains("class K {}"));
  }

  #[test]
  fn export_lists_and_reexports() {
    let scan = scan_str("const a = 1;\nexport { a as b, a };\nexport { x as y } from \"./x.js\";\nexport * as ns from \"./n.js\";\n");
    assert_eq!(
      scan.exports,
      vec![
        ExportEntry {
          exported: "b".to_string(),
          expression: "a".to_string(),
        },
        ExportEntry {
          exported: "a".to_string(),
          expression: "a".to_string(),
        },
        ExportEntry {
          exported: "y".to_string(),
          expression: "__reexport0[\"x\"]".to_string(),
        },
        ExportEntry {
          exported: "ns".to_string(),
          expression: "__reexport1".to_string(),
        },
      ]
    );
  }

  #[test]
  fn default_exports() {
    assert_eq!(rewrite("export default 40 + 2;\n"), "var __default = 40 + 2;\n");
    assert_eq!(rewrite("export default function main() {}\n"), "function main() {}\n");
    assert_eq!(rewrite("export default function () {}\n"), "var __default = function () {};\n");

    let scan = scan_str("export default class Widget {}\n");
    assert_eq!(scan.exports[0].expression, "Widget");
  }

  #[test]
  fn import_meta_is_rewritten() {
    let out = rewrite("const url = new URL(\"x_bg.wasm\", import.meta.url);\n");
    assert_eq!(out, "const url = new URL(\"x_bg.wasm\", __importMeta.url);\n");
  }

  #[test]
  fn syntax_errors_are_reported_with_module() {
    let err = scan(Path::new("/p/broken.js"), "import { from;").unwrap_err();
    match err {
      GraphError::Parse { module, .. } => assert_eq!(module, Path::new("/p/broken.js")),
      other => panic!("unexpected error: {other}"),
    }
  }
}
