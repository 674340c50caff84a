//! Chunk minification.
//!
//! The engine is oxc: parse, optionally compress and mangle, then print with
//! whitespace removed. Only syntactically malformed chunks fail; the bundler
//! never produces those in correct operation.

use std::collections::BTreeMap;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier as OxcMinifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bundle::Chunk;

/// Minification options.
///
/// Keys other than `mangle`, `compress` and `module` are collected in
/// `ignored` and have no effect, so configs written for other minifiers keep
/// loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinifyOptions {
  /// Rename local identifiers to shorter forms.
  pub mangle: bool,
  /// Apply size-reducing rewrites (dead code removal, constant folding, ...).
  pub compress: bool,
  /// Parse the chunk with module semantics (import/export, strict mode).
  #[serde(rename = "module")]
  pub module_mode: bool,
  #[serde(flatten, skip_serializing)]
  pub ignored: BTreeMap<String, toml::Value>,
}

impl Default for MinifyOptions {
  fn default() -> Self {
    Self {
      mangle: true,
      compress: true,
      module_mode: false,
      ignored: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Error)]
pub enum MinifyError {
  /// The chunk did not parse. Indicates a bundler invariant violation.
  #[error("malformed chunk `{chunk}`: {reason}")]
  Malformed { chunk: String, reason: String },
}

/// Applies `MinifyOptions` to chunks.
#[derive(Debug, Clone, Default)]
pub struct Minifier {
  options: MinifyOptions,
}

impl Minifier {
  pub fn new(options: MinifyOptions) -> Self {
    if !options.ignored.is_empty() {
      debug!(keys = ?options.ignored.keys().collect::<Vec<_>>(), "ignoring unrecognized minify options");
    }
    Self { options }
  }

  pub fn options(&self) -> &MinifyOptions {
    &self.options
  }

  /// Minify one chunk. The module list and name are carried over unchanged.
  pub fn minify(&self, chunk: &Chunk) -> Result<Chunk, MinifyError> {
    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(self.options.module_mode);

    let parsed = Parser::new(&allocator, &chunk.code, source_type).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
      let reason = parsed
        .errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "parser aborted".to_string());
      return Err(MinifyError::Malformed {
        chunk: chunk.name.clone(),
        reason,
      });
    }

    let mut program = parsed.program;
    let options = MinifierOptions {
      mangle: self.options.mangle.then(MangleOptions::default),
      compress: self.options.compress.then(CompressOptions::smallest),
    };
    let minified = OxcMinifier::new(options).minify(&allocator, &mut program);

    let code = Codegen::new()
      .with_options(CodegenOptions::minify())
      .with_scoping(minified.scoping)
      .build(&program)
      .code;

    debug!(
      chunk = %chunk.name,
      before = chunk.code.len(),
      after = code.len(),
      "minified chunk"
    );

    Ok(Chunk {
      name: chunk.name.clone(),
      modules: chunk.modules.clone(),
      code,
    })
  }
}
