//! Specifier resolution.
//!
//! Deliberately small: relative and absolute paths with a fixed extension
//! list, plus an alias table for bare specifiers. There is no package lookup.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::util::fs::normalize;

use super::{ExtraNode, ExtraNodes, GraphError};

const EXTENSIONS: &[&str] = &["js", "mjs"];
const INDEX_FILE: &str = "index.js";

/// Resolve `specifier` as written in `importer`.
pub(crate) fn resolve(specifier: &str, importer: &Path, extra: &ExtraNodes) -> Result<PathBuf, GraphError> {
  if !is_path_like(specifier) {
    let Some(target) = extra.aliases.get(specifier) else {
      return Err(GraphError::MissingModule {
        specifier: specifier.to_string(),
        importer: importer.to_path_buf(),
      });
    };
    return resolve_candidates(specifier, importer, std::slice::from_ref(target), extra);
  }

  let base = importer.parent().unwrap_or_else(|| Path::new(""));
  let joined = normalize(&base.join(specifier));
  resolve_candidates(specifier, importer, &candidates(&joined), extra)
}

/// Virtual nodes win over the disk for every candidate.
fn resolve_candidates(
  specifier: &str,
  importer: &Path,
  candidates: &[PathBuf],
  extra: &ExtraNodes,
) -> Result<PathBuf, GraphError> {
  for candidate in candidates {
    match extra.nodes.get(candidate) {
      Some(ExtraNode::Ready(_)) => return Ok(candidate.clone()),
      Some(ExtraNode::Pending) => {
        return Err(GraphError::PrematureReference {
          specifier: specifier.to_string(),
          importer: importer.to_path_buf(),
          path: candidate.clone(),
        });
      }
      None => {}
    }
  }

  candidates
    .iter()
    .find(|c| c.is_file())
    .cloned()
    .ok_or_else(|| GraphError::MissingModule {
      specifier: specifier.to_string(),
      importer: importer.to_path_buf(),
    })
}

fn candidates(path: &Path) -> Vec<PathBuf> {
  let mut out = vec![path.to_path_buf()];
  for ext in EXTENSIONS {
    let mut with_ext: OsString = path.as_os_str().to_owned();
    with_ext.push(".");
    with_ext.push(ext);
    out.push(PathBuf::from(with_ext));
  }
  out.push(path.join(INDEX_FILE));
  out
}

fn is_path_like(specifier: &str) -> bool {
  specifier.starts_with("./")
    || specifier.starts_with("../")
    || specifier.starts_with('/')
    || specifier == "."
    || specifier == ".."
}
