//! Lexical path helpers.
//!
//! Paths handed to the pipeline may not exist yet (output directories, virtual
//! shim modules), so these helpers never touch the filesystem except
//! `canonical_or_normalized`.

use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically: drops `.` segments and folds `..` into the
/// preceding segment. Leading `..` segments of relative paths are kept.
pub fn normalize(path: &Path) -> PathBuf {
  let mut out: Vec<Component<'_>> = Vec::new();

  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => match out.last() {
        Some(Component::Normal(_)) => {
          out.pop();
        }
        Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
        _ => out.push(component),
      },
      other => out.push(other),
    }
  }

  out.iter().map(|c| c.as_os_str()).collect()
}

/// Resolve `path` against `base` when relative, then normalize.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
  if path.is_absolute() {
    normalize(path)
  } else {
    normalize(&base.join(path))
  }
}

/// Canonicalize the longest existing prefix of `path` (resolving symlinks) and
/// append the remaining segments lexically, so existing and not-yet-created
/// paths compare consistently.
pub fn canonical_or_normalized(path: &Path) -> PathBuf {
  let normalized = normalize(path);
  let mut existing = normalized.as_path();
  let mut rest: Vec<&std::ffi::OsStr> = Vec::new();

  loop {
    if let Ok(canonical) = dunce::canonicalize(existing) {
      return rest.iter().rev().fold(canonical, |acc, seg| acc.join(seg));
    }
    match (existing.parent(), existing.file_name()) {
      (Some(parent), Some(name)) => {
        rest.push(name);
        existing = parent;
      }
      _ => return normalize(path),
    }
  }
}

/// True when `child` equals `parent` or lies below it.
pub fn is_within(child: &Path, parent: &Path) -> bool {
  child.starts_with(parent)
}

/// Express `path` relative to `base` lexically, climbing with `..` where the
/// two diverge. Paths on different prefixes (Windows drives) come back as-is.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
  let path_components: Vec<Component<'_>> = path.components().collect();
  let base_components: Vec<Component<'_>> = base.components().collect();

  if path_components.first() != base_components.first() {
    return path.to_path_buf();
  }

  let common = path_components
    .iter()
    .zip(&base_components)
    .take_while(|(a, b)| a == b)
    .count();

  let mut out = PathBuf::new();
  for _ in common..base_components.len() {
    out.push("..");
  }
  for component in &path_components[common..] {
    out.push(component.as_os_str());
  }
  out
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
