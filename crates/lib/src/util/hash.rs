//! SHA-256 helpers: source tree hashing, native fingerprints and binary
//! verification.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

/// Identifies one native compile: the source tree plus the compile options.
///
/// Lowercase hex SHA-256. Used as the cache key and as the name of the cache
/// entry directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl Fingerprint {
  /// Combine a source tree hash with serialisable compile options.
  pub fn compute<T: Serialize>(tree: &ContentHash, options: &T) -> Result<Self, serde_json::Error> {
    let options = serde_json::to_vec(options)?;
    let digest = Sha256::new()
      .chain_update(b"tree\0")
      .chain_update(tree.0.as_bytes())
      .chain_update(b"\0options\0")
      .chain_update(&options)
      .finalize();
    Ok(Fingerprint(format!("{digest:x}")))
  }

  /// First 12 characters, for log lines.
  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }
}

/// Lowercase hex SHA-256 of some content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Error)]
pub enum DirHashError {
  #[error("failed to walk {}: {source}", root.display())]
  Walk {
    root: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Hash a directory tree.
///
/// Covers relative paths, file contents and symlink targets; timestamps and
/// permissions are ignored. Entries are visited in file-name order so the
/// result is stable across platforms. An entry (and everything below it) is
/// left out when its file name or its `/`-separated path relative to `root`
/// appears in `exclude`.
pub fn hash_directory(root: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let mut tree = Sha256::new();

  let walker = WalkDir::new(root)
    .min_depth(1)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| !is_excluded(&relative_slash_path(e.path(), root), exclude));

  for entry in walker {
    let entry = entry.map_err(|source| DirHashError::Walk {
      root: root.to_path_buf(),
      source,
    })?;
    let rel = relative_slash_path(entry.path(), root);
    let kind = entry.file_type();

    let (tag, digest) = if kind.is_symlink() {
      let target = fs::read_link(entry.path()).map_err(|source| DirHashError::Read {
        path: entry.path().to_path_buf(),
        source,
      })?;
      ("link", hash_bytes(target.to_string_lossy().as_bytes()).0)
    } else if kind.is_dir() {
      ("dir", String::new())
    } else if kind.is_file() {
      ("file", hash_file(entry.path())?.0)
    } else {
      // sockets, fifos, devices
      continue;
    };

    tree.update(format!("{tag}\0{rel}\0{digest}\n").as_bytes());
  }

  Ok(ContentHash(format!("{:x}", tree.finalize())))
}

fn relative_slash_path(entry: &Path, root: &Path) -> String {
  super::fs::to_slash(entry.strip_prefix(root).unwrap_or(entry))
}

fn is_excluded(rel: &str, exclude: &[&str]) -> bool {
  let name = rel.rsplit('/').next().unwrap_or(rel);
  exclude.iter().any(|pattern| *pattern == name || *pattern == rel)
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let read_error = |source| DirHashError::Read {
    path: path.to_path_buf(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_error)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_error)?;
  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(format!("{:x}", Sha256::digest(data)))
}
