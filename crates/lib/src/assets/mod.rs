//! Static asset staging.
//!
//! Source trees are copied into the output directory in order. When two
//! sources contain the same relative path the later source overwrites the
//! earlier one. A failed copy leaves whatever was already written in place.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum AssetError {
  #[error("asset directory does not exist: {}", path.display())]
  MissingSource { path: PathBuf },

  #[error("failed to traverse asset directory {}: {source}", path.display())]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("failed to create directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
  Copy {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Copies asset directories into a destination directory.
#[derive(Debug, Clone, Default)]
pub struct AssetStager;

impl AssetStager {
  pub fn new() -> Self {
    Self
  }

  /// Copy every file below each of `sources` into `dest`, preserving relative
  /// paths. Returns the destination paths written, sorted and de-duplicated.
  pub fn stage(&self, sources: &[PathBuf], dest: &Path) -> Result<Vec<PathBuf>, AssetError> {
    let mut written = BTreeSet::new();

    for source in sources {
      if !source.is_dir() {
        return Err(AssetError::MissingSource { path: source.clone() });
      }

      let mut copied = 0usize;
      for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| AssetError::Walk {
          path: source.clone(),
          source: e,
        })?;

        let rel = match entry.path().strip_prefix(source) {
          Ok(rel) if !rel.as_os_str().is_empty() => rel,
          _ => continue,
        };
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
          fs::create_dir_all(&target).map_err(|e| AssetError::CreateDir {
            path: target.clone(),
            source: e,
          })?;
          continue;
        }

        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent).map_err(|e| AssetError::CreateDir {
            path: parent.to_path_buf(),
            source: e,
          })?;
        }
        fs::copy(entry.path(), &target).map_err(|e| AssetError::Copy {
          from: entry.path().to_path_buf(),
          to: target.clone(),
          source: e,
        })?;

        if !written.insert(target.clone()) {
          debug!(path = %target.display(), from = %source.display(), "asset overwritten by later source");
        }
        copied += 1;
      }

      info!(source = %source.display(), files = copied, "staged assets");
    }

    Ok(written.into_iter().collect())
  }
}
