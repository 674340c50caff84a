//! Output directory lifecycle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::WRITE_PROBE_FILENAME;

#[derive(Debug, Error)]
pub enum OutputPathError {
  #[error("output path {} exists and is not a directory", path.display())]
  NotADirectory { path: PathBuf },

  #[error("failed to create output directory {}: {source}", path.display())]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("output directory {} is not writable: {source}", path.display())]
  NotWritable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to clean {}: {source}", path.display())]
  Clean {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Make sure `out_dir` exists as a writable directory, emptying it first when
/// `clean` is set.
pub fn prepare_output_dir(out_dir: &Path, clean: bool) -> Result<(), OutputPathError> {
  match fs::metadata(out_dir) {
    Ok(meta) if !meta.is_dir() => {
      return Err(OutputPathError::NotADirectory {
        path: out_dir.to_path_buf(),
      });
    }
    Ok(_) => {
      if clean {
        clean_dir(out_dir)?;
      }
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!(path = %out_dir.display(), "creating output directory");
      fs::create_dir_all(out_dir).map_err(|source| OutputPathError::Create {
        path: out_dir.to_path_buf(),
        source,
      })?;
    }
    Err(source) => {
      return Err(OutputPathError::NotWritable {
        path: out_dir.to_path_buf(),
        source,
      });
    }
  }

  let probe = out_dir.join(WRITE_PROBE_FILENAME);
  fs::write(&probe, b"").map_err(|source| OutputPathError::NotWritable {
    path: out_dir.to_path_buf(),
    source,
  })?;
  let _ = fs::remove_file(&probe);

  Ok(())
}

fn clean_dir(dir: &Path) -> Result<(), OutputPathError> {
  let entries = fs::read_dir(dir).map_err(|source| OutputPathError::Clean {
    path: dir.to_path_buf(),
    source,
  })?;

  let mut removed = 0usize;
  for entry in entries {
    let entry = entry.map_err(|source| OutputPathError::Clean {
      path: dir.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
    if is_dir {
      fs::remove_dir_all(&path)
    } else {
      fs::remove_file(&path)
    }
    .map_err(|source| OutputPathError::Clean { path, source })?;
    removed += 1;
  }

  info!(path = %dir.display(), removed, "cleaned output directory");
  Ok(())
}
