//! Per-fingerprint advisory file locks.
//!
//! Serialises native compiles of the same fingerprint across processes
//! sharing a cache directory. The lock is held for the lifetime of the
//! returned guard and released when its file handle closes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::util::hash::Fingerprint;

const LOCKS_DIR: &str = ".locks";

/// Written into a held lock so waiters can say who they are waiting on.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub fingerprint: Fingerprint,
}

#[derive(Debug, Error)]
pub enum CacheLockError {
  #[error("failed to create lock directory {}: {source}", path.display())]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {}: {source}", path.display())]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock {}: {source}", path.display())]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("lock task failed: {0}")]
  Join(String),
}

/// An exclusive lock on one fingerprint.
pub struct FingerprintLock {
  file: File,
  lock_path: PathBuf,
}

impl FingerprintLock {
  /// Block (on a blocking thread) until the lock for `fingerprint` under
  /// `cache_root` is held.
  pub async fn acquire(cache_root: &Path, fingerprint: &Fingerprint) -> Result<Self, CacheLockError> {
    let cache_root = cache_root.to_path_buf();
    let fingerprint = fingerprint.clone();
    tokio::task::spawn_blocking(move || Self::acquire_blocking(&cache_root, &fingerprint))
      .await
      .map_err(|e| CacheLockError::Join(e.to_string()))?
  }

  pub fn acquire_blocking(cache_root: &Path, fingerprint: &Fingerprint) -> Result<Self, CacheLockError> {
    let dir = cache_root.join(LOCKS_DIR);
    std::fs::create_dir_all(&dir).map_err(|source| CacheLockError::CreateDir {
      path: dir.clone(),
      source,
    })?;

    let lock_path = dir.join(format!("{}.lock", fingerprint));
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(|source| CacheLockError::OpenFile {
        path: lock_path.clone(),
        source,
      })?;

    match lock(&file, false) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        match read_holder(&lock_path) {
          Some(holder) => info!(
            fingerprint = %fingerprint.short(),
            pid = holder.pid,
            started_at = holder.started_at_unix,
            "waiting for another compile of the same crate"
          ),
          None => info!(fingerprint = %fingerprint.short(), "waiting for another compile of the same crate"),
        }
        lock(&file, true).map_err(|source| CacheLockError::LockFailed {
          path: lock_path.clone(),
          source,
        })?;
      }
      Err(source) => {
        return Err(CacheLockError::LockFailed {
          path: lock_path.clone(),
          source,
        });
      }
    }

    Self::write_metadata(&file, fingerprint)?;
    debug!(path = %lock_path.display(), "acquired fingerprint lock");

    Ok(Self { file, lock_path })
  }

  fn write_metadata(file: &File, fingerprint: &Fingerprint) -> Result<(), CacheLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      fingerprint: fingerprint.clone(),
    };

    file.set_len(0).map_err(CacheLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, &metadata).map_err(|e| CacheLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(CacheLockError::WriteMetadata)?;
    Ok(())
  }

  /// Read the metadata through the held handle (a second handle would be
  /// refused on Windows).
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn read_holder(lock_path: &Path) -> Option<LockMetadata> {
  let mut contents = String::new();
  File::open(lock_path).ok()?.read_to_string(&mut contents).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn lock(file: &File, block: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if block {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, block: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if block {
    LOCKFILE_EXCLUSIVE_LOCK
  } else {
    LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY
  };

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized,
  // and the handle stays open for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
      return Err(io::Error::from(io::ErrorKind::WouldBlock));
    }
    Err(err)
  } else {
    Ok(())
  }
}
