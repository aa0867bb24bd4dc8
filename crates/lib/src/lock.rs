//! Advisory locks over a suite's shared directories.
//!
//! A command locks two things, always in this order:
//!
//! - the target directory, shared by every goal, through
//!   `<suite root>/.target.lock`;
//! - the goal's cache directory, through `<cache dir>/.lock`.
//!
//! Builds take both locks shared, so builds of any goals run side by side.
//! `clean` takes both exclusively: it removes `target/` and must not race a
//! build of another goal writing there.
//!
//! Each holder records itself next to the lock file (`<lock file>.json`,
//! replaced atomically), so a refused command can name who is in the way.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::consts::{APP_NAME, CACHE_LOCK_FILE, TARGET_LOCK_FILE};

const HOLDER_EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  /// Builds: any number of holders.
  Shared,
  /// Clean: a single holder, no builds.
  Exclusive,
}

/// The command holding a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
  pub pid: u32,
  pub since_unix: u64,
  /// Subcommand, e.g. `build` or `clean`.
  pub command: String,
  pub goal: String,
  /// Build target, if the command selected one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
}

impl LockHolder {
  /// Describes the running process.
  pub fn current(command: impl Into<String>, goal: impl Into<String>, target: Option<&str>) -> Self {
    Self {
      pid: std::process::id(),
      since_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default(),
      command: command.into(),
      goal: goal.into(),
      target: target.map(str::to_string),
    }
  }
}

impl fmt::Display for LockHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "`{APP_NAME} {}", self.command)?;
    if let Some(target) = &self.target {
      write!(f, " {target}")?;
    }
    write!(f, "` (goal {}, PID {}, since unix time {})", self.goal, self.pid, self.since_unix)
  }
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("{} is in use by {holder}\nIf no bari process is running, remove {}", .guarded.display(), .lock_path.display())]
  Busy {
    guarded: PathBuf,
    holder: Box<LockHolder>,
    lock_path: PathBuf,
  },

  #[error("{} is in use by another process\nIf no bari process is running, remove {}", .guarded.display(), .lock_path.display())]
  BusyUnknown { guarded: PathBuf, lock_path: PathBuf },

  #[error("failed to lock {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl LockError {
  fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Whether `name` is one of the files a lock keeps in a directory.
pub fn is_lock_artifact(name: &str) -> bool {
  [CACHE_LOCK_FILE, TARGET_LOCK_FILE]
    .iter()
    .any(|lock| name == *lock || name == format!("{lock}.{HOLDER_EXTENSION}"))
}

/// Locks a command holds over a suite. Released on drop.
pub struct SuiteLock {
  target: HeldLock,
  cache: HeldLock,
  holder: LockHolder,
}

impl SuiteLock {
  pub fn acquire(suite_root: &Path, cache_dir: &Path, mode: LockMode, holder: LockHolder) -> Result<Self, LockError> {
    let target = HeldLock::acquire(suite_root, TARGET_LOCK_FILE, mode, &holder)?;
    let cache = HeldLock::acquire(cache_dir, CACHE_LOCK_FILE, mode, &holder)?;
    debug!(?mode, holder = %holder, "acquired suite lock");
    Ok(Self { target, cache, holder })
  }

  pub fn holder(&self) -> &LockHolder {
    &self.holder
  }

  pub fn target_lock_path(&self) -> &Path {
    &self.target.path
  }

  pub fn cache_lock_path(&self) -> &Path {
    &self.cache.path
  }
}

/// Last holder recorded for the lock file at `lock_path`.
pub fn recorded_holder(lock_path: &Path) -> Option<LockHolder> {
  let contents = fs::read_to_string(holder_path(lock_path)).ok()?;
  serde_json::from_str(&contents).ok()
}

fn holder_path(lock_path: &Path) -> PathBuf {
  let mut name = lock_path.as_os_str().to_owned();
  name.push(".");
  name.push(HOLDER_EXTENSION);
  PathBuf::from(name)
}

struct HeldLock {
  // Keeps the OS lock alive.
  _file: File,
  path: PathBuf,
}

impl HeldLock {
  fn acquire(dir: &Path, file_name: &str, mode: LockMode, holder: &LockHolder) -> Result<Self, LockError> {
    fs::create_dir_all(dir).map_err(|e| LockError::io(dir, e))?;
    let path = dir.join(file_name);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&path)
      .map_err(|e| LockError::io(&path, e))?;

    match try_lock(&file, mode) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
        return Err(match recorded_holder(&path) {
          Some(holder) => LockError::Busy {
            guarded: dir.to_path_buf(),
            holder: Box::new(holder),
            lock_path: path,
          },
          None => LockError::BusyUnknown {
            guarded: dir.to_path_buf(),
            lock_path: path,
          },
        });
      }
      Err(e) => return Err(LockError::io(&path, e)),
    }

    record_holder(dir, &path, holder)?;
    Ok(Self { _file: file, path })
  }
}

/// Shared holders overwrite each other's record; the last one wins.
fn record_holder(dir: &Path, lock_path: &Path, holder: &LockHolder) -> Result<(), LockError> {
  let record = holder_path(lock_path);
  let write = || -> io::Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, holder).map_err(io::Error::other)?;
    temp.flush()?;
    temp.persist(&record).map_err(|e| e.error)?;
    Ok(())
  };
  write().map_err(|e| LockError::io(&record, e))
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };
  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: the handle is owned by `file`; a zeroed OVERLAPPED locks from offset 0.
  let locked = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(file.as_raw_handle() as HANDLE, flags, 0, 1, 0, &mut overlapped)
  };
  if locked != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::Error::from(io::ErrorKind::WouldBlock));
  }
  Err(err)
}
