//! On-disk build cache.
//!
//! Layout:
//!
//! ```text
//! <cache root>/
//! ├── .lock, .lock.json   # see crate::lock
//! └── <key hash>/
//!     ├── entry.json    # CacheEntry
//!     └── files/...     # snapshot of the outputs, relative to the target root
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{BuildCache, CacheEntry, CacheError, CacheKey};
use crate::lock::is_lock_artifact;
use crate::util::hash::Hashable;

const ENTRY_FILE: &str = "entry.json";
const FILES_DIR: &str = "files";

/// Cache storing entries as JSON files below a root directory.
///
/// When a target root is configured, the output files of each entry are
/// copied into the cache on store and copied back on restore, so a hit also
/// recreates outputs that were deleted from the target directory.
pub struct FileBuildCache {
  root: PathBuf,
  target_root: Option<PathBuf>,
}

impl FileBuildCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      target_root: None,
    }
  }

  pub fn with_target_root(mut self, target_root: impl Into<PathBuf>) -> Self {
    self.target_root = Some(target_root.into());
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entry_dir(&self, key: &CacheKey) -> Result<PathBuf, CacheError> {
    Ok(self.root.join(key.compute_hash()?.0))
  }

  fn snapshot_outputs(&self, entry: &CacheEntry, entry_dir: &Path, target_root: &Path) -> Result<(), CacheError> {
    let staging = entry_dir.join(format!("{FILES_DIR}.{}.tmp", std::process::id()));
    if staging.exists() {
      fs::remove_dir_all(&staging).map_err(|e| CacheError::io(&staging, e))?;
    }

    for output in &entry.outputs {
      let source = output.to_path(target_root);
      if !source.is_file() {
        let _ = fs::remove_dir_all(&staging);
        return Err(CacheError::MissingOutput(output.clone()));
      }
      let dest = output.to_path(&staging);
      copy_file(&source, &dest)?;
    }

    let files = entry_dir.join(FILES_DIR);
    if files.exists() {
      fs::remove_dir_all(&files).map_err(|e| CacheError::io(&files, e))?;
    }
    if entry.outputs.is_empty() {
      fs::create_dir_all(&staging).map_err(|e| CacheError::io(&staging, e))?;
    }
    fs::rename(&staging, &files).map_err(|e| CacheError::io(&files, e))
  }
}

fn copy_file(source: &Path, dest: &Path) -> Result<(), CacheError> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
  }
  fs::copy(source, dest).map_err(|e| CacheError::io(source, e))?;
  Ok(())
}

impl BuildCache for FileBuildCache {
  fn try_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
    let path = self.entry_dir(key)?.join(ENTRY_FILE);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(CacheError::io(&path, e)),
    };
    let entry: CacheEntry = serde_json::from_str(&content).map_err(|source| CacheError::Parse {
      path: path.clone(),
      source,
    })?;

    // Truncated hashes may collide.
    if &entry.key != key {
      debug!(path = %path.display(), "cache entry belongs to a different key");
      return Ok(None);
    }
    Ok(Some(entry))
  }

  fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let entry_dir = self.entry_dir(&entry.key)?;
    fs::create_dir_all(&entry_dir).map_err(|e| CacheError::io(&entry_dir, e))?;

    if let Some(target_root) = &self.target_root {
      self.snapshot_outputs(entry, &entry_dir, target_root)?;
    }

    let path = entry_dir.join(ENTRY_FILE);
    let mut temp = NamedTempFile::new_in(&entry_dir).map_err(|e| CacheError::io(&entry_dir, e))?;
    serde_json::to_writer_pretty(&mut temp, entry)?;
    temp.flush().map_err(|e| CacheError::io(temp.path(), e))?;
    temp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;

    debug!(uid = %entry.key.uid, path = %path.display(), "stored cache entry");
    Ok(())
  }

  fn restore(&self, entry: &CacheEntry) -> Result<(), CacheError> {
    let Some(target_root) = &self.target_root else {
      return Ok(());
    };
    let files = self.entry_dir(&entry.key)?.join(FILES_DIR);
    for output in &entry.outputs {
      let source = output.to_path(&files);
      if !source.is_file() {
        return Err(CacheError::MissingOutput(output.clone()));
      }
      copy_file(&source, &output.to_path(target_root))?;
    }
    Ok(())
  }

  fn clean(&self) -> Result<(), CacheError> {
    let entries = match fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(CacheError::io(&self.root, e)),
    };

    for entry in entries {
      let entry = entry.map_err(|e| CacheError::io(&self.root, e))?;
      if entry.file_name().to_str().is_some_and(is_lock_artifact) {
        continue;
      }
      let path = entry.path();
      let result = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      result.map_err(|e| CacheError::io(&path, e))?;
    }
    Ok(())
  }
}
