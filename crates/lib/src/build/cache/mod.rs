//! Build result caching.
//!
//! A cache maps a [`CacheKey`] to the fingerprint the result was produced
//! from and the set of outputs. [`CachedBuilder`] consults the cache before
//! running the builder it wraps.

mod cached;
mod file;
mod memory;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cached::CachedBuilder;
pub use file::FileBuildCache;
pub use memory::MemoryBuildCache;

use super::fingerprint::Fingerprint;
use super::path::{OutputSet, TargetRelativePath};
use crate::util::hash::Hashable;

/// Identifies a cached result.
///
/// The scope separates independent cache namespaces, such as build goals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
  pub scope: String,
  pub uid: String,
}

impl CacheKey {
  pub fn new(scope: impl Into<String>, uid: impl Into<String>) -> Self {
    Self {
      scope: scope.into(),
      uid: uid.into(),
    }
  }
}

impl Hashable for CacheKey {}

/// A stored builder result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: CacheKey,
  pub fingerprint: Fingerprint,
  pub outputs: OutputSet,
}

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse cache entry {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize cache entry: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("output {0} is missing")]
  MissingOutput(TargetRelativePath),
}

impl CacheError {
  fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Storage for builder results.
pub trait BuildCache: Send + Sync {
  /// Look up the entry stored under `key`, if any.
  fn try_get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

  /// Store an entry, replacing any previous one with the same key.
  fn store(&self, entry: &CacheEntry) -> Result<(), CacheError>;

  /// Bring the entry's outputs back into place before it is used as a hit.
  fn restore(&self, _entry: &CacheEntry) -> Result<(), CacheError> {
    Ok(())
  }

  /// Drop every entry.
  fn clean(&self) -> Result<(), CacheError>;
}
