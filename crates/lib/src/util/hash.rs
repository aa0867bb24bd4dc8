//! Hashing utilities for fingerprints and cache entries.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash naming cache entries
//! - `ContentHash`: A full 64-character hash of file contents
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A hash identifying a serializable value.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value,
/// short enough to be used as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full 64-character SHA256 hash of some content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing a file.
#[derive(Debug, thiserror::Error)]
pub enum FileHashError {
  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, FileHashError> {
  let read_error = |e: std::io::Error| FileHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  };

  let mut file = fs::File::open(path).map_err(read_error)?;
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(read_error)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
