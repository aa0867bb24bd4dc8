//! Dependency fingerprints.
//!
//! A fingerprint is a comparable snapshot of everything a builder's output
//! depends on. Two fingerprints are equal exactly when the inputs they were
//! taken from are considered unchanged.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::util::hash::{ContentHash, HashError, Hashable, ObjectHash};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Fingerprint {
  /// Nothing to depend on. Always equal to itself.
  Empty,
  /// A named external reference.
  Uri(String),
  /// Selected properties of an object, as JSON-encoded values.
  Properties(BTreeMap<String, String>),
  /// Relative paths of a file set.
  Structure(BTreeSet<String>),
  /// Relative paths with their content hashes.
  Contents(BTreeMap<String, ContentHash>),
  /// Relative paths with their modification times in nanoseconds since the epoch.
  Timestamps(BTreeMap<String, u64>),
  /// Digest of another builder's dependency fingerprint.
  ///
  /// Only the digest is kept, so nesting subtasks does not grow the entry
  /// stored in the cache.
  Subtask { uid: String, digest: ObjectHash },
  /// Ordered fingerprints of composed dependencies.
  Combined(Vec<Fingerprint>),
}

impl Hashable for Fingerprint {}

impl Fingerprint {
  /// A short stable digest, handy for logs and dumps.
  pub fn digest(&self) -> Result<ObjectHash, HashError> {
    self.compute_hash()
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Fingerprint::Empty => true,
      Fingerprint::Combined(children) => children.iter().all(Fingerprint::is_empty),
      _ => false,
    }
  }
}
