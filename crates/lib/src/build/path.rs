//! Target-relative output paths.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The set of paths produced by one builder run.
pub type OutputSet = BTreeSet<TargetRelativePath>;

/// A location relative to the build's target root.
///
/// Always stored with `/` separators, so equality and hashing are plain string
/// comparisons on every platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetRelativePath(String);

impl TargetRelativePath {
  pub fn new(path: impl AsRef<str>) -> Self {
    let normalized = path
      .as_ref()
      .split(['/', '\\'])
      .filter(|segment| !segment.is_empty() && *segment != ".")
      .collect::<Vec<_>>()
      .join("/");
    Self(normalized)
  }

  /// Converts a relative file system path, dropping root and prefix components.
  pub fn from_path(path: &Path) -> Self {
    let segments: Vec<String> = path
      .components()
      .filter_map(|component| match component {
        Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
        Component::ParentDir => Some("..".to_string()),
        _ => None,
      })
      .collect();
    Self(segments.join("/"))
  }

  pub fn join(&self, child: impl AsRef<str>) -> Self {
    Self::new(format!("{}/{}", self.0, child.as_ref()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Whether this path lies strictly below `dir`.
  ///
  /// The empty path is the target root, which contains everything.
  pub fn is_under(&self, dir: &TargetRelativePath) -> bool {
    if dir.0.is_empty() {
      return !self.0.is_empty();
    }
    self.0.len() > dir.0.len() && self.0.starts_with(&dir.0) && self.0.as_bytes()[dir.0.len()] == b'/'
  }

  /// Resolves the path against a concrete target root.
  pub fn to_path(&self, target_root: &Path) -> PathBuf {
    self
      .0
      .split('/')
      .filter(|segment| !segment.is_empty())
      .fold(target_root.to_path_buf(), |path, segment| path.join(segment))
  }
}

impl fmt::Display for TargetRelativePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for TargetRelativePath {
  fn from(value: &str) -> Self {
    Self::new(value)
  }
}
