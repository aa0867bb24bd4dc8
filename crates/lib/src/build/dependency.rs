//! Dependencies: the inputs a builder's output is derived from.
//!
//! Every dependency can produce a [`Fingerprint`]. The cache compares the
//! fingerprint taken before a run with the one stored alongside a previous
//! result to decide whether the result is still valid.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use super::builder::BuilderRef;
use super::fingerprint::Fingerprint;
use crate::util::hash::{FileHashError, hash_file};

#[derive(Debug, Error)]
pub enum DependencyError {
  #[error("failed to walk {path}: {message}")]
  Walk { path: PathBuf, message: String },

  #[error(transparent)]
  Hash(#[from] FileHashError),

  #[error("failed to read metadata of {path}: {source}")]
  Metadata {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize fingerprint input: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Something a builder's result depends on.
pub trait Dependency: Send + Sync {
  /// Snapshot the current state of the dependency.
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError>;

  /// Human readable, possibly multi-line, description.
  fn describe(&self) -> String;
}

/// A builder that depends on nothing but its own code.
pub struct NoDependencies;

impl Dependency for NoDependencies {
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError> {
    Ok(Fingerprint::Empty)
  }

  fn describe(&self) -> String {
    "no dependencies".to_string()
  }
}

/// Depends on the identity of a named reference.
pub struct ReferenceDependency {
  uri: String,
}

impl ReferenceDependency {
  pub fn new(uri: impl Into<String>) -> Self {
    Self { uri: uri.into() }
  }
}

impl Dependency for ReferenceDependency {
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError> {
    Ok(Fingerprint::Uri(self.uri.clone()))
  }

  fn describe(&self) -> String {
    format!("reference {}", self.uri)
  }
}

type PropertyReader = Box<dyn Fn() -> Result<BTreeMap<String, String>, serde_json::Error> + Send + Sync>;

/// Depends on a chosen set of fields of a serializable object.
///
/// The object is re-serialized on every fingerprint, so changes made through
/// interior mutability are observed.
pub struct PropertiesDependency {
  label: String,
  names: Vec<String>,
  read: PropertyReader,
}

impl PropertiesDependency {
  pub fn new<T>(label: impl Into<String>, object: Arc<T>, names: &[&str]) -> Self
  where
    T: Serialize + Send + Sync + 'static,
  {
    let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
    let selected = names.clone();
    let read: PropertyReader = Box::new(move || {
      let value = serde_json::to_value(object.as_ref())?;
      let mut properties = BTreeMap::new();
      for name in &selected {
        let field = value.get(name).cloned().unwrap_or(serde_json::Value::Null);
        properties.insert(name.clone(), serde_json::to_string(&field)?);
      }
      Ok(properties)
    });
    Self {
      label: label.into(),
      names,
      read,
    }
  }
}

impl Dependency for PropertiesDependency {
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError> {
    Ok(Fingerprint::Properties((self.read)()?))
  }

  fn describe(&self) -> String {
    format!("properties of {}: {}", self.label, self.names.join(", "))
  }
}

/// What a [`SourceSetDependency`] observes about each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSetMode {
  /// Only which files exist.
  Structure,
  /// File contents, by hash.
  Contents,
  /// Modification times.
  Timestamps,
}

/// Depends on the files below a directory.
///
/// A missing directory is an empty set, so a project without sources still
/// fingerprints cleanly.
pub struct SourceSetDependency {
  root: PathBuf,
  mode: SourceSetMode,
  excluded_suffixes: Vec<String>,
}

impl SourceSetDependency {
  pub fn structure(root: impl Into<PathBuf>) -> Self {
    Self::with_mode(root, SourceSetMode::Structure)
  }

  pub fn contents(root: impl Into<PathBuf>) -> Self {
    Self::with_mode(root, SourceSetMode::Contents)
  }

  pub fn timestamps(root: impl Into<PathBuf>) -> Self {
    Self::with_mode(root, SourceSetMode::Timestamps)
  }

  fn with_mode(root: impl Into<PathBuf>, mode: SourceSetMode) -> Self {
    Self {
      root: root.into(),
      mode,
      excluded_suffixes: Vec::new(),
    }
  }

  /// Ignore files whose relative path ends with any of the given suffixes.
  pub fn excluding<I, S>(mut self, suffixes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.excluded_suffixes.extend(suffixes.into_iter().map(Into::into));
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Lists `(relative path, absolute path)` pairs in sorted order.
  fn files(&self) -> Result<Vec<(String, PathBuf)>, DependencyError> {
    if !self.root.is_dir() {
      return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry.map_err(|e| DependencyError::Walk {
        path: self.root.clone(),
        message: e.to_string(),
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let relative = entry
        .path()
        .strip_prefix(&self.root)
        .unwrap_or(entry.path())
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
      if self.excluded_suffixes.iter().any(|suffix| relative.ends_with(suffix.as_str())) {
        continue;
      }
      files.push((relative, entry.into_path()));
    }
    Ok(files)
  }
}

impl Dependency for SourceSetDependency {
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError> {
    let files = self.files()?;
    match self.mode {
      SourceSetMode::Structure => Ok(Fingerprint::Structure(
        files.into_iter().map(|(relative, _)| relative).collect::<BTreeSet<_>>(),
      )),
      SourceSetMode::Contents => {
        let mut contents = BTreeMap::new();
        for (relative, path) in files {
          contents.insert(relative, hash_file(&path)?);
        }
        Ok(Fingerprint::Contents(contents))
      }
      SourceSetMode::Timestamps => {
        let mut stamps = BTreeMap::new();
        for (relative, path) in files {
          let modified = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map_err(|source| DependencyError::Metadata {
              path: path.clone(),
              source,
            })?;
          let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
          stamps.insert(relative, nanos);
        }
        Ok(Fingerprint::Timestamps(stamps))
      }
    }
  }

  fn describe(&self) -> String {
    let mode = match self.mode {
      SourceSetMode::Structure => "structure",
      SourceSetMode::Contents => "contents",
      SourceSetMode::Timestamps => "timestamps",
    };
    format!("{mode} of source set {}", self.root.display())
  }
}

/// Depends on everything another builder depends on.
///
/// The subtask contributes the digest of its fingerprint, which changes
/// exactly when the subtask's own fingerprint changes.
pub struct SubtaskDependency {
  uid: String,
  label: String,
  source: SubtaskSource,
}

enum SubtaskSource {
  Builder(BuilderRef),
  Dependency(Arc<dyn Dependency>),
}

impl SubtaskDependency {
  /// Follows the builder's full dependency tree, resolved on each fingerprint.
  pub fn new(builder: BuilderRef) -> Self {
    Self {
      uid: builder.uid(),
      label: builder.to_string(),
      source: SubtaskSource::Builder(builder),
    }
  }

  /// Stands for the builder `uid` through an explicitly chosen dependency.
  ///
  /// Lets a builder that already enumerates its transitive subtasks take
  /// only each one's local inputs instead of re-walking shared sub-graphs.
  pub fn of(uid: impl Into<String>, label: impl Into<String>, dependency: Arc<dyn Dependency>) -> Self {
    Self {
      uid: uid.into(),
      label: label.into(),
      source: SubtaskSource::Dependency(dependency),
    }
  }
}

impl Dependency for SubtaskDependency {
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError> {
    let inner = match &self.source {
      SubtaskSource::Builder(builder) => builder.dependencies().fingerprint()?,
      SubtaskSource::Dependency(dependency) => dependency.fingerprint()?,
    };
    Ok(Fingerprint::Subtask {
      uid: self.uid.clone(),
      digest: inner.digest()?,
    })
  }

  // Does not recurse into the subtask; prerequisite graphs may be cyclic.
  fn describe(&self) -> String {
    format!("subtask {}", self.label)
  }
}

/// An ordered composition of dependencies.
pub struct MultipleDependencies {
  children: Vec<Arc<dyn Dependency>>,
}

impl MultipleDependencies {
  pub fn new(children: Vec<Arc<dyn Dependency>>) -> Self {
    Self { children }
  }

  pub fn children(&self) -> &[Arc<dyn Dependency>] {
    &self.children
  }

  /// Combine dependencies, collapsing the trivial cases.
  pub fn combine(mut children: Vec<Arc<dyn Dependency>>) -> Arc<dyn Dependency> {
    match children.len() {
      0 => Arc::new(NoDependencies),
      1 => children.remove(0),
      _ => Arc::new(MultipleDependencies::new(children)),
    }
  }
}

impl Dependency for MultipleDependencies {
  fn fingerprint(&self) -> Result<Fingerprint, DependencyError> {
    let children = self
      .children
      .iter()
      .map(|child| child.fingerprint())
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Fingerprint::Combined(children))
  }

  fn describe(&self) -> String {
    let mut out = String::from("all of:");
    for child in &self.children {
      for (i, line) in child.describe().lines().enumerate() {
        out.push('\n');
        out.push_str(if i == 0 { "  - " } else { "    " });
        out.push_str(line);
      }
    }
    out
  }
}
