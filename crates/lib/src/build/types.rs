//! Error and status types of the build graph engine.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::dependency::DependencyError;

/// Errors raised while assembling or executing a build graph.
#[derive(Debug, Error)]
pub enum BuildError {
  /// Results were requested for a builder that has not run in this context.
  #[error("builder {0} has not run in this context")]
  UnexecutedBuilder(String),

  /// The builder was never added to the context.
  #[error("builder {0} is not added to the context")]
  UnknownBuilder(String),

  /// A builder failed; wraps the builder's own error.
  #[error("builder {builder} failed: {source}")]
  BuilderFailed {
    builder: String,
    #[source]
    source: Box<BuildError>,
  },

  /// Fingerprinting a dependency failed.
  #[error(transparent)]
  Dependency(#[from] DependencyError),

  /// I/O error while a builder touched the file system.
  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Writing a graph dump stage failed.
  #[error("failed to dump build graph stage '{stage}': {source}")]
  Dump {
    stage: String,
    #[source]
    source: std::io::Error,
  },

  /// The worker pool for parallel scheduling could not be created.
  #[error("failed to create worker pool: {0}")]
  WorkerPool(#[from] rayon::ThreadPoolBuildError),

  /// Free-form failure reported by a builder.
  #[error("{0}")]
  Failed(String),
}

impl BuildError {
  /// Create an I/O error with path context
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  /// Attach the failing builder's name to an error.
  pub fn builder_failed(builder: impl ToString, source: BuildError) -> Self {
    Self::BuilderFailed {
      builder: builder.to_string(),
      source: Box::new(source),
    }
  }
}

/// Outcome of the last [`BuildContext::run`](super::BuildContext::run) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  /// `run` has not been called yet.
  NotRun,
  /// Every scheduled builder executed.
  Completed,
  /// A graph transformation cancelled the run before any builder executed.
  Cancelled,
  /// The graph had a cycle; nothing executed.
  Cyclic,
  /// A builder failed and the remaining schedule was abandoned.
  Failed,
}
