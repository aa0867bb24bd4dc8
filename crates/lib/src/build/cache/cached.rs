use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{BuildCache, CacheEntry, CacheKey};
use crate::build::builder::{Builder, BuilderRef};
use crate::build::context::BuildContext;
use crate::build::dependency::Dependency;
use crate::build::path::OutputSet;
use crate::build::types::BuildError;

/// Decorator serving results from a [`BuildCache`] when the wrapped
/// builder's dependency fingerprint is unchanged.
///
/// Cache failures never fail the build: they are logged and the builder runs.
pub struct CachedBuilder {
  inner: BuilderRef,
  cache: Arc<dyn BuildCache>,
  scope: String,
}

impl CachedBuilder {
  pub fn new(inner: BuilderRef, cache: Arc<dyn BuildCache>, scope: impl Into<String>) -> Self {
    Self {
      inner,
      cache,
      scope: scope.into(),
    }
  }
}

impl fmt::Display for CachedBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "cached {}", self.inner)
  }
}

impl Builder for CachedBuilder {
  fn uid(&self) -> String {
    self.inner.uid()
  }

  fn prerequisites(&self) -> Vec<BuilderRef> {
    self.inner.prerequisites()
  }

  fn dependencies(&self) -> Arc<dyn Dependency> {
    self.inner.dependencies()
  }

  fn cacheable(&self) -> bool {
    true
  }

  fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError> {
    let key = CacheKey::new(&self.scope, self.inner.uid());

    let fingerprint = match self.inner.dependencies().fingerprint() {
      Ok(fingerprint) => fingerprint,
      Err(e) => {
        warn!(builder = %self.inner, error = %e, "failed to fingerprint dependencies, building without cache");
        return self.inner.run(ctx);
      }
    };

    match self.cache.try_get(&key) {
      Ok(Some(entry)) if entry.fingerprint == fingerprint => match self.cache.restore(&entry) {
        Ok(()) => {
          debug!(builder = %self.inner, outputs = entry.outputs.len(), "cache hit");
          return Ok(entry.outputs);
        }
        Err(e) => warn!(builder = %self.inner, error = %e, "failed to restore cached outputs"),
      },
      Ok(Some(_)) => debug!(builder = %self.inner, "dependencies changed"),
      Ok(None) => debug!(builder = %self.inner, "cache miss"),
      Err(e) => warn!(builder = %self.inner, error = %e, "failed to read cache entry"),
    }

    let outputs = self.inner.run(ctx)?;
    let entry = CacheEntry {
      key,
      fingerprint,
      outputs,
    };
    if let Err(e) = self.cache.store(&entry) {
      warn!(builder = %self.inner, error = %e, "failed to store cache entry");
    }
    Ok(entry.outputs)
  }
}
