//! The builder abstraction.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

use super::context::BuildContext;
use super::dependency::Dependency;
use super::path::OutputSet;
use super::types::BuildError;

/// A unit of build work.
///
/// Builders declare the builders they need to run first through
/// [`prerequisites`](Builder::prerequisites), and what their output is derived
/// from through [`dependencies`](Builder::dependencies). The `Display`
/// implementation names the builder in logs and statistics.
pub trait Builder: Send + Sync + fmt::Display {
  /// Identifier unique within a suite. Used as the cache key.
  fn uid(&self) -> String;

  /// Builders whose results this one consumes.
  fn prerequisites(&self) -> Vec<BuilderRef> {
    Vec::new()
  }

  /// What the output depends on.
  fn dependencies(&self) -> Arc<dyn Dependency>;

  /// Whether results may be served from the build cache.
  fn cacheable(&self) -> bool {
    true
  }

  /// Produce the builder's output.
  ///
  /// Results of prerequisites are available through `ctx.results`.
  fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError>;
}

/// Identity of a builder instance.
///
/// Two handles are the same builder exactly when they point at the same
/// allocation; equal uids do not make builders equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuilderId(usize);

/// Identity of a borrowed builder, matching [`BuilderRef::id`] for the same instance.
pub fn builder_id(builder: &dyn Builder) -> BuilderId {
  BuilderId(std::ptr::from_ref(builder).cast::<()>() as usize)
}

/// Shared handle to a builder, compared by identity.
#[derive(Clone)]
pub struct BuilderRef(Arc<dyn Builder>);

impl BuilderRef {
  pub fn new<B: Builder + 'static>(builder: B) -> Self {
    Self(Arc::new(builder))
  }

  pub fn from_arc(builder: Arc<dyn Builder>) -> Self {
    Self(builder)
  }

  pub fn id(&self) -> BuilderId {
    BuilderId(Arc::as_ptr(&self.0).cast::<()>() as usize)
  }

  pub fn downgrade(&self) -> WeakBuilderRef {
    WeakBuilderRef(Arc::downgrade(&self.0))
  }
}

impl Deref for BuilderRef {
  type Target = dyn Builder;

  fn deref(&self) -> &Self::Target {
    self.0.as_ref()
  }
}

impl PartialEq for BuilderRef {
  fn eq(&self, other: &Self) -> bool {
    self.id() == other.id()
  }
}

impl Eq for BuilderRef {}

impl Hash for BuilderRef {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id().hash(state);
  }
}

impl fmt::Debug for BuilderRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "BuilderRef({})", self.0)
  }
}

impl fmt::Display for BuilderRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(self.0.as_ref(), f)
  }
}

/// Non-owning builder handle, for prerequisite links that may form cycles.
#[derive(Clone)]
pub struct WeakBuilderRef(Weak<dyn Builder>);

impl WeakBuilderRef {
  pub fn upgrade(&self) -> Option<BuilderRef> {
    self.0.upgrade().map(BuilderRef)
  }
}
