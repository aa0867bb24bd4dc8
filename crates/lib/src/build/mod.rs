//! The build graph engine.
//!
//! Builders are units of work that declare the builders they need first and
//! the state their output derives from. A [`BuildContext`] assembles them into
//! a graph, rejects cycles, and executes them in dependency order, consulting
//! a [`BuildCache`] so builders whose dependencies did not change are skipped.
//!
//! # Submodules
//!
//! - [`builder`] - The `Builder` trait and identity handles
//! - [`cache`] - Result caches and the caching decorator
//! - [`context`] - Graph assembly, scheduling and execution
//! - [`dependency`] - Dependencies and their fingerprints
//! - [`graph`] - Edge sets, graph algorithms and DOT output
//! - [`statistics`] - Timing decorator and statistics

pub mod builder;
pub mod cache;
pub mod context;
pub mod dependency;
mod fingerprint;
pub mod graph;
mod path;
pub mod statistics;
mod types;

pub use builder::{Builder, BuilderId, BuilderRef, WeakBuilderRef, builder_id};
pub use cache::{BuildCache, CacheEntry, CacheError, CacheKey, CachedBuilder, FileBuildCache, MemoryBuildCache};
pub use context::{BuildContext, BuilderFilter, Transformation};
pub use dependency::{
  Dependency, DependencyError, MultipleDependencies, NoDependencies, PropertiesDependency, ReferenceDependency,
  SourceSetDependency, SourceSetMode, SubtaskDependency,
};
pub use fingerprint::Fingerprint;
pub use graph::{Edge, EdgeSet};
pub use path::{OutputSet, TargetRelativePath};
pub use statistics::{BuilderStat, BuilderStatistics, MonitoredBuilder};
pub use types::*;
