//! The build context: owns the builder graph of one build and executes it.
//!
//! Collaborators add builders (prerequisites are added recursively) and
//! optional graph transformations, then call [`BuildContext::run`]. Running:
//!
//! 1. clears the results of any previous run
//! 2. applies transformations in order; one returning `false` cancels the run
//! 3. materializes the edge set, dropping self-edges
//! 4. prunes to the vertices reachable from the root, if one is given
//! 5. rejects cyclic graphs without executing anything
//! 6. executes builders in topological order, prerequisites first, each one
//!    wrapped in the monitoring and caching decorators
//!
//! Builders read the results of their prerequisites through the context while
//! they run.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};

use rayon::prelude::*;
use tracing::{debug, error, info};

use super::builder::{Builder, BuilderId, BuilderRef, builder_id};
use super::cache::{BuildCache, CachedBuilder};
use super::graph::{BuildGraph, Edge, EdgeSet};
use super::path::{OutputSet, TargetRelativePath};
use super::statistics::{BuilderStatistics, MonitoredBuilder};
use super::types::{BuildError, RunStatus};

/// A graph rewrite applied before scheduling. Returning `false` cancels the run.
pub type Transformation = Box<dyn FnMut(&mut EdgeSet) -> bool + Send + Sync>;

/// Predicate choosing which scheduled builders actually execute.
pub type BuilderFilter<'a> = &'a (dyn Fn(&BuilderRef) -> bool + Sync);

pub struct BuildContext {
  edges: EdgeSet,
  transformations: Vec<Transformation>,
  results: RwLock<HashMap<BuilderId, OutputSet>>,
  cache: Arc<dyn BuildCache>,
  cache_scope: String,
  parallelism: usize,
  status: RunStatus,
  statistics: Arc<BuilderStatistics>,
}

impl BuildContext {
  /// Creates a context storing results in `cache`, under the given scope.
  pub fn new(cache: Arc<dyn BuildCache>, cache_scope: impl Into<String>) -> Self {
    Self {
      edges: EdgeSet::new(),
      transformations: Vec::new(),
      results: RwLock::new(HashMap::new()),
      cache,
      cache_scope: cache_scope.into(),
      parallelism: 1,
      status: RunStatus::NotRun,
      statistics: Arc::new(BuilderStatistics::default()),
    }
  }

  /// Number of builders allowed to run at once. `1` runs strictly serially.
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  pub fn cache_scope(&self) -> &str {
    &self.cache_scope
  }

  /// Adds a builder and, recursively, its prerequisites. Idempotent.
  pub fn add_builder(&mut self, builder: &BuilderRef) {
    let marker = Edge::new(builder.clone(), builder.clone());
    if self.edges.contains(&marker) || self.edges.contains_builder(builder.id()) {
      return;
    }
    self.edges.insert(marker);

    for prerequisite in builder.prerequisites() {
      self.add_builder(&prerequisite);
      self.edges.insert(Edge::new(builder.clone(), prerequisite));
    }
  }

  pub fn add_transformation<F>(&mut self, transformation: F)
  where
    F: FnMut(&mut EdgeSet) -> bool + Send + Sync + 'static,
  {
    self.transformations.push(Box::new(transformation));
  }

  pub fn edges(&self) -> &EdgeSet {
    &self.edges
  }

  /// Runs the builders, or only those reachable from `root`, and returns the
  /// union of their outputs.
  ///
  /// A cancelled or cyclic run returns an empty set; check
  /// [`status`](Self::status) to tell them apart from a run that produced
  /// nothing. A failing builder aborts the remaining schedule.
  pub fn run(&mut self, root: Option<&BuilderRef>, filter: Option<BuilderFilter<'_>>) -> Result<OutputSet, BuildError> {
    self.results.get_mut().unwrap_or_else(PoisonError::into_inner).clear();
    self.statistics.clear();

    let result = self.schedule_and_execute(root, filter);
    self.status = match &result {
      Ok((status, _)) => *status,
      Err(_) => RunStatus::Failed,
    };
    result.map(|(_, outputs)| outputs)
  }

  fn schedule_and_execute(
    &mut self,
    root: Option<&BuilderRef>,
    filter: Option<BuilderFilter<'_>>,
  ) -> Result<(RunStatus, OutputSet), BuildError> {
    for (step, transformation) in self.transformations.iter_mut().enumerate() {
      if !transformation(&mut self.edges) {
        debug!(step = step + 1, "build cancelled by graph transformation");
        return Ok((RunStatus::Cancelled, OutputSet::new()));
      }
    }

    let graph = self.scheduled_graph(root)?;
    if let Some((dependent, prerequisite)) = graph.find_back_edge() {
      error!(%dependent, %prerequisite, "build graph is cyclic, nothing will be built");
      return Ok((RunStatus::Cyclic, OutputSet::new()));
    }
    let Some(order) = graph.topological_order() else {
      error!("build graph is cyclic, nothing will be built");
      return Ok((RunStatus::Cyclic, OutputSet::new()));
    };

    let scheduled: Vec<BuilderRef> = order
      .into_iter()
      .filter(|builder| filter.is_none_or(|keep| keep(builder)))
      .collect();
    debug!(
      order = ?scheduled.iter().map(ToString::to_string).collect::<Vec<_>>(),
      "build order"
    );

    let outputs = if self.parallelism > 1 {
      self.execute_waves(&graph, &scheduled)?
    } else {
      self.execute_serial(&scheduled)?
    };

    self.statistics.dump();
    info!(builders = scheduled.len(), outputs = outputs.len(), "build finished");
    Ok((RunStatus::Completed, outputs))
  }

  fn scheduled_graph(&self, root: Option<&BuilderRef>) -> Result<BuildGraph, BuildError> {
    let mut graph = BuildGraph::from_edges(&self.edges);
    if let Some(root) = root
      && !graph.retain_reachable_from(root)
    {
      return Err(BuildError::UnknownBuilder(root.to_string()));
    }
    Ok(graph)
  }

  fn execute_serial(&self, order: &[BuilderRef]) -> Result<OutputSet, BuildError> {
    let mut outputs = OutputSet::new();
    for builder in order {
      outputs.extend(self.execute(builder)?);
    }
    Ok(outputs)
  }

  fn execute_waves(&self, graph: &BuildGraph, order: &[BuilderRef]) -> Result<OutputSet, BuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.parallelism)
      .build()?;

    let mut outputs = OutputSet::new();
    for (wave, builders) in graph.waves(order).into_iter().enumerate() {
      debug!(wave, builders = builders.len(), "starting wave");
      let results: Vec<Result<OutputSet, BuildError>> =
        pool.install(|| builders.par_iter().map(|builder| self.execute(builder)).collect());
      for result in results {
        outputs.extend(result?);
      }
    }
    Ok(outputs)
  }

  fn execute(&self, builder: &BuilderRef) -> Result<OutputSet, BuildError> {
    let wrapped = self.wrap(builder);
    let outputs = wrapped
      .run(self)
      .map_err(|e| BuildError::builder_failed(builder, e))?;

    debug!(%builder, outputs = outputs.len(), "builder finished");
    self
      .results
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(builder.id(), outputs.clone());
    Ok(outputs)
  }

  /// Wraps a builder for execution: an outer monitor around the cache around
  /// an inner monitor, so timings are recorded with and without cache
  /// overhead. Non-cacheable builders only get one monitor.
  fn wrap(&self, builder: &BuilderRef) -> BuilderRef {
    let monitored = BuilderRef::new(MonitoredBuilder::new(builder.clone(), self.statistics.clone()));
    if !builder.cacheable() {
      return monitored;
    }
    let cached = BuilderRef::new(CachedBuilder::new(monitored, self.cache.clone(), self.cache_scope.clone()));
    BuilderRef::new(MonitoredBuilder::new(cached, self.statistics.clone()))
  }

  /// Outputs recorded for `builder` in the current run.
  pub fn results(&self, builder: &dyn Builder) -> Result<OutputSet, BuildError> {
    self
      .results
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&builder_id(builder))
      .cloned()
      .ok_or_else(|| BuildError::UnexecutedBuilder(builder.to_string()))
  }

  /// Every recorded output of the current run below `dir`.
  pub fn results_in(&self, dir: &TargetRelativePath) -> OutputSet {
    self
      .results
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .flatten()
      .filter(|output| output.is_under(dir))
      .cloned()
      .collect()
  }

  /// Direct prerequisites of `builder` in the graph, excluding itself.
  pub fn dependencies(&self, builder: &dyn Builder) -> Vec<BuilderRef> {
    self.edges.prerequisites_of(builder_id(builder))
  }

  pub fn contains(&self, builder: &dyn Builder) -> bool {
    self.edges.contains_builder(builder_id(builder))
  }

  /// The builder standing in for `builder` after transformations.
  pub fn effective_builder(&self, builder: &BuilderRef) -> Result<BuilderRef, BuildError> {
    if self.edges.contains_builder(builder.id()) {
      Ok(builder.clone())
    } else {
      Err(BuildError::UnknownBuilder(builder.to_string()))
    }
  }

  pub fn builders(&self) -> Vec<BuilderRef> {
    self.edges.builders()
  }

  pub fn status(&self) -> RunStatus {
    self.status
  }

  pub fn statistics(&self) -> &BuilderStatistics {
    &self.statistics
  }

  pub fn describe_dependencies(&self, builder: &BuilderRef) -> String {
    let mut out = format!("{builder}:");
    for line in builder.dependencies().describe().lines() {
      out.push_str("\n  ");
      out.push_str(line);
    }
    out
  }

  /// Writes the graph as it is transformed and pruned, one stream per stage:
  /// `original`, then `step1`, `step2`, ... after each transformation, and
  /// `final` after pruning to `root`.
  ///
  /// A cancelling transformation gets no step of its own and ends the
  /// transformation pass; `final` is still written from the graph as it
  /// stands.
  pub fn dump<W, F>(&mut self, mut open: F, root: Option<&BuilderRef>) -> Result<(), BuildError>
  where
    W: Write,
    F: FnMut(&str) -> io::Result<W>,
  {
    write_stage(&mut open, "original", &BuildGraph::from_edges(&self.edges))?;

    for step in 0..self.transformations.len() {
      if !(self.transformations[step])(&mut self.edges) {
        debug!(step = step + 1, "graph transformations cancelled during dump");
        break;
      }
      write_stage(&mut open, &format!("step{}", step + 1), &BuildGraph::from_edges(&self.edges))?;
    }

    let graph = self.scheduled_graph(root)?;
    write_stage(&mut open, "final", &graph)
  }
}

fn write_stage<W, F>(open: &mut F, stage: &str, graph: &BuildGraph) -> Result<(), BuildError>
where
  W: Write,
  F: FnMut(&str) -> io::Result<W>,
{
  let dump_error = |source| BuildError::Dump {
    stage: stage.to_string(),
    source,
  };
  let mut sink = open(stage).map_err(dump_error)?;
  graph.write_dot(&mut sink).map_err(dump_error)?;
  sink.flush().map_err(dump_error)
}

#[cfg(test)]
mod tests {
  use std::fmt;

  use tracing_test::traced_test;

  use super::*;
  use crate::build::{Dependency, MemoryBuildCache, NoDependencies};

  struct Leaf {
    name: &'static str,
    prerequisites: Vec<BuilderRef>,
  }

  impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.name)
    }
  }

  impl Builder for Leaf {
    fn uid(&self) -> String {
      self.name.to_string()
    }

    fn prerequisites(&self) -> Vec<BuilderRef> {
      self.prerequisites.clone()
    }

    fn dependencies(&self) -> Arc<dyn Dependency> {
      Arc::new(NoDependencies)
    }

    fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError> {
      let mut outputs = OutputSet::from([TargetRelativePath::new(format!("{}.o", self.name))]);
      for prerequisite in ctx.dependencies(self) {
        outputs.extend(ctx.results(&*prerequisite)?);
      }
      Ok(outputs)
    }
  }

  fn leaf(name: &'static str, prerequisites: Vec<BuilderRef>) -> BuilderRef {
    BuilderRef::new(Leaf { name, prerequisites })
  }

  fn context() -> BuildContext {
    BuildContext::new(Arc::new(MemoryBuildCache::new()), "debug")
  }

  #[test]
  fn prerequisites_see_each_other_through_the_context() {
    let a = leaf("a", vec![]);
    let b = leaf("b", vec![a.clone()]);
    let mut ctx = context();
    ctx.add_builder(&b);

    let outputs = ctx.run(None, None).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(ctx.results(&*b).unwrap(), outputs);
    assert_eq!(ctx.dependencies(&*b), vec![a.clone()]);
    assert!(ctx.dependencies(&*a).is_empty());
    assert_eq!(ctx.status(), RunStatus::Completed);
  }

  #[test]
  fn status_before_run() {
    assert_eq!(context().status(), RunStatus::NotRun);
  }

  #[test]
  fn results_in_matches_directory() {
    let a = leaf("a", vec![]);
    let mut ctx = context();
    ctx.add_builder(&a);
    ctx.run(None, None).unwrap();

    assert_eq!(ctx.results_in(&TargetRelativePath::new("")).len(), 1);
    assert!(ctx.results_in(&TargetRelativePath::new("a")).is_empty());
  }

  #[test]
  fn effective_builder_of_unknown_fails() {
    let ctx = context();
    let a = leaf("a", vec![]);
    assert!(matches!(ctx.effective_builder(&a), Err(BuildError::UnknownBuilder(_))));
    assert!(!ctx.contains(&*a));
  }

  #[test]
  fn unknown_root_is_an_error() {
    let mut ctx = context();
    ctx.add_builder(&leaf("a", vec![]));
    let stranger = leaf("stranger", vec![]);
    assert!(matches!(ctx.run(Some(&stranger), None), Err(BuildError::UnknownBuilder(_))));
    assert_eq!(ctx.status(), RunStatus::Failed);
  }

  #[test]
  fn describe_indents_dependency_tree() {
    let ctx = context();
    let a = leaf("a", vec![]);
    assert_eq!(ctx.describe_dependencies(&a), "a:\n  no dependencies");
  }

  #[test]
  #[traced_test]
  fn cycle_added_by_transformation_is_logged() {
    let a = leaf("a", vec![]);
    let b = leaf("b", vec![]);
    let mut ctx = context();
    ctx.add_builder(&a);
    ctx.add_builder(&b);
    let (x, y) = (a.clone(), b.clone());
    ctx.add_transformation(move |edges| {
      edges.insert(Edge::new(x.clone(), y.clone()));
      edges.insert(Edge::new(y.clone(), x.clone()));
      true
    });

    assert!(ctx.run(None, None).unwrap().is_empty());
    assert_eq!(ctx.status(), RunStatus::Cyclic);
    assert!(logs_contain("build graph is cyclic"));
  }

  #[test]
  #[traced_test]
  fn cancellation_is_logged() {
    let mut ctx = context();
    ctx.add_builder(&leaf("a", vec![]));
    ctx.add_transformation(|_| false);

    assert!(ctx.run(None, None).unwrap().is_empty());
    assert!(logs_contain("build cancelled by graph transformation"));
  }
}
