//! Scheduling, pruning and caching behaviour of `BuildContext`.

use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bari_lib::build::{
  BuildCache, BuildContext, BuildError, Builder, BuilderRef, Dependency, Edge, FileBuildCache, MemoryBuildCache,
  OutputSet, ReferenceDependency, RunStatus, TargetRelativePath, WeakBuilderRef,
};

type Log = Arc<Mutex<Vec<String>>>;

struct TestBuilder {
  name: String,
  outputs: Vec<String>,
  prerequisites: Mutex<Vec<WeakBuilderRef>>,
  cacheable: bool,
  fail: bool,
  version: AtomicU32,
  log: Log,
}

impl fmt::Display for TestBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

impl Builder for TestBuilder {
  fn uid(&self) -> String {
    self.name.clone()
  }

  fn prerequisites(&self) -> Vec<BuilderRef> {
    self
      .prerequisites
      .lock()
      .unwrap()
      .iter()
      .filter_map(WeakBuilderRef::upgrade)
      .collect()
  }

  fn dependencies(&self) -> Arc<dyn Dependency> {
    Arc::new(ReferenceDependency::new(format!(
      "{}@{}",
      self.name,
      self.version.load(Ordering::SeqCst)
    )))
  }

  fn cacheable(&self) -> bool {
    self.cacheable
  }

  fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError> {
    // Prerequisites must have run already.
    for prerequisite in ctx.dependencies(self) {
      ctx.results(&*prerequisite)?;
    }
    self.log.lock().unwrap().push(self.name.clone());
    if self.fail {
      return Err(BuildError::Failed(format!("{} exploded", self.name)));
    }
    Ok(self.outputs.iter().map(TargetRelativePath::new).collect())
  }
}

struct Fixture {
  log: Log,
}

impl Fixture {
  fn new() -> Self {
    Self {
      log: Arc::new(Mutex::new(Vec::new())),
    }
  }

  fn builder(&self, name: &str, outputs: &[&str]) -> (BuilderRef, Arc<TestBuilder>) {
    self.make(name, outputs, true, false)
  }

  fn make(&self, name: &str, outputs: &[&str], cacheable: bool, fail: bool) -> (BuilderRef, Arc<TestBuilder>) {
    let builder = Arc::new(TestBuilder {
      name: name.to_string(),
      outputs: outputs.iter().map(|o| o.to_string()).collect(),
      prerequisites: Mutex::new(Vec::new()),
      cacheable,
      fail,
      version: AtomicU32::new(0),
      log: self.log.clone(),
    });
    (BuilderRef::from_arc(builder.clone()), builder)
  }

  fn executed(&self) -> Vec<String> {
    self.log.lock().unwrap().clone()
  }

  fn reset(&self) {
    self.log.lock().unwrap().clear();
  }
}

fn depends_on(dependent: &Arc<TestBuilder>, prerequisite: &BuilderRef) {
  dependent.prerequisites.lock().unwrap().push(prerequisite.downgrade());
}

fn outputs(paths: &[&str]) -> OutputSet {
  paths.iter().map(TargetRelativePath::new).collect()
}

fn memory_context() -> (BuildContext, Arc<MemoryBuildCache>) {
  let cache = Arc::new(MemoryBuildCache::new());
  (BuildContext::new(cache.clone(), "debug"), cache)
}

#[test]
fn prerequisite_runs_before_dependent() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  depends_on(&b_impl, &a);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&b);

  assert_eq!(ctx.run(None, None).unwrap(), outputs(&["a.o", "b.o"]));
  assert_eq!(fx.executed(), vec!["A", "B"]);
  assert_eq!(ctx.results(&*a).unwrap(), outputs(&["a.o"]));
  assert_eq!(ctx.status(), RunStatus::Completed);
}

#[test]
fn cycle_runs_nothing() {
  let fx = Fixture::new();
  let (x, x_impl) = fx.builder("X", &["x.o"]);
  let (y, y_impl) = fx.builder("Y", &["y.o"]);
  depends_on(&x_impl, &y);
  depends_on(&y_impl, &x);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&x);

  assert!(ctx.run(None, None).unwrap().is_empty());
  assert!(fx.executed().is_empty());
  assert_eq!(ctx.status(), RunStatus::Cyclic);
  assert!(matches!(ctx.results(&*x), Err(BuildError::UnexecutedBuilder(_))));
}

#[test]
fn add_builder_is_idempotent() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  let (c, c_impl) = fx.builder("C", &["c.o"]);
  depends_on(&b_impl, &a);
  depends_on(&c_impl, &a);
  depends_on(&c_impl, &b);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&c);
  let edges: Vec<Edge> = ctx.edges().iter().cloned().collect();
  ctx.add_builder(&c);
  ctx.add_builder(&b);

  assert_eq!(ctx.edges().iter().cloned().collect::<Vec<_>>(), edges);
  // three self-edges plus C->A, C->B, B->A
  assert_eq!(edges.len(), 6);
  assert_eq!(ctx.builders().len(), 3);

  ctx.run(None, None).unwrap();
  assert_eq!(fx.executed(), vec!["A", "B", "C"]);
}

#[test]
fn lone_builder_is_not_a_cycle() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (mut ctx, _) = memory_context();
  ctx.add_builder(&a);

  assert!(ctx.contains(&*a));
  assert_eq!(ctx.run(None, None).unwrap(), outputs(&["a.o"]));
}

#[test]
fn root_pruning_ignores_unreachable_cycle() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  let (x, x_impl) = fx.builder("X", &["x.o"]);
  let (y, y_impl) = fx.builder("Y", &["y.o"]);
  let (other, _) = fx.builder("Other", &["other.o"]);
  depends_on(&b_impl, &a);
  depends_on(&x_impl, &y);
  depends_on(&y_impl, &x);

  let (mut ctx, _) = memory_context();
  for builder in [&b, &x, &other] {
    ctx.add_builder(builder);
  }

  assert_eq!(ctx.run(Some(&b), None).unwrap(), outputs(&["a.o", "b.o"]));
  assert_eq!(fx.executed(), vec!["A", "B"]);

  // The whole graph is still cyclic.
  fx.reset();
  assert!(ctx.run(None, None).unwrap().is_empty());
  assert!(fx.executed().is_empty());
  assert!(matches!(ctx.results(&*a), Err(BuildError::UnexecutedBuilder(_))));
}

#[test]
fn cancelling_transformation_stops_before_execution() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let calls = Arc::new(AtomicU32::new(0));

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&a);
  let first = calls.clone();
  ctx.add_transformation(move |_| {
    first.fetch_add(1, Ordering::SeqCst);
    true
  });
  ctx.add_transformation(|_| false);
  let third = calls.clone();
  ctx.add_transformation(move |_| {
    third.fetch_add(100, Ordering::SeqCst);
    true
  });

  assert!(ctx.run(None, None).unwrap().is_empty());
  assert_eq!(ctx.status(), RunStatus::Cancelled);
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(fx.executed().is_empty());
}

#[test]
fn transformation_can_rewrite_edges() {
  let fx = Fixture::new();
  let (x, x_impl) = fx.builder("X", &["x.o"]);
  let (y, y_impl) = fx.builder("Y", &["y.o"]);
  depends_on(&x_impl, &y);
  depends_on(&y_impl, &x);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&x);
  let (from, to) = (y.clone(), x.clone());
  ctx.add_transformation(move |edges| {
    edges.remove(&Edge::new(from.clone(), to.clone()));
    true
  });

  // Y no longer waits for X, so X runs after Y.
  assert_eq!(ctx.run(None, None).unwrap(), outputs(&["x.o", "y.o"]));
  assert_eq!(fx.executed(), vec!["Y", "X"]);
}

#[test]
fn filter_skips_builders() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, _) = fx.builder("B", &["b.o"]);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&a);
  ctx.add_builder(&b);
  let only_a = |builder: &BuilderRef| builder.uid() == "A";

  assert_eq!(ctx.run(None, Some(&only_a)).unwrap(), outputs(&["a.o"]));
  assert!(matches!(ctx.results(&*b), Err(BuildError::UnexecutedBuilder(_))));
}

#[test]
fn unchanged_fingerprint_is_served_from_cache() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  depends_on(&b_impl, &a);
  let cache = Arc::new(MemoryBuildCache::new());

  let mut first = BuildContext::new(cache.clone(), "debug");
  first.add_builder(&b);
  let expected = first.run(None, None).unwrap();
  assert_eq!(cache.len(), 2);

  fx.reset();
  let mut second = BuildContext::new(cache.clone(), "debug");
  second.add_builder(&b);
  assert_eq!(second.run(None, None).unwrap(), expected);
  assert!(fx.executed().is_empty());
  // Served results are still visible to dependents and collaborators.
  assert_eq!(second.results(&*a).unwrap(), outputs(&["a.o"]));
}

#[test]
fn changed_fingerprint_reruns() {
  let fx = Fixture::new();
  let (a, a_impl) = fx.builder("A", &["a.o"]);
  let (b, _) = fx.builder("B", &["b.o"]);
  let cache = Arc::new(MemoryBuildCache::new());

  let mut ctx = BuildContext::new(cache.clone(), "debug");
  ctx.add_builder(&a);
  ctx.add_builder(&b);
  ctx.run(None, None).unwrap();

  fx.reset();
  a_impl.version.fetch_add(1, Ordering::SeqCst);
  ctx.run(None, None).unwrap();
  assert_eq!(fx.executed(), vec!["A"]);
}

#[test]
fn cache_scopes_are_isolated() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let cache = Arc::new(MemoryBuildCache::new());

  for scope in ["debug", "release"] {
    let mut ctx = BuildContext::new(cache.clone(), scope);
    ctx.add_builder(&a);
    ctx.run(None, None).unwrap();
  }
  assert_eq!(fx.executed(), vec!["A", "A"]);
}

#[test]
fn non_cacheable_builder_always_runs() {
  let fx = Fixture::new();
  let (a, _) = fx.make("A", &["a.o"], false, false);
  let (mut ctx, cache) = memory_context();
  ctx.add_builder(&a);

  ctx.run(None, None).unwrap();
  ctx.run(None, None).unwrap();
  assert_eq!(fx.executed(), vec!["A", "A"]);
  assert!(cache.is_empty());
}

#[test]
fn failing_builder_aborts_schedule() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.make("B", &["b.o"], true, true);
  let (c, c_impl) = fx.builder("C", &["c.o"]);
  depends_on(&b_impl, &a);
  depends_on(&c_impl, &b);

  let (mut ctx, cache) = memory_context();
  ctx.add_builder(&c);

  let err = ctx.run(None, None).unwrap_err();
  match &err {
    BuildError::BuilderFailed { builder, .. } => assert_eq!(builder, "B"),
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(fx.executed(), vec!["A", "B"]);
  assert_eq!(ctx.status(), RunStatus::Failed);
  assert!(ctx.results(&*a).is_ok());
  assert!(ctx.results(&*c).is_err());
  // A finished, so its result was cached.
  assert_eq!(cache.len(), 1);
}

#[test]
fn parallel_waves_respect_prerequisites() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  let (c, c_impl) = fx.builder("C", &["c.o"]);
  let (d, d_impl) = fx.builder("D", &["d.o"]);
  depends_on(&b_impl, &a);
  depends_on(&c_impl, &a);
  depends_on(&d_impl, &b);
  depends_on(&d_impl, &c);

  let mut ctx = BuildContext::new(Arc::new(MemoryBuildCache::new()), "debug").with_parallelism(4);
  ctx.add_builder(&d);

  assert_eq!(ctx.run(None, None).unwrap(), outputs(&["a.o", "b.o", "c.o", "d.o"]));
  let executed = fx.executed();
  assert_eq!(executed.len(), 4);
  assert_eq!(executed[0], "A");
  assert_eq!(executed[3], "D");
  assert_eq!(ctx.results(&*b).unwrap(), outputs(&["b.o"]));
  assert_eq!(ctx.results(&*c).unwrap(), outputs(&["c.o"]));
}

#[test]
fn file_cache_persists_between_contexts() {
  let temp = tempfile::TempDir::new().unwrap();
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);

  for _ in 0..2 {
    let cache: Arc<dyn BuildCache> = Arc::new(FileBuildCache::new(temp.path().join("cache")));
    let mut ctx = BuildContext::new(cache, "debug");
    ctx.add_builder(&a);
    assert_eq!(ctx.run(None, None).unwrap(), outputs(&["a.o"]));
  }
  assert_eq!(fx.executed(), vec!["A"]);
}

#[test]
fn statistics_cover_both_monitors() {
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (mut ctx, _) = memory_context();
  ctx.add_builder(&a);
  ctx.run(None, None).unwrap();

  let stats: Vec<_> = ctx
    .statistics()
    .snapshot()
    .into_iter()
    .map(|stat| (stat.name, stat.uid, stat.invocations))
    .collect();
  assert_eq!(
    stats,
    vec![("A".to_string(), "A".to_string(), 1), ("cached A".to_string(), "A".to_string(), 1)]
  );
}

#[test]
fn dump_writes_every_stage() {
  let temp = tempfile::TempDir::new().unwrap();
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  let (other, _) = fx.builder("Other", &["other.o"]);
  depends_on(&b_impl, &a);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&b);
  ctx.add_builder(&other);
  ctx.add_transformation(|_| true);

  ctx
    .dump(|stage| fs::File::create(temp.path().join(format!("builders.{stage}.dot"))), Some(&b))
    .unwrap();

  let read = |stage: &str| fs::read_to_string(temp.path().join(format!("builders.{stage}.dot"))).unwrap();
  assert!(read("original").contains("\"B\" -> \"A\";"));
  assert!(read("original").contains("\"Other\";"));
  assert!(read("step1").contains("rankdir=RL;"));
  let last = read("final");
  assert!(last.contains("\"B\" -> \"A\";"));
  assert!(!last.contains("Other"));
  assert!(fx.executed().is_empty());
}

#[test]
fn dump_skips_cancelling_step_but_writes_final() {
  let temp = tempfile::TempDir::new().unwrap();
  let fx = Fixture::new();
  let (a, _) = fx.builder("A", &["a.o"]);
  let (b, b_impl) = fx.builder("B", &["b.o"]);
  depends_on(&b_impl, &a);

  let (mut ctx, _) = memory_context();
  ctx.add_builder(&b);
  ctx.add_transformation(|_| true);
  ctx.add_transformation(|_| false);
  ctx.add_transformation(|_| panic!("runs after a cancelling transformation"));

  let mut stages = Vec::new();
  ctx
    .dump(
      |stage| {
        stages.push(stage.to_string());
        fs::File::create(temp.path().join(format!("builders.{stage}.dot")))
      },
      None,
    )
    .unwrap();

  assert_eq!(stages, vec!["original", "step1", "final"]);
  let last = fs::read_to_string(temp.path().join("builders.final.dot")).unwrap();
  assert!(last.contains("\"B\" -> \"A\";"));
  assert!(fx.executed().is_empty());
}
