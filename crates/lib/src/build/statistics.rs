//! Per-builder timing statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use super::builder::{Builder, BuilderRef};
use super::context::BuildContext;
use super::dependency::Dependency;
use super::path::OutputSet;
use super::types::BuildError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuilderStat {
  /// Display name; decorators show up as e.g. `cached App.hello`.
  pub name: String,
  pub uid: String,
  pub invocations: u32,
  #[serde(with = "duration_millis")]
  pub total: Duration,
}

mod duration_millis {
  use std::time::Duration;

  use serde::Serializer;

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(value.as_millis())
  }
}

/// Accumulates invocation counts and wall time per builder.
///
/// Entries are keyed by uid and name together: the monitors inside and
/// outside the cache decorator share a uid but not a name, and distinct
/// builders may share a name but not a uid.
#[derive(Debug, Default)]
pub struct BuilderStatistics {
  entries: Mutex<BTreeMap<(String, String), BuilderStat>>,
}

impl BuilderStatistics {
  pub fn record(&self, uid: &str, name: &str, elapsed: Duration) {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    let stat = entries
      .entry((uid.to_string(), name.to_string()))
      .or_insert_with(|| BuilderStat {
        name: name.to_string(),
        uid: uid.to_string(),
        ..BuilderStat::default()
      });
    stat.invocations += 1;
    stat.total += elapsed;
  }

  /// Collected entries, ordered by name then uid.
  pub fn snapshot(&self) -> Vec<BuilderStat> {
    let mut stats: Vec<BuilderStat> = self
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .values()
      .cloned()
      .collect();
    stats.sort_by(|a, b| (&a.name, &a.uid).cmp(&(&b.name, &b.uid)));
    stats
  }

  pub fn clear(&self) {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
  }

  /// Log collected statistics.
  pub fn dump(&self) {
    let entries = self.snapshot();
    let mut total = Duration::ZERO;
    let mut invocations = 0;
    for stat in &entries {
      debug!(
        builder = %stat.name,
        uid = %stat.uid,
        invocations = stat.invocations,
        total_ms = stat.total.as_millis() as u64,
        "builder statistics"
      );
      total += stat.total;
      invocations += stat.invocations;
    }
    info!(
      builders = entries.len(),
      invocations,
      total_ms = total.as_millis() as u64,
      "build statistics"
    );
  }
}

/// Decorator that times every run of the wrapped builder.
pub struct MonitoredBuilder {
  inner: BuilderRef,
  statistics: Arc<BuilderStatistics>,
}

impl MonitoredBuilder {
  pub fn new(inner: BuilderRef, statistics: Arc<BuilderStatistics>) -> Self {
    Self { inner, statistics }
  }
}

impl fmt::Display for MonitoredBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.inner, f)
  }
}

impl Builder for MonitoredBuilder {
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
    self.inner.cacheable()
  }

  fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError> {
    let started = Instant::now();
    let result = self.inner.run(ctx);
    self
      .statistics
      .record(&self.inner.uid(), &self.inner.to_string(), started.elapsed());
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::build::NoDependencies;

  #[test]
  fn record_accumulates_per_builder() {
    let stats = BuilderStatistics::default();
    stats.record("a", "a", Duration::from_millis(5));
    stats.record("a", "a", Duration::from_millis(7));
    stats.record("b", "b", Duration::from_millis(1));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!((snapshot[0].uid.as_str(), snapshot[0].invocations), ("a", 2));
    assert_eq!(snapshot[0].total, Duration::from_millis(12));
    assert_eq!((snapshot[1].uid.as_str(), snapshot[1].invocations), ("b", 1));

    stats.clear();
    assert!(stats.snapshot().is_empty());
  }

  struct Compiler(&'static str);

  impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str("compile")
    }
  }

  impl Builder for Compiler {
    fn uid(&self) -> String {
      self.0.to_string()
    }

    fn dependencies(&self) -> Arc<dyn Dependency> {
      Arc::new(NoDependencies)
    }

    fn run(&self, _ctx: &BuildContext) -> Result<OutputSet, BuildError> {
      Ok(OutputSet::new())
    }
  }

  #[test]
  fn same_name_different_builders_stay_apart() {
    let stats = Arc::new(BuilderStatistics::default());
    let ctx = BuildContext::new(Arc::new(crate::build::MemoryBuildCache::default()), "debug");
    for uid in ["Lib.util", "App.hello", "Lib.util"] {
      let monitored = MonitoredBuilder::new(BuilderRef::new(Compiler(uid)), stats.clone());
      monitored.run(&ctx).unwrap();
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|stat| stat.name == "compile"));
    assert_eq!(
      snapshot.iter().map(|stat| (stat.uid.as_str(), stat.invocations)).collect::<Vec<_>>(),
      vec![("App.hello", 1), ("Lib.util", 2)]
    );
  }
}
