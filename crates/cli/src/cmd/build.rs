//! Build command implementation.
//!
//! Loads the suite, selects the builders for the requested target and runs
//! them through a build context backed by the goal's file cache.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use bari_lib::build::{BuildContext, BuilderRef, BuilderStat, FileBuildCache, OutputSet, RunStatus};
use bari_lib::lock::{LockHolder, LockMode, SuiteLock};
use bari_lib::model::Suite;
use bari_lib::platform::paths::{cache_dir, target_dir};
use bari_lib::suite::{BuildTarget, BuilderRegistry, TargetSelection};

use crate::output::{
  OutputFormat, format_elapsed, print_builder_statistics, print_json, print_note, print_output, print_run_status,
  print_stat,
};

pub struct BuildOptions {
  pub target: Option<String>,
  pub dump: bool,
  pub jobs: usize,
  pub output: OutputFormat,
  pub verbose: bool,
}

#[derive(Serialize)]
struct BuildReport<'a> {
  suite: &'a str,
  goal: &'a str,
  target: String,
  status: RunStatus,
  outputs: &'a OutputSet,
  statistics: Vec<BuilderStat>,
  duration_ms: u128,
}

pub fn cmd_build(suite_path: &Path, goal: Option<&str>, options: BuildOptions) -> Result<ExitCode> {
  let start = Instant::now();

  let suite = Suite::load(suite_path).with_context(|| format!("Failed to load suite {}", suite_path.display()))?;
  let goal = suite.resolve_goal(goal)?;
  let root = dunce::canonicalize(&suite.root).unwrap_or_else(|_| suite.root.clone());
  let target_root = target_dir(&root);

  let registry = BuilderRegistry::for_suite(&suite, &target_root);
  let target = BuildTarget::parse(options.target.as_deref())?;
  let selection = target.select(&registry)?;
  debug!(suite = %suite.name, %goal, %target, jobs = options.jobs, "building");

  let cache_root = cache_dir(&root, &goal);
  let holder = LockHolder::current("build", goal.as_str(), options.target.as_deref());
  let _lock = SuiteLock::acquire(&root, &cache_root, LockMode::Shared, holder).context("Failed to lock the suite")?;
  let cache = FileBuildCache::new(&cache_root).with_target_root(&target_root);

  let mut ctx = BuildContext::new(Arc::new(cache), goal.as_str()).with_parallelism(options.jobs);
  for builder in &selection.builders {
    ctx.add_builder(builder);
  }

  if options.dump {
    dump_graph(&mut ctx, &selection, &target_root)?;
    return Ok(ExitCode::SUCCESS);
  }

  let outputs = ctx.run(selection.root.as_ref(), None)?;
  let status = ctx.status();
  let statistics = ctx.statistics().snapshot();

  if options.output.is_json() {
    print_json(&BuildReport {
      suite: &suite.name,
      goal: &goal,
      target: target.to_string(),
      status,
      outputs: &outputs,
      statistics,
      duration_ms: start.elapsed().as_millis(),
    })?;
  } else {
    if status == RunStatus::Completed {
      for output in &outputs {
        print_output(output.as_str());
      }
      println!();
    }
    print_run_status(status, &target.to_string());
    if status == RunStatus::Completed {
      print_stat("Goal", &goal);
      print_stat("Outputs", &outputs.len().to_string());
      print_stat("Duration", &format_elapsed(start.elapsed()));
      if options.verbose {
        print_builder_statistics(&statistics);
      }
    }
  }

  if status == RunStatus::Cyclic {
    return Ok(ExitCode::FAILURE);
  }
  Ok(ExitCode::SUCCESS)
}

fn dump_graph(ctx: &mut BuildContext, selection: &TargetSelection, target_root: &Path) -> Result<()> {
  fs::create_dir_all(target_root).with_context(|| format!("Failed to create {}", target_root.display()))?;

  let mut written: Vec<PathBuf> = Vec::new();
  ctx.dump(
    |stage| {
      let path = target_root.join(format!("builders.{stage}.dot"));
      let file = File::create(&path)?;
      written.push(path);
      Ok(BufWriter::new(file))
    },
    selection.root.as_ref(),
  )?;

  for path in &written {
    print_note(&format!("Wrote {}", path.display()));
  }
  println!();

  let described: Vec<&BuilderRef> = match &selection.root {
    Some(root) => vec![root],
    None => selection.builders.iter().collect(),
  };
  for builder in described {
    println!("{}", ctx.describe_dependencies(builder));
  }
  Ok(())
}
