//! Clean command implementation.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use bari_lib::build::{BuildCache, FileBuildCache};
use bari_lib::lock::{LockHolder, LockMode, SuiteLock};
use bari_lib::model::Suite;
use bari_lib::platform::paths::{cache_dir, target_dir};

use crate::output::{print_done, print_note};

/// Removes the shared target directory and, unless kept, the goal's cache.
///
/// Holds the suite lock exclusively, so no build of any goal is running.
pub fn cmd_clean(suite_path: &Path, goal: Option<&str>, keep_cache: bool) -> Result<ExitCode> {
  let suite = Suite::load(suite_path).with_context(|| format!("Failed to load suite {}", suite_path.display()))?;
  let goal = suite.resolve_goal(goal)?;
  let root = dunce::canonicalize(&suite.root).unwrap_or_else(|_| suite.root.clone());

  let cache_root = cache_dir(&root, &goal);
  let holder = LockHolder::current("clean", goal.as_str(), None);
  let _lock = SuiteLock::acquire(&root, &cache_root, LockMode::Exclusive, holder).context("Failed to lock the suite")?;

  let target_root = target_dir(&root);
  if target_root.exists() {
    std::fs::remove_dir_all(&target_root).with_context(|| format!("Failed to remove {}", target_root.display()))?;
    print_note(&format!("Removed {}", target_root.display()));
  }

  if !keep_cache {
    FileBuildCache::new(&cache_root)
      .clean()
      .with_context(|| format!("Failed to clean cache {}", cache_root.display()))?;
    print_note(&format!("Cleaned cache {}", cache_root.display()));
  }

  print_done(&format!("Cleaned {} ({goal})", suite.name));
  Ok(ExitCode::SUCCESS)
}
