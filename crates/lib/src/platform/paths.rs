//! Directory layout of a suite.
//!
//! ```text
//! <suite root>/
//! ├── suite.yaml
//! ├── src/<module>/<project>/...   # project sources
//! ├── target/                      # build outputs
//! └── cache/<goal>/                # persistent build cache, one namespace per goal
//! ```

use std::path::{Path, PathBuf};

use crate::consts::{CACHE_DIR, CACHE_DIR_ENV, SOURCE_DIR, TARGET_DIR};

/// Returns the directory receiving build outputs.
pub fn target_dir(suite_root: &Path) -> PathBuf {
  suite_root.join(TARGET_DIR)
}

/// Returns the source directory of a project.
pub fn project_source_dir(suite_root: &Path, module: &str, project: &str) -> PathBuf {
  suite_root.join(SOURCE_DIR).join(module).join(project)
}

/// Returns the root of all goal caches.
///
/// `BARI_CACHE_DIR` takes precedence over `<suite root>/cache`.
pub fn cache_root(suite_root: &Path) -> PathBuf {
  std::env::var(CACHE_DIR_ENV)
    .ok()
    .filter(|value| !value.is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| suite_root.join(CACHE_DIR))
}

/// Returns the cache directory of a single build goal.
pub fn cache_dir(suite_root: &Path, goal: &str) -> PathBuf {
  cache_root(suite_root).join(goal)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  fn target_and_source_dirs_are_under_suite_root() {
    let root = Path::new("/work/suite");
    assert_eq!(target_dir(root), PathBuf::from("/work/suite/target"));
    assert_eq!(
      project_source_dir(root, "Lib", "util"),
      PathBuf::from("/work/suite/src/Lib/util")
    );
  }

  #[test]
  #[serial]
  fn cache_dir_defaults_to_suite_root() {
    temp_env::with_var(CACHE_DIR_ENV, None::<&str>, || {
      assert_eq!(
        cache_dir(Path::new("/work/suite"), "debug"),
        PathBuf::from("/work/suite/cache/debug")
      );
    });
  }

  #[test]
  #[serial]
  fn cache_dir_env_takes_precedence() {
    temp_env::with_var(CACHE_DIR_ENV, Some("/custom/cache"), || {
      assert_eq!(
        cache_dir(Path::new("/work/suite"), "release"),
        PathBuf::from("/custom/cache/release")
      );
    });
  }

  #[test]
  #[serial]
  fn empty_cache_dir_env_is_ignored() {
    temp_env::with_var(CACHE_DIR_ENV, Some(""), || {
      assert_eq!(cache_root(Path::new("/work/suite")), PathBuf::from("/work/suite/cache"));
    });
  }
}
