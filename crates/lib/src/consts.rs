//! Crate-wide constants.

/// Application name, used for lock metadata and diagnostics.
pub const APP_NAME: &str = "bari";

/// Length of the truncated hashes used for cache entry directories.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Default suite manifest file name.
pub const SUITE_FILE: &str = "suite.yaml";

/// Directory (under the suite root) receiving build outputs.
pub const TARGET_DIR: &str = "target";

/// Directory (under the suite root) holding per-goal build caches.
pub const CACHE_DIR: &str = "cache";

/// Lock file inside each goal's cache directory.
pub const CACHE_LOCK_FILE: &str = ".lock";

/// Lock file in the suite root guarding the shared target directory.
pub const TARGET_LOCK_FILE: &str = ".target.lock";

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "BARI_CACHE_DIR";

/// Directory (under a suite root) holding project sources.
pub const SOURCE_DIR: &str = "src";

/// Extension of the reference listing written next to each project's outputs.
pub const REFS_EXTENSION: &str = "refs";
