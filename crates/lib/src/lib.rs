//! bari-lib: the build graph engine and suite model behind `bari`.
//!
//! - `build`: builders, dependency fingerprints, caching and the build context
//! - `model`: suites, modules and projects loaded from `suite.yaml`
//! - `suite`: builders for projects and modules, and target selection
//! - `lock`: advisory locks keeping `build` and `clean` apart

pub mod build;
pub mod consts;
pub mod lock;
pub mod model;
pub mod platform;
pub mod suite;
pub mod util;
