//! Suite object model.
//!
//! A suite is a set of modules, each a set of projects. Projects may reference
//! other projects, or every project of another module; references become
//! prerequisites in the build graph. The model is loaded from `suite.yaml`.

mod manifest;
mod types;

pub use manifest::SuiteManifest;
pub use types::*;
