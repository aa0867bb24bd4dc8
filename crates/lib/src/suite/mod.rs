//! Builders for a suite's projects and modules, and selection of what to build.

mod builders;
mod registry;
mod target;

pub use builders::{ModuleBuilder, ProjectBuilder};
pub use registry::BuilderRegistry;
pub use target::{BuildTarget, TargetError, TargetSelection};
