mod build;
mod clean;

pub use build::{BuildOptions, cmd_build};
pub use clean::cmd_clean;
