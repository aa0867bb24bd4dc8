//! Host-specific directory resolution.

pub mod paths;
