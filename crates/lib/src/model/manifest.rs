use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw contents of `suite.yaml`, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteManifest {
  /// Suite name.
  pub suite: String,

  /// Build goals; the first one is the default.
  #[serde(default)]
  pub goals: Vec<String>,

  #[serde(default)]
  pub modules: BTreeMap<String, ModuleManifest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleManifest {
  #[serde(default)]
  pub projects: BTreeMap<String, ProjectManifest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectManifest {
  /// `Module` or `Module.Project` names.
  #[serde(default)]
  pub references: Vec<String>,
}
