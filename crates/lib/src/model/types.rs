use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::manifest::SuiteManifest;
use crate::platform::paths::project_source_dir;

pub const DEFAULT_GOAL: &str = "debug";

const REFERENCE_SCHEME: &str = "suite://";

#[derive(Debug, Error)]
pub enum ModelError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid name '{0}': names must be non-empty and contain no '.', '/', '\\' or whitespace")]
  InvalidName(String),

  #[error("project {project} references unknown '{reference}'")]
  UnknownReference { project: String, reference: String },

  #[error("project {project} references itself through '{reference}'")]
  SelfReference { project: String, reference: String },

  #[error("unknown goal '{goal}' (available: {available})")]
  UnknownGoal { goal: String, available: String },
}

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTarget {
  /// Every project of a module.
  Module(String),
  /// A single project.
  Project { module: String, project: String },
}

/// A reference from one project to another project or module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
  /// `suite://Module` or `suite://Module/Project`.
  pub uri: String,
  #[serde(skip)]
  pub target: ReferenceTarget,
}

impl Reference {
  fn parse(value: &str) -> Result<Self, ModelError> {
    let (target, uri) = match value.split_once('.') {
      Some((module, project)) => {
        validate_name(module)?;
        validate_name(project)?;
        (
          ReferenceTarget::Project {
            module: module.to_string(),
            project: project.to_string(),
          },
          format!("{REFERENCE_SCHEME}{module}/{project}"),
        )
      }
      None => {
        validate_name(value)?;
        (ReferenceTarget::Module(value.to_string()), format!("{REFERENCE_SCHEME}{value}"))
      }
    };
    Ok(Self { uri, target })
  }
}

#[derive(Debug, Serialize)]
pub struct Project {
  pub name: String,
  pub module: String,
  pub references: Vec<Reference>,
  /// Source directory.
  #[serde(skip)]
  pub root: PathBuf,
}

impl Project {
  /// `Module.Project`, unique within a suite.
  pub fn uid(&self) -> String {
    format!("{}.{}", self.module, self.name)
  }
}

impl fmt::Display for Project {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.module, self.name)
  }
}

#[derive(Debug)]
pub struct Module {
  pub name: String,
  pub projects: Vec<Arc<Project>>,
}

impl Module {
  pub fn project(&self, name: &str) -> Option<&Arc<Project>> {
    self.projects.iter().find(|p| p.name == name)
  }
}

#[derive(Debug)]
pub struct Suite {
  pub name: String,
  /// Directory containing `suite.yaml`.
  pub root: PathBuf,
  pub goals: Vec<String>,
  pub modules: Vec<Module>,
}

impl Suite {
  /// Load and validate a suite manifest file.
  pub fn load(path: &Path) -> Result<Self, ModelError> {
    let content = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let manifest: SuiteManifest = serde_yaml::from_str(&content).map_err(|source| ModelError::Parse {
      path: path.to_path_buf(),
      source,
    })?;

    let root = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };
    let suite = Self::from_manifest(manifest, root)?;
    debug!(suite = %suite.name, path = %path.display(), modules = suite.modules.len(), "loaded suite");
    Ok(suite)
  }

  /// Build a suite from a parsed manifest whose sources live below `root`.
  pub fn from_manifest(manifest: SuiteManifest, root: PathBuf) -> Result<Self, ModelError> {
    validate_name(&manifest.suite)?;
    for goal in &manifest.goals {
      validate_name(goal)?;
    }

    let mut modules = Vec::with_capacity(manifest.modules.len());
    for (module_name, module) in &manifest.modules {
      validate_name(module_name)?;
      let mut projects = Vec::with_capacity(module.projects.len());
      for (project_name, project) in &module.projects {
        validate_name(project_name)?;
        let references = project
          .references
          .iter()
          .map(|r| Reference::parse(r))
          .collect::<Result<Vec<_>, _>>()?;
        projects.push(Arc::new(Project {
          name: project_name.clone(),
          module: module_name.clone(),
          references,
          root: project_source_dir(&root, module_name, project_name),
        }));
      }
      modules.push(Module {
        name: module_name.clone(),
        projects,
      });
    }

    let goals = if manifest.goals.is_empty() {
      vec![DEFAULT_GOAL.to_string()]
    } else {
      manifest.goals
    };

    let suite = Self {
      name: manifest.suite,
      root,
      goals,
      modules,
    };
    suite.validate_references()?;
    Ok(suite)
  }

  fn validate_references(&self) -> Result<(), ModelError> {
    for project in self.projects() {
      for reference in &project.references {
        let (exists, is_self) = match &reference.target {
          ReferenceTarget::Module(module) => (self.module(module).is_some(), module == &project.module),
          ReferenceTarget::Project { module, project: name } => (
            self.project(module, name).is_some(),
            module == &project.module && name == &project.name,
          ),
        };
        if !exists {
          return Err(ModelError::UnknownReference {
            project: project.uid(),
            reference: reference.uri.clone(),
          });
        }
        if is_self {
          return Err(ModelError::SelfReference {
            project: project.uid(),
            reference: reference.uri.clone(),
          });
        }
      }
    }
    Ok(())
  }

  pub fn module(&self, name: &str) -> Option<&Module> {
    self.modules.iter().find(|m| m.name == name)
  }

  pub fn project(&self, module: &str, project: &str) -> Option<&Arc<Project>> {
    self.module(module).and_then(|m| m.project(project))
  }

  pub fn projects(&self) -> impl Iterator<Item = &Arc<Project>> {
    self.modules.iter().flat_map(|m| m.projects.iter())
  }

  /// The requested goal, or the first declared one.
  pub fn resolve_goal(&self, goal: Option<&str>) -> Result<String, ModelError> {
    match goal {
      None => Ok(self.goals.first().cloned().unwrap_or_else(|| DEFAULT_GOAL.to_string())),
      Some(goal) if self.goals.iter().any(|g| g == goal) => Ok(goal.to_string()),
      Some(goal) => Err(ModelError::UnknownGoal {
        goal: goal.to_string(),
        available: self.goals.join(", "),
      }),
    }
  }
}

fn validate_name(name: &str) -> Result<(), ModelError> {
  let invalid = name.is_empty() || name.chars().any(|c| matches!(c, '.' | '/' | '\\') || c.is_whitespace());
  if invalid {
    return Err(ModelError::InvalidName(name.to_string()));
  }
  Ok(())
}
