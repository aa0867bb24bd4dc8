use std::fmt;

use thiserror::Error;

use super::registry::BuilderRegistry;
use crate::build::BuilderRef;

#[derive(Debug, Error)]
pub enum TargetError {
  #[error("invalid build target '{0}': expected 'Module' or 'Module.Project'")]
  Invalid(String),

  #[error("unknown module '{0}'")]
  UnknownModule(String),

  #[error("unknown project '{0}'")]
  UnknownProject(String),
}

/// What a build command was asked to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
  /// Every project of the suite.
  Suite,
  Module(String),
  Project { module: String, project: String },
}

/// Builders to add to a context, and the root to prune to.
pub struct TargetSelection {
  pub builders: Vec<BuilderRef>,
  pub root: Option<BuilderRef>,
}

impl BuildTarget {
  pub fn parse(target: Option<&str>) -> Result<Self, TargetError> {
    let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
      return Ok(Self::Suite);
    };

    let invalid = || TargetError::Invalid(target.to_string());
    match target.split_once('.') {
      Some((module, project)) => {
        if module.is_empty() || project.is_empty() || project.contains('.') {
          return Err(invalid());
        }
        Ok(Self::Project {
          module: module.to_string(),
          project: project.to_string(),
        })
      }
      None => Ok(Self::Module(target.to_string())),
    }
  }

  pub fn select(&self, registry: &BuilderRegistry) -> Result<TargetSelection, TargetError> {
    match self {
      Self::Suite => Ok(TargetSelection {
        builders: registry.all_projects(),
        root: None,
      }),
      Self::Module(module) => {
        let builder = registry
          .module_builder(module)
          .ok_or_else(|| TargetError::UnknownModule(module.clone()))?;
        Ok(TargetSelection {
          builders: vec![builder.clone()],
          root: Some(builder),
        })
      }
      Self::Project { module, project } => {
        let uid = format!("{module}.{project}");
        let builder = registry.project(&uid).ok_or(TargetError::UnknownProject(uid))?;
        Ok(TargetSelection {
          builders: vec![builder.clone()],
          root: Some(builder),
        })
      }
    }
  }
}

impl fmt::Display for BuildTarget {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Suite => f.write_str("suite"),
      Self::Module(module) => write!(f, "module {module}"),
      Self::Project { module, project } => write!(f, "project {module}.{project}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_target_forms() {
    assert_eq!(BuildTarget::parse(None).unwrap(), BuildTarget::Suite);
    assert_eq!(BuildTarget::parse(Some("  ")).unwrap(), BuildTarget::Suite);
    assert_eq!(BuildTarget::parse(Some("App")).unwrap(), BuildTarget::Module("App".into()));
    assert_eq!(
      BuildTarget::parse(Some("App.hello")).unwrap(),
      BuildTarget::Project {
        module: "App".into(),
        project: "hello".into()
      }
    );
  }

  #[test]
  fn rejects_malformed_targets() {
    for target in ["App.", ".hello", "a.b.c"] {
      assert!(matches!(BuildTarget::parse(Some(target)), Err(TargetError::Invalid(_))), "{target}");
    }
  }
}
