use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::builders::{ModuleBuilder, ProjectBuilder};
use crate::build::{Builder, BuilderRef};
use crate::model::{ReferenceTarget, Suite};

/// Builders of one suite, created once per command.
///
/// Each project has exactly one builder, so projects shared by several
/// dependents are a single graph node. Project prerequisites are held weakly;
/// the registry owns the builders.
pub struct BuilderRegistry {
  projects: Vec<(String, BuilderRef)>,
  modules: Vec<(String, BuilderRef)>,
}

impl BuilderRegistry {
  pub fn for_suite(suite: &Suite, target_root: &Path) -> Self {
    let mut by_uid: HashMap<String, Arc<ProjectBuilder>> = HashMap::new();
    let mut projects = Vec::new();
    for project in suite.projects() {
      let builder = Arc::new(ProjectBuilder::new(project.clone(), target_root));
      by_uid.insert(project.uid(), builder.clone());
      projects.push((project.uid(), BuilderRef::from_arc(builder)));
    }

    for project in suite.projects() {
      let Some(builder) = by_uid.get(&project.uid()) else {
        continue;
      };
      let mut links = Vec::new();
      for reference in &project.references {
        let targets: Vec<String> = match &reference.target {
          ReferenceTarget::Project { module, project } => vec![format!("{module}.{project}")],
          ReferenceTarget::Module(module) => suite
            .module(module)
            .map(|m| m.projects.iter().map(|p| p.uid()).collect())
            .unwrap_or_default(),
        };
        for uid in targets {
          if let Some(target) = by_uid.get(&uid) {
            links.push((reference.uri.clone(), Arc::downgrade(target)));
          }
        }
      }
      builder.link(links);
    }

    let modules = suite
      .modules
      .iter()
      .map(|module| {
        let members = module
          .projects
          .iter()
          .filter_map(|p| projects.iter().find(|(uid, _)| *uid == p.uid()))
          .map(|(_, builder)| builder.clone())
          .collect();
        (module.name.clone(), BuilderRef::new(ModuleBuilder::new(&module.name, members)))
      })
      .collect();

    Self { projects, modules }
  }

  /// Builder of the project with uid `Module.Project`.
  pub fn project(&self, uid: &str) -> Option<BuilderRef> {
    self
      .projects
      .iter()
      .find(|(candidate, _)| candidate == uid)
      .map(|(_, builder)| builder.clone())
  }

  pub fn all_projects(&self) -> Vec<BuilderRef> {
    self.projects.iter().map(|(_, builder)| builder.clone()).collect()
  }

  pub fn module_projects(&self, module: &str) -> Option<Vec<BuilderRef>> {
    self.module_builder(module).map(|builder| builder.prerequisites())
  }

  pub fn module_builder(&self, module: &str) -> Option<BuilderRef> {
    self
      .modules
      .iter()
      .find(|(name, _)| name == module)
      .map(|(_, builder)| builder.clone())
  }
}
