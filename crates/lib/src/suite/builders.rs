use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use tracing::trace;
use walkdir::WalkDir;

use crate::build::{
  BuildContext, BuildError, Builder, BuilderRef, Dependency, MultipleDependencies, OutputSet, PropertiesDependency,
  ReferenceDependency, SourceSetDependency, SubtaskDependency, TargetRelativePath,
};
use crate::consts::REFS_EXTENSION;
use crate::model::Project;

/// Builds one project: copies its sources into the target directory and
/// writes a `.refs` file listing the outputs of the projects it references.
pub struct ProjectBuilder {
  project: Arc<Project>,
  target_root: PathBuf,
  /// `(reference uri, builder)` pairs, linked once all builders exist.
  references: OnceLock<Vec<(String, Weak<ProjectBuilder>)>>,
}

impl ProjectBuilder {
  pub fn new(project: Arc<Project>, target_root: impl Into<PathBuf>) -> Self {
    Self {
      project,
      target_root: target_root.into(),
      references: OnceLock::new(),
    }
  }

  pub fn project(&self) -> &Project {
    &self.project
  }

  /// Links the builders of referenced projects. Only the first call has an effect.
  pub(crate) fn link(&self, references: Vec<(String, Weak<ProjectBuilder>)>) {
    let _ = self.references.set(references);
  }

  fn linked(&self) -> impl Iterator<Item = (&str, Arc<ProjectBuilder>)> {
    self
      .references
      .get()
      .into_iter()
      .flatten()
      .filter_map(|(uri, builder)| builder.upgrade().map(|b| (uri.as_str(), b)))
  }

  /// Inputs of this project alone: its sources and its properties.
  fn local_dependencies(&self) -> Arc<dyn Dependency> {
    MultipleDependencies::combine(vec![
      Arc::new(SourceSetDependency::contents(&self.project.root)),
      Arc::new(PropertiesDependency::new(
        self.project.uid(),
        self.project.clone(),
        &["name", "module", "references"],
      )),
    ])
  }

  /// Every project reachable through references, once each, ordered by uid.
  /// Cycles terminate; this project itself is never included.
  fn transitive_references(&self) -> BTreeMap<String, Arc<ProjectBuilder>> {
    let own = self.uid();
    let mut seen = BTreeMap::new();
    let mut pending: Vec<Arc<ProjectBuilder>> = self.linked().map(|(_, builder)| builder).collect();
    while let Some(builder) = pending.pop() {
      let uid = builder.uid();
      if uid == own || seen.contains_key(&uid) {
        continue;
      }
      pending.extend(builder.linked().map(|(_, next)| next));
      seen.insert(uid, builder);
    }
    seen
  }

  fn output_dir(&self) -> TargetRelativePath {
    TargetRelativePath::new(format!("{}/{}", self.project.module, self.project.name))
  }

  fn copy_sources(&self, out_dir: &TargetRelativePath, outputs: &mut OutputSet) -> Result<(), BuildError> {
    let source_root = &self.project.root;
    if !source_root.is_dir() {
      return Ok(());
    }

    for entry in WalkDir::new(source_root).sort_by_file_name() {
      let entry = entry.map_err(|e| BuildError::io(source_root, e.into()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let relative = entry.path().strip_prefix(source_root).unwrap_or(entry.path());
      let output = out_dir.join(TargetRelativePath::from_path(relative).as_str());
      let dest = output.to_path(&self.target_root);
      copy(entry.path(), &dest)?;
      trace!(source = %entry.path().display(), %output, "copied source");
      outputs.insert(output);
    }
    Ok(())
  }
}

fn copy(source: &Path, dest: &Path) -> Result<(), BuildError> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
  }
  fs::copy(source, dest).map_err(|e| BuildError::io(source, e))?;
  Ok(())
}

impl fmt::Display for ProjectBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.project, f)
  }
}

impl Builder for ProjectBuilder {
  fn uid(&self) -> String {
    self.project.uid()
  }

  fn prerequisites(&self) -> Vec<BuilderRef> {
    self
      .linked()
      .map(|(_, builder)| BuilderRef::from_arc(builder as Arc<dyn Builder>))
      .collect()
  }

  /// Own inputs, the reference uris, and the local inputs of every
  /// transitively referenced project. Each project in a shared sub-graph is
  /// fingerprinted once, however many paths lead to it.
  fn dependencies(&self) -> Arc<dyn Dependency> {
    let mut children = vec![self.local_dependencies()];
    let uris: BTreeSet<&str> = self.linked().map(|(uri, _)| uri).collect();
    children.extend(
      uris
        .into_iter()
        .map(|uri| Arc::new(ReferenceDependency::new(uri)) as Arc<dyn Dependency>),
    );
    for (uid, builder) in self.transitive_references() {
      let label = builder.to_string();
      children.push(Arc::new(SubtaskDependency::of(uid, label, builder.local_dependencies())));
    }
    MultipleDependencies::combine(children)
  }

  fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError> {
    let out_dir = self.output_dir();
    let out_path = out_dir.to_path(&self.target_root);
    if out_path.exists() {
      fs::remove_dir_all(&out_path).map_err(|e| BuildError::io(&out_path, e))?;
    }
    fs::create_dir_all(&out_path).map_err(|e| BuildError::io(&out_path, e))?;

    let mut outputs = OutputSet::new();
    self.copy_sources(&out_dir, &mut outputs)?;

    let mut referenced = OutputSet::new();
    for prerequisite in ctx.dependencies(self) {
      referenced.extend(ctx.results(&*prerequisite)?);
    }
    let listing: String = referenced.iter().map(|output| format!("{output}\n")).collect();
    let refs = out_dir.join(format!("{}.{REFS_EXTENSION}", self.project.name));
    let refs_path = refs.to_path(&self.target_root);
    fs::write(&refs_path, listing).map_err(|e| BuildError::io(&refs_path, e))?;
    outputs.insert(refs);

    Ok(outputs)
  }
}

/// Aggregates the projects of one module. Never cached: its output is just
/// the union of its projects' results.
pub struct ModuleBuilder {
  name: String,
  projects: Vec<BuilderRef>,
}

impl ModuleBuilder {
  pub fn new(name: impl Into<String>, projects: Vec<BuilderRef>) -> Self {
    Self {
      name: name.into(),
      projects,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl fmt::Display for ModuleBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "module {}", self.name)
  }
}

impl Builder for ModuleBuilder {
  fn uid(&self) -> String {
    format!("module:{}", self.name)
  }

  fn prerequisites(&self) -> Vec<BuilderRef> {
    self.projects.clone()
  }

  fn dependencies(&self) -> Arc<dyn Dependency> {
    MultipleDependencies::combine(
      self
        .projects
        .iter()
        .map(|project| Arc::new(SubtaskDependency::new(project.clone())) as Arc<dyn Dependency>)
        .collect(),
    )
  }

  fn cacheable(&self) -> bool {
    false
  }

  fn run(&self, ctx: &BuildContext) -> Result<OutputSet, BuildError> {
    let mut outputs = OutputSet::new();
    for project in ctx.dependencies(self) {
      outputs.extend(ctx.results(&*project)?);
    }
    Ok(outputs)
  }
}
