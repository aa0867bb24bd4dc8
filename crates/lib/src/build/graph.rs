//! Builder graph: the edge set collaborators assemble, and the petgraph
//! graph it is materialized into for scheduling.
//!
//! Edges point from a dependent to its prerequisite. Every builder added to a
//! context also gets a self-edge, which records that the builder exists; self
//! edges are dropped when the graph is materialized.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Control, DfsEvent, depth_first_search};

use super::builder::{BuilderId, BuilderRef};

/// A `(dependent, prerequisite)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
  pub dependent: BuilderRef,
  pub prerequisite: BuilderRef,
}

impl Edge {
  pub fn new(dependent: BuilderRef, prerequisite: BuilderRef) -> Self {
    Self {
      dependent,
      prerequisite,
    }
  }

  pub fn is_self_edge(&self) -> bool {
    self.dependent == self.prerequisite
  }
}

/// Insertion-ordered set of edges.
///
/// Removed edges leave a hole in insertion order so removal is constant
/// time; `endpoints` counts edge ends per builder for membership queries.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
  edges: Vec<Option<Edge>>,
  index: HashMap<Edge, usize>,
  endpoints: HashMap<BuilderId, usize>,
}

impl EdgeSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns `false` if the edge was already present.
  pub fn insert(&mut self, edge: Edge) -> bool {
    if self.index.contains_key(&edge) {
      return false;
    }
    for builder in [edge.dependent.id(), edge.prerequisite.id()] {
      *self.endpoints.entry(builder).or_default() += 1;
    }
    self.index.insert(edge.clone(), self.edges.len());
    self.edges.push(Some(edge));
    true
  }

  pub fn contains(&self, edge: &Edge) -> bool {
    self.index.contains_key(edge)
  }

  pub fn remove(&mut self, edge: &Edge) -> bool {
    let Some(position) = self.index.remove(edge) else {
      return false;
    };
    self.edges[position] = None;
    self.release(edge);
    true
  }

  pub fn retain(&mut self, mut keep: impl FnMut(&Edge) -> bool) {
    let removed: Vec<Edge> = self.iter().filter(|edge| !keep(*edge)).cloned().collect();
    for edge in &removed {
      self.remove(edge);
    }
  }

  fn release(&mut self, edge: &Edge) {
    for builder in [edge.dependent.id(), edge.prerequisite.id()] {
      if let Some(count) = self.endpoints.get_mut(&builder) {
        *count -= 1;
        if *count == 0 {
          self.endpoints.remove(&builder);
        }
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Edge> {
    self.edges.iter().flatten()
  }

  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index.is_empty()
  }

  pub fn clear(&mut self) {
    self.edges.clear();
    self.index.clear();
    self.endpoints.clear();
  }

  /// Whether the builder is the source or target of any edge.
  pub fn contains_builder(&self, builder: BuilderId) -> bool {
    self.endpoints.contains_key(&builder)
  }

  /// Distinct builders in order of first appearance.
  pub fn builders(&self) -> Vec<BuilderRef> {
    let mut seen = HashSet::new();
    let mut builders = Vec::new();
    for edge in self.iter() {
      for builder in [&edge.dependent, &edge.prerequisite] {
        if seen.insert(builder.id()) {
          builders.push(builder.clone());
        }
      }
    }
    builders
  }

  /// Direct prerequisites of a builder, excluding itself.
  pub fn prerequisites_of(&self, builder: BuilderId) -> Vec<BuilderRef> {
    self
      .iter()
      .filter(|edge| edge.dependent.id() == builder && !edge.is_self_edge())
      .map(|edge| edge.prerequisite.clone())
      .collect()
  }

  /// Replace every occurrence of `from` with `to`, merging duplicate edges.
  pub fn substitute(&mut self, from: &BuilderRef, to: &BuilderRef) {
    let replace = |b: &BuilderRef| if b == from { to.clone() } else { b.clone() };
    let edges = std::mem::take(&mut self.edges);
    self.clear();
    for edge in edges.into_iter().flatten() {
      self.insert(Edge::new(replace(&edge.dependent), replace(&edge.prerequisite)));
    }
  }
}

impl<'a> IntoIterator for &'a EdgeSet {
  type Item = &'a Edge;
  type IntoIter = std::iter::Flatten<std::slice::Iter<'a, Option<Edge>>>;

  fn into_iter(self) -> Self::IntoIter {
    self.edges.iter().flatten()
  }
}

/// The schedulable graph materialized from an [`EdgeSet`].
pub struct BuildGraph {
  graph: DiGraph<BuilderRef, ()>,
  nodes: HashMap<BuilderRef, NodeIndex>,
}

impl BuildGraph {
  /// Materialize the edge set. Self-edges keep their builder as a vertex but
  /// contribute no edge.
  pub fn from_edges(edges: &EdgeSet) -> Self {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<BuilderRef, NodeIndex> = HashMap::new();

    for builder in edges.builders() {
      let idx = graph.add_node(builder.clone());
      nodes.insert(builder, idx);
    }
    for edge in edges.iter().filter(|edge| !edge.is_self_edge()) {
      graph.add_edge(nodes[&edge.dependent], nodes[&edge.prerequisite], ());
    }

    Self { graph, nodes }
  }

  pub fn contains(&self, builder: &BuilderRef) -> bool {
    self.nodes.contains_key(builder)
  }

  pub fn node_count(&self) -> usize {
    self.graph.node_count()
  }

  pub fn edge_count(&self) -> usize {
    self.graph.edge_count()
  }

  pub fn builders(&self) -> impl Iterator<Item = &BuilderRef> {
    self.graph.node_weights()
  }

  /// Drop everything not reachable from `root`. Returns `false` if the root
  /// is not part of the graph.
  pub fn retain_reachable_from(&mut self, root: &BuilderRef) -> bool {
    let Some(&start) = self.nodes.get(root) else {
      return false;
    };

    let mut reachable = HashSet::new();
    let mut bfs = Bfs::new(&self.graph, start);
    while let Some(idx) = bfs.next(&self.graph) {
      reachable.insert(idx);
    }

    self.graph = self.graph.filter_map(
      |idx, builder| reachable.contains(&idx).then(|| builder.clone()),
      |_, edge| Some(*edge),
    );
    self.nodes = self
      .graph
      .node_indices()
      .map(|idx| (self.graph[idx].clone(), idx))
      .collect();
    true
  }

  /// Find an edge closing a cycle, as `(dependent, prerequisite)`.
  pub fn find_back_edge(&self) -> Option<(BuilderRef, BuilderRef)> {
    let found = depth_first_search(&self.graph, self.graph.node_indices(), |event| {
      if let DfsEvent::BackEdge(from, to) = event {
        return Control::Break((from, to));
      }
      Control::Continue
    });
    found
      .break_value()
      .map(|(from, to)| (self.graph[from].clone(), self.graph[to].clone()))
  }

  /// Builders with every prerequisite before its dependents.
  ///
  /// Returns `None` for a cyclic graph.
  pub fn topological_order(&self) -> Option<Vec<BuilderRef>> {
    let sorted = toposort(&self.graph, None).ok()?;
    // Edges point at prerequisites, so the sort lists dependents first.
    Some(sorted.into_iter().rev().map(|idx| self.graph[idx].clone()).collect())
  }

  /// Group an order into waves: a builder's wave is one past the latest wave
  /// of its prerequisites, so builders inside a wave are independent.
  pub fn waves(&self, order: &[BuilderRef]) -> Vec<Vec<BuilderRef>> {
    let mut level: HashMap<NodeIndex, usize> = HashMap::new();
    let mut waves: Vec<Vec<BuilderRef>> = Vec::new();

    for builder in order {
      let Some(&idx) = self.nodes.get(builder) else {
        continue;
      };
      let wave = self
        .graph
        .neighbors(idx)
        .filter_map(|prerequisite| level.get(&prerequisite))
        .map(|l| l + 1)
        .max()
        .unwrap_or(0);
      level.insert(idx, wave);
      if waves.len() <= wave {
        waves.resize_with(wave + 1, Vec::new);
      }
      waves[wave].push(builder.clone());
    }

    waves
  }

  pub fn write_dot<W: Write>(&self, out: &mut W) -> io::Result<()> {
    writeln!(out, "digraph G {{")?;
    writeln!(out, "  rankdir=RL;")?;
    for idx in self.graph.node_indices() {
      if self.graph.neighbors_undirected(idx).next().is_none() {
        writeln!(out, "  \"{}\";", escape(&self.graph[idx].to_string()))?;
      }
    }
    for edge in self.graph.raw_edges() {
      writeln!(
        out,
        "  \"{}\" -> \"{}\";",
        escape(&self.graph[edge.source()].to_string()),
        escape(&self.graph[edge.target()].to_string())
      )?;
    }
    writeln!(out, "}}")
  }
}

fn escape(label: &str) -> String {
  label.replace('\\', "\\\\").replace('"', "\\\"")
}
