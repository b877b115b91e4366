//! The node graph.
//!
//! [`NodeGraph`] is the exclusive owner of every [`Node`] in a session. Nodes live in an
//! arena indexed by [`NodeId`] (creation order), with a `BTreeMap` from canonical name to
//! id for lookup. A `petgraph` mirror of the edges is kept alongside the arena so that
//! every new edge can be checked for cycles before it is accepted.
//!
//! Path-like node names are cleaned against the graph's working directory before they
//! become identities, so `./a.cpp` and `a.cpp` name the same node.

use std::collections::BTreeMap;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::trace;

use crate::node::{
  CopyFileNode, DepKind, Dependency, DirectoryListNode, ExecNode, Node, NodeId, NodeKind, NodeType, ObjectNode,
  ToolNode,
};
use crate::util::path::{PathStyle, clean_path};

/// Errors raised while declaring nodes and edges. All of them are fatal configuration
/// errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("node '{name}' already exists as {existing}, cannot redeclare it as {requested}")]
  TypeConflict {
    name: String,
    existing: NodeType,
    requested: NodeType,
  },

  #[error("dependency from '{from}' on '{to}' would create a cycle")]
  Cycle { from: String, to: String },

  #[error("node '{0}' cannot depend on itself")]
  SelfDependency(String),

  #[error("unknown node {0}")]
  UnknownNode(NodeId),

  #[error("duplicate node name '{0}'")]
  DuplicateName(String),

  #[error("dependency graph contains a cycle")]
  CycleDetected,
}

/// Arena of nodes plus name index and edge mirror.
#[derive(Debug, Clone)]
pub struct NodeGraph {
  working_dir: String,
  nodes: Vec<Node>,
  by_name: BTreeMap<String, NodeId>,
  /// Edge `dependency -> dependent`; petgraph indices equal arena indices.
  edges: DiGraph<(), ()>,
}

impl NodeGraph {
  /// An empty graph resolving relative names against `working_dir`.
  pub fn new(working_dir: impl Into<String>) -> Self {
    Self {
      working_dir: working_dir.into(),
      nodes: Vec::new(),
      by_name: BTreeMap::new(),
      edges: DiGraph::new(),
    }
  }

  /// Rebuild a graph from nodes in creation order (used by the database loader).
  ///
  /// Dependencies may point forward or backward in the list; every index must be in
  /// range and the result must be acyclic.
  pub(crate) fn from_nodes(working_dir: impl Into<String>, nodes: Vec<Node>) -> Result<Self, GraphError> {
    let mut graph = Self::new(working_dir);
    for node in &nodes {
      if graph.by_name.contains_key(&node.name) {
        return Err(GraphError::DuplicateName(node.name.clone()));
      }
      let id = NodeId(graph.nodes.len() as u32);
      graph.by_name.insert(node.name.clone(), id);
      graph.nodes.push(Node::new(node.name.clone(), node.kind.clone(), Vec::new()));
      graph.edges.add_node(());
    }

    for (index, node) in nodes.into_iter().enumerate() {
      for dep in &node.dependencies {
        if dep.node.index() >= graph.nodes.len() {
          return Err(GraphError::UnknownNode(dep.node));
        }
        if dep.node.index() == index {
          return Err(GraphError::SelfDependency(node.name.clone()));
        }
        graph
          .edges
          .add_edge(NodeIndex::new(dep.node.index()), NodeIndex::new(index), ());
      }
      let slot = &mut graph.nodes[index];
      slot.dependencies = node.dependencies;
      slot.stamp = node.stamp;
    }

    graph.verify_acyclic()?;
    Ok(graph)
  }

  pub fn working_dir(&self) -> &str {
    &self.working_dir
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Nodes with their ids, in creation order.
  pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
    self
      .nodes
      .iter()
      .enumerate()
      .map(|(i, node)| (NodeId(i as u32), node))
  }

  /// Look a node up by name.
  ///
  /// Names that look like paths (containing a separator or a dot) are also matched in
  /// canonical form, so `src/a.cpp` finds `/work/src/a.cpp`. A bare word such as `all`
  /// only matches exactly and never resolves to a file of that name.
  pub fn find(&self, name: &str) -> Option<NodeId> {
    if let Some(id) = self.by_name.get(name) {
      return Some(*id);
    }
    if !looks_like_path(name) {
      return None;
    }
    self.by_name.get(&self.clean(name)).copied()
  }

  /// Borrow a node.
  ///
  /// # Panics
  ///
  /// Panics when `id` did not come from this graph.
  pub fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.index()]
  }

  pub fn get(&self, id: NodeId) -> Option<&Node> {
    self.nodes.get(id.index())
  }

  pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
    &mut self.nodes[id.index()]
  }

  /// Ids of `id`'s dependencies, optionally restricted to one edge kind.
  pub fn dependency_ids(&self, id: NodeId, kind: Option<DepKind>) -> Vec<NodeId> {
    self
      .node(id)
      .dependencies
      .iter()
      .filter(|d| kind.is_none_or(|k| d.kind == k))
      .map(|d| d.node)
      .collect()
  }

  /// Put every node back to `NotProcessed`.
  pub fn reset_build_state(&mut self) {
    for node in &mut self.nodes {
      node.state = Default::default();
    }
  }

  /// Canonical form of a path-like name.
  pub fn clean(&self, name: &str) -> String {
    clean_path(name, &self.working_dir)
  }

  /// Generic factory.
  ///
  /// Declaring an existing name with the same type returns the existing node untouched;
  /// with a different type it is a [`GraphError::TypeConflict`]. Nodes referenced by the
  /// kind's own fields are added as leading build dependencies when absent.
  pub fn create(&mut self, name: &str, kind: NodeKind, deps: Vec<Dependency>) -> Result<NodeId, GraphError> {
    let requested = kind.node_type();
    let name = if requested.is_path_named() {
      self.clean(name)
    } else {
      name.to_string()
    };

    if let Some(&existing) = self.by_name.get(&name) {
      let existing_type = self.node(existing).node_type();
      if existing_type != requested {
        return Err(GraphError::TypeConflict {
          name,
          existing: existing_type,
          requested,
        });
      }
      return Ok(existing);
    }

    let mut dependencies: Vec<Dependency> = Vec::with_capacity(deps.len() + 2);
    for referenced in kind.referenced_nodes() {
      if !deps.iter().any(|d| d.node == referenced && d.is_build())
        && !dependencies.iter().any(|d| d.node == referenced)
      {
        dependencies.push(Dependency::build(referenced));
      }
    }
    dependencies.extend(deps);

    for dep in &dependencies {
      if self.get(dep.node).is_none() {
        return Err(GraphError::UnknownNode(dep.node));
      }
    }

    let id = NodeId(self.nodes.len() as u32);
    let index = self.edges.add_node(());
    for dep in &dependencies {
      self.edges.add_edge(NodeIndex::new(dep.node.index()), index, ());
    }
    trace!(node = %name, node_type = %requested, deps = dependencies.len(), "created node");
    self.by_name.insert(name.clone(), id);
    self.nodes.push(Node::new(name, kind, dependencies));
    Ok(id)
  }

  pub fn create_file_node(&mut self, path: &str) -> Result<NodeId, GraphError> {
    self.create(path, NodeKind::File, Vec::new())
  }

  pub fn create_compiler_node(&mut self, executable: &str) -> Result<NodeId, GraphError> {
    self.create(executable, NodeKind::Compiler, Vec::new())
  }

  /// Declare a directory listing. The node name is derived from its parameters.
  pub fn create_directory_list_node(
    &mut self,
    path: &str,
    patterns: Vec<String>,
    recursive: bool,
    exclude_paths: Vec<String>,
  ) -> Result<NodeId, GraphError> {
    let mut path = self.clean(path);
    let sep = PathStyle::native().separator();
    if !path.ends_with(sep) {
      path.push(sep);
    }
    let exclude_paths: Vec<String> = exclude_paths.iter().map(|p| self.clean(p)).collect();
    let name = DirectoryListNode::node_name(&path, &patterns, recursive, &exclude_paths);
    let kind = NodeKind::DirectoryList(DirectoryListNode {
      path,
      patterns,
      recursive,
      exclude_paths,
      files: Vec::new(),
    });
    self.create(&name, kind, Vec::new())
  }

  pub fn create_copy_node(&mut self, destination: &str, source: NodeId) -> Result<NodeId, GraphError> {
    self.create(destination, NodeKind::CopyFile(CopyFileNode { source }), Vec::new())
  }

  pub fn create_exec_node(
    &mut self,
    output: &str,
    executable: NodeId,
    args: &str,
    working_dir: &str,
    expected_return_code: i32,
    inputs: &[NodeId],
  ) -> Result<NodeId, GraphError> {
    let working_dir = if working_dir.is_empty() {
      self.working_dir.clone()
    } else {
      self.clean(working_dir)
    };
    let kind = NodeKind::Exec(ExecNode {
      executable,
      args: args.to_string(),
      working_dir,
      expected_return_code,
    });
    self.create(output, kind, build_deps(inputs))
  }

  pub fn create_object_node(
    &mut self,
    output: &str,
    compiler: NodeId,
    source: NodeId,
    args: &str,
  ) -> Result<NodeId, GraphError> {
    let kind = NodeKind::Object(ObjectNode {
      compiler,
      source,
      args: args.to_string(),
    });
    self.create(output, kind, Vec::new())
  }

  pub fn create_library_node(
    &mut self,
    output: &str,
    librarian: &str,
    args: &str,
    inputs: &[NodeId],
  ) -> Result<NodeId, GraphError> {
    self.create(output, NodeKind::Library(tool(librarian, args)), build_deps(inputs))
  }

  pub fn create_dll_node(&mut self, output: &str, linker: &str, args: &str, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
    self.create(output, NodeKind::Dll(tool(linker, args)), build_deps(inputs))
  }

  pub fn create_exe_node(&mut self, output: &str, linker: &str, args: &str, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
    self.create(output, NodeKind::Exe(tool(linker, args)), build_deps(inputs))
  }

  pub fn create_cs_node(&mut self, output: &str, compiler: &str, args: &str, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
    self.create(output, NodeKind::Cs(tool(compiler, args)), build_deps(inputs))
  }

  pub fn create_unity_node(&mut self, output: &str, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
    self.create(output, NodeKind::Unity, build_deps(inputs))
  }

  pub fn create_alias_node(&mut self, name: &str, targets: &[NodeId]) -> Result<NodeId, GraphError> {
    self.create(name, NodeKind::Alias, build_deps(targets))
  }

  /// Add an edge `id -> dep`.
  ///
  /// Self references and edges that would close a cycle are rejected. Adding an edge
  /// that already exists with the same kind is a no-op.
  pub fn add_dependency(&mut self, id: NodeId, dep: NodeId, kind: DepKind) -> Result<(), GraphError> {
    if self.get(id).is_none() {
      return Err(GraphError::UnknownNode(id));
    }
    if self.get(dep).is_none() {
      return Err(GraphError::UnknownNode(dep));
    }
    if id == dep {
      return Err(GraphError::SelfDependency(self.node(id).name.clone()));
    }
    if self.node(id).dependencies.iter().any(|d| d.node == dep && d.kind == kind) {
      return Ok(());
    }
    // `dep` must not already (transitively) depend on `id`.
    if has_path_connecting(
      &self.edges,
      NodeIndex::new(id.index()),
      NodeIndex::new(dep.index()),
      None,
    ) {
      return Err(GraphError::Cycle {
        from: self.node(id).name.clone(),
        to: self.node(dep).name.clone(),
      });
    }

    self
      .edges
      .add_edge(NodeIndex::new(dep.index()), NodeIndex::new(id.index()), ());
    let edge = match kind {
      DepKind::Build => Dependency::build(dep),
      DepKind::Weak => Dependency::weak(dep),
    };
    self.node_mut(id).dependencies.push(edge);
    Ok(())
  }

  /// Whole-graph cycle check.
  pub fn verify_acyclic(&self) -> Result<(), GraphError> {
    toposort(&self.edges, None).map_err(|_| GraphError::CycleDetected)?;
    Ok(())
  }
}

fn build_deps(ids: &[NodeId]) -> Vec<Dependency> {
  let mut deps: Vec<Dependency> = Vec::with_capacity(ids.len());
  for &id in ids {
    if !deps.iter().any(|d| d.node == id) {
      deps.push(Dependency::build(id));
    }
  }
  deps
}

fn tool(executable: &str, args: &str) -> ToolNode {
  ToolNode {
    tool: executable.to_string(),
    args: args.to_string(),
  }
}

fn looks_like_path(name: &str) -> bool {
  name.contains(['/', '\\', '.'])
}
