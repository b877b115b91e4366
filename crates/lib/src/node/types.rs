use std::fmt;

use crate::util::hash::Stamp;

/// Stable handle to a node inside its graph (creation-order index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// The closed set of node types.
///
/// The discriminant doubles as the on-disk type tag, so variants must never be
/// reordered without bumping the database version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NodeType {
  File = 0,
  DirectoryList = 1,
  Compiler = 2,
  CopyFile = 3,
  Exec = 4,
  Library = 5,
  Object = 6,
  Alias = 7,
  Dll = 8,
  Exe = 9,
  Unity = 10,
  Cs = 11,
}

impl NodeType {
  pub const ALL: [NodeType; 12] = [
    NodeType::File,
    NodeType::DirectoryList,
    NodeType::Compiler,
    NodeType::CopyFile,
    NodeType::Exec,
    NodeType::Library,
    NodeType::Object,
    NodeType::Alias,
    NodeType::Dll,
    NodeType::Exe,
    NodeType::Unity,
    NodeType::Cs,
  ];

  /// Human-readable label, used in summaries and error messages.
  pub fn label(self) -> &'static str {
    match self {
      NodeType::File => "File",
      NodeType::DirectoryList => "Directory",
      NodeType::Compiler => "Compiler",
      NodeType::CopyFile => "Copy",
      NodeType::Exec => "Exec",
      NodeType::Library => "Library",
      NodeType::Object => "Object",
      NodeType::Alias => "Alias",
      NodeType::Dll => "DLL",
      NodeType::Exe => "Exe",
      NodeType::Unity => "Unity",
      NodeType::Cs => "C#",
    }
  }

  pub fn tag(self) -> u8 {
    self as u8
  }

  pub fn from_tag(tag: u8) -> Option<Self> {
    NodeType::ALL.get(tag as usize).copied()
  }

  /// Types that only observe the file system and are therefore re-evaluated on every
  /// pass instead of being checked for staleness.
  pub fn always_builds(self) -> bool {
    matches!(self, NodeType::File | NodeType::Compiler | NodeType::DirectoryList)
  }

  /// Whether the node name is a file path (and so gets canonicalized).
  pub fn is_path_named(self) -> bool {
    !matches!(self, NodeType::Alias | NodeType::DirectoryList)
  }
}

impl fmt::Display for NodeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// How a dependency participates in a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
  /// Gates execution and takes part in the staleness check.
  Build,
  /// Traversed (so it gets built and tracked) but never gates or dirties the dependent.
  Weak,
}

/// An edge from a node to one of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  pub node: NodeId,
  pub kind: DepKind,
  /// Stamp of `node` observed when the owning node last built successfully.
  pub stamp: Stamp,
}

impl Dependency {
  pub fn build(node: NodeId) -> Self {
    Self {
      node,
      kind: DepKind::Build,
      stamp: Stamp::NONE,
    }
  }

  pub fn weak(node: NodeId) -> Self {
    Self {
      node,
      kind: DepKind::Weak,
      stamp: Stamp::NONE,
    }
  }

  pub fn is_build(&self) -> bool {
    self.kind == DepKind::Build
  }
}

/// Per-pass progress of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BuildState {
  #[default]
  NotProcessed,
  Building,
  Built,
  Failed,
}

impl BuildState {
  pub fn is_terminal(self) -> bool {
    matches!(self, BuildState::Built | BuildState::Failed)
  }
}

/// Directory enumeration parameters and its last result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListNode {
  /// Canonical directory path.
  pub path: String,
  /// Glob patterns matched against file names; empty matches everything.
  pub patterns: Vec<String>,
  pub recursive: bool,
  /// Canonical paths whose subtrees are skipped.
  pub exclude_paths: Vec<String>,
  /// Files found by the last successful enumeration, sorted.
  pub files: Vec<String>,
}

impl DirectoryListNode {
  /// Canonical node name for a listing: `path|pattern;pattern|recursive|exclude;exclude`.
  pub fn node_name(path: &str, patterns: &[String], recursive: bool, exclude_paths: &[String]) -> String {
    format!("{}|{}|{}|{}", path, patterns.join(";"), recursive, exclude_paths.join(";"))
  }
}

/// A single command invocation producing the node's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecNode {
  pub executable: NodeId,
  pub args: String,
  pub working_dir: String,
  pub expected_return_code: i32,
}

/// Compilation of one source file into one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNode {
  pub compiler: NodeId,
  pub source: NodeId,
  pub args: String,
}

/// Copy of `source` to the node's own path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFileNode {
  pub source: NodeId,
}

/// A tool run over all build dependencies (librarian, linker, C# compiler).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolNode {
  pub tool: String,
  pub args: String,
}

/// Type-specific configuration of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
  File,
  DirectoryList(DirectoryListNode),
  Compiler,
  CopyFile(CopyFileNode),
  Exec(ExecNode),
  Library(ToolNode),
  Object(ObjectNode),
  Alias,
  Dll(ToolNode),
  Exe(ToolNode),
  Unity,
  Cs(ToolNode),
}

impl NodeKind {
  pub fn node_type(&self) -> NodeType {
    match self {
      NodeKind::File => NodeType::File,
      NodeKind::DirectoryList(_) => NodeType::DirectoryList,
      NodeKind::Compiler => NodeType::Compiler,
      NodeKind::CopyFile(_) => NodeType::CopyFile,
      NodeKind::Exec(_) => NodeType::Exec,
      NodeKind::Library(_) => NodeType::Library,
      NodeKind::Object(_) => NodeType::Object,
      NodeKind::Alias => NodeType::Alias,
      NodeKind::Dll(_) => NodeType::Dll,
      NodeKind::Exe(_) => NodeType::Exe,
      NodeKind::Unity => NodeType::Unity,
      NodeKind::Cs(_) => NodeType::Cs,
    }
  }

  /// Nodes referenced by the kind's own fields. The graph makes sure each of these is
  /// also a build dependency.
  pub fn referenced_nodes(&self) -> Vec<NodeId> {
    match self {
      NodeKind::CopyFile(c) => vec![c.source],
      NodeKind::Exec(e) => vec![e.executable],
      NodeKind::Object(o) => vec![o.compiler, o.source],
      _ => Vec::new(),
    }
  }
}

/// A node in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
  pub(crate) name: String,
  pub(crate) kind: NodeKind,
  pub(crate) dependencies: Vec<Dependency>,
  pub(crate) state: BuildState,
  pub(crate) stamp: Stamp,
}

impl Node {
  pub(crate) fn new(name: String, kind: NodeKind, dependencies: Vec<Dependency>) -> Self {
    Self {
      name,
      kind,
      dependencies,
      state: BuildState::NotProcessed,
      stamp: Stamp::NONE,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn node_type(&self) -> NodeType {
    self.kind.node_type()
  }

  pub fn type_label(&self) -> &'static str {
    self.node_type().label()
  }

  pub fn kind(&self) -> &NodeKind {
    &self.kind
  }

  pub fn dependencies(&self) -> &[Dependency] {
    &self.dependencies
  }

  pub fn build_dependencies(&self) -> impl Iterator<Item = &Dependency> {
    self.dependencies.iter().filter(|d| d.is_build())
  }

  pub fn state(&self) -> BuildState {
    self.state
  }

  pub fn stamp(&self) -> Stamp {
    self.stamp
  }

  /// Files discovered by a directory listing; empty for every other kind.
  pub fn files(&self) -> &[String] {
    match &self.kind {
      NodeKind::DirectoryList(d) => &d.files,
      _ => &[],
    }
  }
}
