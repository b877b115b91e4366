//! Build configuration.
//!
//! A configuration is a JSON manifest holding [`Settings`] and an ordered list of target
//! declarations:
//!
//! ```json
//! {
//!   "settings": { "cache_path": "cache", "environment": ["PATH=/usr/bin"], "workers": [] },
//!   "targets": [
//!     { "type": "compiler", "name": "/usr/bin/cc" },
//!     { "type": "object", "name": "out/a.o", "compiler": "/usr/bin/cc", "source": "src/a.cpp",
//!       "args": "-c %1 -o %2" },
//!     { "type": "alias", "name": "all", "targets": ["out/a.o"] }
//!   ]
//! }
//! ```
//!
//! References to names that were never declared become `File` nodes. The `after` list
//! on any declaration adds weak dependencies once every target exists. An empty file is
//! a valid, empty configuration.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::graph::{GraphError, NodeGraph};
use crate::node::{DepKind, NodeId};
use crate::settings::Settings;
use crate::util::hash::{ContentHash, hash_bytes};

/// Errors loading or applying a configuration. All are fatal for initialization.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read configuration {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid configuration {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("target '{target}' references unknown node '{reference}'")]
  UnknownReference { target: String, reference: String },

  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// The deserialized manifest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Manifest {
  pub settings: Settings,
  pub targets: Vec<TargetDecl>,
}

/// One target declaration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetDecl {
  #[serde(flatten)]
  pub kind: TargetKind,
  /// Names this target is ordered after (weak dependencies).
  #[serde(default)]
  pub after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetKind {
  File {
    name: String,
  },
  Compiler {
    name: String,
  },
  DirectoryList {
    /// Label other declarations use to refer to this listing.
    #[serde(default)]
    name: Option<String>,
    path: String,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    exclude_paths: Vec<String>,
  },
  Copy {
    name: String,
    source: String,
  },
  Exec {
    name: String,
    executable: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    working_dir: String,
    #[serde(default)]
    expected_return_code: i32,
    #[serde(default)]
    inputs: Vec<String>,
  },
  Library {
    name: String,
    tool: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    inputs: Vec<String>,
  },
  Object {
    name: String,
    compiler: String,
    source: String,
    #[serde(default)]
    args: String,
  },
  Alias {
    name: String,
    #[serde(default)]
    targets: Vec<String>,
  },
  Dll {
    name: String,
    tool: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    inputs: Vec<String>,
  },
  Exe {
    name: String,
    tool: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    inputs: Vec<String>,
  },
  Unity {
    name: String,
    #[serde(default)]
    inputs: Vec<String>,
  },
  Cs {
    name: String,
    tool: String,
    #[serde(default)]
    args: String,
    #[serde(default)]
    inputs: Vec<String>,
  },
}

impl TargetKind {
  /// The name the declaration was written with, if it has one.
  pub fn name(&self) -> Option<&str> {
    match self {
      TargetKind::DirectoryList { name, .. } => name.as_deref(),
      TargetKind::File { name }
      | TargetKind::Compiler { name }
      | TargetKind::Copy { name, .. }
      | TargetKind::Exec { name, .. }
      | TargetKind::Library { name, .. }
      | TargetKind::Object { name, .. }
      | TargetKind::Alias { name, .. }
      | TargetKind::Dll { name, .. }
      | TargetKind::Exe { name, .. }
      | TargetKind::Unity { name, .. }
      | TargetKind::Cs { name, .. } => Some(name.as_str()),
    }
  }
}

/// A loaded configuration file.
#[derive(Debug, Clone)]
pub struct Config {
  pub path: PathBuf,
  pub signature: ContentHash,
  pub manifest: Manifest,
}

impl Config {
  /// Read and parse the configuration at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
      io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
      _ => ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
      },
    })?;
    let signature = hash_bytes(&bytes);

    let manifest = if bytes.iter().all(u8::is_ascii_whitespace) {
      Manifest::default()
    } else {
      serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
      })?
    };

    debug!(path = %path.display(), targets = manifest.targets.len(), "loaded configuration");
    Ok(Self {
      path: path.to_path_buf(),
      signature,
      manifest,
    })
  }
}

impl Manifest {
  /// Declare every target into `graph`.
  ///
  /// Declarations are applied in order, then `after` edges are added. Any error leaves
  /// the graph partially populated; callers discard it.
  pub fn declare(&self, graph: &mut NodeGraph) -> Result<(), ConfigError> {
    let mut labels: BTreeMap<String, NodeId> = BTreeMap::new();
    let mut declared: Vec<NodeId> = Vec::with_capacity(self.targets.len());

    for decl in &self.targets {
      let id = declare_one(graph, &mut labels, &decl.kind)?;
      if let Some(name) = decl.kind.name() {
        labels.entry(name.to_string()).or_insert(id);
      }
      declared.push(id);
    }

    for (decl, &id) in self.targets.iter().zip(&declared) {
      for reference in &decl.after {
        let dep = lookup(graph, &labels, reference).ok_or_else(|| ConfigError::UnknownReference {
          target: graph.node(id).name().to_string(),
          reference: reference.clone(),
        })?;
        graph.add_dependency(id, dep, DepKind::Weak)?;
      }
    }

    graph.verify_acyclic()?;
    Ok(())
  }
}

fn declare_one(
  graph: &mut NodeGraph,
  labels: &mut BTreeMap<String, NodeId>,
  kind: &TargetKind,
) -> Result<NodeId, ConfigError> {
  let id = match kind {
    TargetKind::File { name } => graph.create_file_node(name)?,
    TargetKind::Compiler { name } => graph.create_compiler_node(name)?,
    TargetKind::DirectoryList {
      name,
      path,
      patterns,
      recursive,
      exclude_paths,
    } => {
      let id = graph.create_directory_list_node(path, patterns.clone(), *recursive, exclude_paths.clone())?;
      if let Some(label) = name {
        labels.insert(label.clone(), id);
      }
      id
    }
    TargetKind::Copy { name, source } => {
      let source = resolve(graph, labels, source)?;
      graph.create_copy_node(name, source)?
    }
    TargetKind::Exec {
      name,
      executable,
      args,
      working_dir,
      expected_return_code,
      inputs,
    } => {
      let executable = resolve(graph, labels, executable)?;
      let inputs = resolve_all(graph, labels, inputs)?;
      graph.create_exec_node(name, executable, args, working_dir, *expected_return_code, &inputs)?
    }
    TargetKind::Object {
      name,
      compiler,
      source,
      args,
    } => {
      let compiler = match lookup(graph, labels, compiler) {
        Some(id) => id,
        None => graph.create_compiler_node(compiler)?,
      };
      let source = resolve(graph, labels, source)?;
      graph.create_object_node(name, compiler, source, args)?
    }
    TargetKind::Library {
      name,
      tool,
      args,
      inputs,
    } => {
      let inputs = resolve_all(graph, labels, inputs)?;
      graph.create_library_node(name, tool, args, &inputs)?
    }
    TargetKind::Dll {
      name,
      tool,
      args,
      inputs,
    } => {
      let inputs = resolve_all(graph, labels, inputs)?;
      graph.create_dll_node(name, tool, args, &inputs)?
    }
    TargetKind::Exe {
      name,
      tool,
      args,
      inputs,
    } => {
      let inputs = resolve_all(graph, labels, inputs)?;
      graph.create_exe_node(name, tool, args, &inputs)?
    }
    TargetKind::Cs {
      name,
      tool,
      args,
      inputs,
    } => {
      let inputs = resolve_all(graph, labels, inputs)?;
      graph.create_cs_node(name, tool, args, &inputs)?
    }
    TargetKind::Unity { name, inputs } => {
      let inputs = resolve_all(graph, labels, inputs)?;
      graph.create_unity_node(name, &inputs)?
    }
    TargetKind::Alias { name, targets } => {
      let targets = resolve_all(graph, labels, targets)?;
      graph.create_alias_node(name, &targets)?
    }
  };
  Ok(id)
}

fn lookup(graph: &NodeGraph, labels: &BTreeMap<String, NodeId>, reference: &str) -> Option<NodeId> {
  labels.get(reference).copied().or_else(|| graph.find(reference))
}

/// A declared node, or a new `File` node for an undeclared path.
fn resolve(graph: &mut NodeGraph, labels: &BTreeMap<String, NodeId>, reference: &str) -> Result<NodeId, GraphError> {
  match lookup(graph, labels, reference) {
    Some(id) => Ok(id),
    None => graph.create_file_node(reference),
  }
}

fn resolve_all(
  graph: &mut NodeGraph,
  labels: &BTreeMap<String, NodeId>,
  references: &[String],
) -> Result<Vec<NodeId>, GraphError> {
  references.iter().map(|r| resolve(graph, labels, r)).collect()
}
