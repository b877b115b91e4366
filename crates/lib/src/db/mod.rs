//! Binary dependency database.
//!
//! # Layout
//!
//! ```text
//! header      magic[3] = "FDB", version[1] = DB_VERSION
//! db_path     string   absolute location the database was saved to
//! sources     u32 count, then per source: path string, signature string
//! settings    cache_path string, environment strings, workers strings
//! nodes       u32 count, then per node in creation order:
//!               type tag u8, name string, stamp u64, type fields,
//!               deps: u32 count, then per dep: index u32, kind u8, stamp u64
//! ```
//!
//! All integers are little-endian; strings are a `u32` length plus UTF-8 bytes. Encoding
//! iterates nothing but ordered vectors, so saving an unchanged graph is byte-stable.
//! Any layout change must bump [`DB_VERSION`]; older databases are discarded, never
//! migrated.

mod codec;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::{DB_HEADER_SIZE, DB_MAGIC, DB_VERSION};
use crate::graph::{GraphError, NodeGraph};
use crate::node::{
  CopyFileNode, DepKind, Dependency, DirectoryListNode, ExecNode, Node, NodeId, NodeKind, NodeType, ObjectNode,
  ToolNode,
};
use crate::settings::Settings;
use crate::util::hash::{ContentHash, Stamp};

use codec::{Reader, Writer};

/// Errors reading or writing the database.
#[derive(Debug, Error)]
pub enum DbError {
  #[error("failed to read database {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to write database {path}: {source}")]
  Write {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("corrupt database: {0}")]
  Corrupt(String),

  #[error("invalid graph in database: {0}")]
  Graph(#[from] GraphError),
}

/// A configuration file the graph was parsed from, with its content signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSignature {
  pub path: String,
  pub signature: ContentHash,
}

/// Everything persisted in one database file.
#[derive(Debug, Clone)]
pub struct Database {
  /// Canonical location the database was saved to.
  pub db_path: String,
  pub sources: Vec<SourceSignature>,
  pub settings: Settings,
  pub graph: NodeGraph,
}

/// Outcome of probing a database file.
#[derive(Debug)]
pub enum DbLoad {
  /// Header and location check out; the contents are usable.
  Loaded(Box<Database>),
  /// No file, or not a database at all.
  Missing,
  /// Written by another format version; nothing was restored.
  VersionMismatch { found: u8 },
  /// Saved at a different location than it was loaded from.
  Relocated { saved_at: String },
}

/// Absolute, symlink-free location of `path`, which need not exist yet.
pub fn canonical_location(path: &Path) -> io::Result<PathBuf> {
  if let Ok(canonical) = dunce::canonicalize(path) {
    return Ok(canonical);
  }
  let parent = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  let file_name = path
    .file_name()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "database path has no file name"))?;
  Ok(dunce::canonicalize(parent)?.join(file_name))
}

/// Serialize the database. Deterministic for identical inputs.
pub fn encode(db_path: &str, sources: &[SourceSignature], settings: &Settings, graph: &NodeGraph) -> Vec<u8> {
  let mut w = Writer::with_header(&DB_MAGIC, DB_VERSION);

  w.str(db_path);

  w.u32(sources.len());
  for source in sources {
    w.str(&source.path);
    w.str(&source.signature.0);
  }

  w.str(&settings.cache_path);
  w.strings(&settings.environment);
  w.strings(&settings.workers);

  w.u32(graph.len());
  for (_, node) in graph.iter() {
    w.u8(node.node_type().tag());
    w.str(node.name());
    w.u64(node.stamp().0);
    encode_kind(&mut w, node.kind());
    w.u32(node.dependencies().len());
    for dep in node.dependencies() {
      w.u32(dep.node.index());
      w.u8(match dep.kind {
        DepKind::Build => 0,
        DepKind::Weak => 1,
      });
      w.u64(dep.stamp.0);
    }
  }

  w.finish()
}

fn encode_kind(w: &mut Writer, kind: &NodeKind) {
  match kind {
    NodeKind::File | NodeKind::Compiler | NodeKind::Alias | NodeKind::Unity => {}
    NodeKind::DirectoryList(d) => {
      w.str(&d.path);
      w.strings(&d.patterns);
      w.bool(d.recursive);
      w.strings(&d.exclude_paths);
      w.strings(&d.files);
    }
    NodeKind::CopyFile(c) => w.u32(c.source.index()),
    NodeKind::Exec(e) => {
      w.u32(e.executable.index());
      w.str(&e.args);
      w.str(&e.working_dir);
      w.i32(e.expected_return_code);
    }
    NodeKind::Object(o) => {
      w.u32(o.compiler.index());
      w.u32(o.source.index());
      w.str(&o.args);
    }
    NodeKind::Library(t) | NodeKind::Dll(t) | NodeKind::Exe(t) | NodeKind::Cs(t) => {
      w.str(&t.tool);
      w.str(&t.args);
    }
  }
}

/// Parse a database image.
///
/// `location` is the canonical path the bytes were read from; a different stored path
/// yields [`DbLoad::Relocated`] before any node is decoded.
pub fn decode(bytes: &[u8], location: &str, working_dir: &str) -> Result<DbLoad, DbError> {
  if bytes.len() < DB_HEADER_SIZE || bytes[..3] != DB_MAGIC {
    debug!(size = bytes.len(), "database header not recognised");
    return Ok(DbLoad::Missing);
  }
  let version = bytes[3];
  if version != DB_VERSION {
    return Ok(DbLoad::VersionMismatch { found: version });
  }

  let mut r = Reader::new(bytes, DB_HEADER_SIZE);
  let db_path = r.string()?;
  if db_path != location {
    return Ok(DbLoad::Relocated { saved_at: db_path });
  }

  let source_count = r.len()?;
  let mut sources = Vec::with_capacity(source_count);
  for _ in 0..source_count {
    let path = r.string()?;
    let signature = ContentHash(r.string()?);
    sources.push(SourceSignature { path, signature });
  }

  let settings = Settings {
    cache_path: r.string()?,
    environment: r.strings()?,
    workers: r.strings()?,
  };

  let node_count = r.len()?;
  let mut nodes = Vec::with_capacity(node_count);
  for _ in 0..node_count {
    nodes.push(decode_node(&mut r, node_count)?);
  }

  if r.remaining() != 0 {
    return Err(DbError::Corrupt(format!("{} trailing bytes", r.remaining())));
  }

  let graph = NodeGraph::from_nodes(working_dir, nodes)?;
  Ok(DbLoad::Loaded(Box::new(Database {
    db_path,
    sources,
    settings,
    graph,
  })))
}

fn decode_node(r: &mut Reader<'_>, node_count: usize) -> Result<Node, DbError> {
  let tag = r.u8()?;
  let node_type = NodeType::from_tag(tag).ok_or_else(|| DbError::Corrupt(format!("unknown node type tag {tag}")))?;
  let name = r.string()?;
  let stamp = Stamp(r.u64()?);

  let node_ref = |r: &mut Reader<'_>| -> Result<NodeId, DbError> {
    let index = r.u32()?;
    if index as usize >= node_count {
      return Err(DbError::Corrupt(format!("node '{name}' references missing node {index}")));
    }
    Ok(NodeId(index))
  };

  let kind = match node_type {
    NodeType::File => NodeKind::File,
    NodeType::Compiler => NodeKind::Compiler,
    NodeType::Alias => NodeKind::Alias,
    NodeType::Unity => NodeKind::Unity,
    NodeType::DirectoryList => NodeKind::DirectoryList(DirectoryListNode {
      path: r.string()?,
      patterns: r.strings()?,
      recursive: r.bool()?,
      exclude_paths: r.strings()?,
      files: r.strings()?,
    }),
    NodeType::CopyFile => NodeKind::CopyFile(CopyFileNode { source: node_ref(r)? }),
    NodeType::Exec => NodeKind::Exec(ExecNode {
      executable: node_ref(r)?,
      args: r.string()?,
      working_dir: r.string()?,
      expected_return_code: r.i32()?,
    }),
    NodeType::Object => NodeKind::Object(ObjectNode {
      compiler: node_ref(r)?,
      source: node_ref(r)?,
      args: r.string()?,
    }),
    NodeType::Library => NodeKind::Library(decode_tool(r)?),
    NodeType::Dll => NodeKind::Dll(decode_tool(r)?),
    NodeType::Exe => NodeKind::Exe(decode_tool(r)?),
    NodeType::Cs => NodeKind::Cs(decode_tool(r)?),
  };

  let dep_count = r.len()?;
  let mut dependencies = Vec::with_capacity(dep_count);
  for _ in 0..dep_count {
    let node = node_ref(r)?;
    let kind = match r.u8()? {
      0 => DepKind::Build,
      1 => DepKind::Weak,
      other => return Err(DbError::Corrupt(format!("unknown dependency kind {other}"))),
    };
    let stamp = Stamp(r.u64()?);
    dependencies.push(Dependency { node, kind, stamp });
  }

  let mut node = Node::new(name, kind, dependencies);
  node.stamp = stamp;
  Ok(node)
}

fn decode_tool(r: &mut Reader<'_>) -> Result<ToolNode, DbError> {
  Ok(ToolNode {
    tool: r.string()?,
    args: r.string()?,
  })
}

/// Read and validate the database at `path`.
pub fn load(path: &Path, working_dir: &str) -> Result<DbLoad, DbError> {
  let bytes = match fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DbLoad::Missing),
    Err(source) => {
      return Err(DbError::Read {
        path: path.display().to_string(),
        source,
      });
    }
  };
  let location = canonical_location(path).map_err(|source| DbError::Read {
    path: path.display().to_string(),
    source,
  })?;
  decode(&bytes, &location.to_string_lossy(), working_dir)
}

/// Write the database to `path` atomically (temp file in the same directory, then
/// persist over the target).
pub fn save(path: &Path, sources: &[SourceSignature], settings: &Settings, graph: &NodeGraph) -> Result<(), DbError> {
  let write_err = |source: io::Error| DbError::Write {
    path: path.display().to_string(),
    source,
  };

  let parent = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  fs::create_dir_all(parent).map_err(write_err)?;

  let location = canonical_location(path).map_err(write_err)?;
  let bytes = encode(&location.to_string_lossy(), sources, settings, graph);

  let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
  temp.write_all(&bytes).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;

  info!(path = %location.display(), nodes = graph.len(), bytes = bytes.len(), "saved dependency graph");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  fn sample_graph(wd: &str) -> NodeGraph {
    let mut graph = NodeGraph::new(wd);
    let cc = graph.create_compiler_node("bin/cc").unwrap();
    let src = graph.create_file_node("src/a.cpp").unwrap();
    let dir = graph
      .create_directory_list_node("src", vec!["*.cpp".to_string()], true, vec!["src/skip".to_string()])
      .unwrap();
    let obj = graph.create_object_node("out/a.o", cc, src, "-c %1 -o %2").unwrap();
    let lib = graph.create_library_node("out/a.lib", "ar", "rcs %2 %1", &[obj]).unwrap();
    let exec = graph.create_exec_node("out/gen.txt", cc, "--gen", "", 3, &[dir]).unwrap();
    let copy = graph.create_copy_node("out/copy.cpp", src).unwrap();
    let unity = graph.create_unity_node("out/unity.cpp", &[dir]).unwrap();
    let all = graph.create_alias_node("all", &[lib, exec, copy, unity]).unwrap();
    graph.add_dependency(lib, exec, DepKind::Weak).unwrap();
    graph.node_mut(obj).stamp = Stamp(42);
    graph.node_mut(obj).dependencies[0].stamp = Stamp(7);
    graph.node_mut(all).stamp = Stamp(u64::MAX);
    graph
  }

  fn sample_settings() -> Settings {
    Settings {
      cache_path: "/cache".to_string(),
      environment: vec!["A=1".to_string()],
      workers: vec!["w1".to_string(), "w2".to_string()],
    }
  }

  fn sources() -> Vec<SourceSignature> {
    vec![SourceSignature {
      path: "/work/forge.json".to_string(),
      signature: hash_bytes(b"{}"),
    }]
  }

  #[test]
  fn saving_twice_is_byte_identical() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let graph = sample_graph(&wd);
    let path = temp.path().join("forge.fdb");

    save(&path, &sources(), &sample_settings(), &graph).unwrap();
    let first = fs::read(&path).unwrap();
    save(&path, &sources(), &sample_settings(), &graph).unwrap();
    let second = fs::read(&path).unwrap();
    assert_eq!(first, second);
    assert_eq!(&first[..3], b"FDB");
    assert_eq!(first[3], DB_VERSION);
  }

  #[test]
  fn load_then_save_reproduces_file() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let path = temp.path().join("forge.fdb");
    save(&path, &sources(), &sample_settings(), &sample_graph(&wd)).unwrap();
    let original = fs::read(&path).unwrap();

    let DbLoad::Loaded(db) = load(&path, &wd).unwrap() else {
      panic!("expected a loaded database");
    };
    assert_eq!(db.sources, sources());
    assert_eq!(db.settings, sample_settings());
    assert_eq!(db.graph.len(), 9);

    save(&path, &db.sources, &db.settings, &db.graph).unwrap();
    assert_eq!(fs::read(&path).unwrap(), original);
  }

  #[test]
  fn loaded_nodes_keep_identity_and_stamps() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let graph = sample_graph(&wd);
    let path = temp.path().join("forge.fdb");
    save(&path, &[], &Settings::default(), &graph).unwrap();

    let DbLoad::Loaded(db) = load(&path, &wd).unwrap() else {
      panic!("expected a loaded database");
    };
    for (id, node) in graph.iter() {
      let restored = db.graph.node(id);
      assert_eq!(restored, node);
      assert_eq!(db.graph.find(node.name()), Some(id));
    }
  }

  #[test]
  fn decremented_version_is_a_mismatch() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let path = temp.path().join("forge.fdb");
    save(&path, &sources(), &sample_settings(), &sample_graph(&wd)).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[3] -= 1;
    fs::write(&path, &bytes).unwrap();

    match load(&path, &wd).unwrap() {
      DbLoad::VersionMismatch { found } => assert_eq!(found, DB_VERSION - 1),
      other => panic!("expected version mismatch, got {other:?}"),
    }
  }

  #[test]
  fn copied_database_is_relocated() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let path = temp.path().join("forge.fdb");
    save(&path, &sources(), &sample_settings(), &sample_graph(&wd)).unwrap();

    let moved = temp.path().join("moved").join("forge.fdb");
    fs::create_dir_all(moved.parent().unwrap()).unwrap();
    fs::copy(&path, &moved).unwrap();

    match load(&moved, &wd).unwrap() {
      DbLoad::Relocated { saved_at } => {
        assert_eq!(saved_at, canonical_location(&path).unwrap().to_string_lossy());
      }
      other => panic!("expected relocation, got {other:?}"),
    }
  }

  #[test]
  fn missing_file_and_bad_magic_are_missing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("forge.fdb");
    assert!(matches!(load(&path, "/").unwrap(), DbLoad::Missing));

    fs::write(&path, b"NOPE and more").unwrap();
    assert!(matches!(load(&path, "/").unwrap(), DbLoad::Missing));

    fs::write(&path, b"FD").unwrap();
    assert!(matches!(load(&path, "/").unwrap(), DbLoad::Missing));
  }

  #[test]
  fn truncated_body_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let path = temp.path().join("forge.fdb");
    save(&path, &sources(), &sample_settings(), &sample_graph(&wd)).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
    assert!(matches!(load(&path, &wd), Err(DbError::Corrupt(_))));
  }

  #[test]
  fn trailing_garbage_is_corrupt() {
    let temp = TempDir::new().unwrap();
    let wd = temp.path().to_string_lossy().to_string();
    let path = temp.path().join("forge.fdb");
    save(&path, &[], &Settings::default(), &NodeGraph::new(wd.clone())).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes.push(0);
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(load(&path, &wd), Err(DbError::Corrupt(_))));
  }

  #[test]
  fn save_creates_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("dir").join("forge.fdb");
    save(&path, &[], &Settings::default(), &NodeGraph::new("/")).unwrap();
    assert!(path.exists());
  }
}
