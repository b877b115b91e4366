//! forge-lib: dependency-graph build engine
//!
//! This crate provides the pieces of an incremental build:
//! - `NodeGraph`: named build nodes and the dependency edges between them
//! - `Database`: the persisted graph, reused while the configuration is unchanged
//! - `Manifest`: the JSON configuration that declares nodes
//! - `Session`: loads or parses the graph, builds targets and saves the result

pub mod config;
pub mod consts;
pub mod db;
pub mod execute;
pub mod graph;
pub mod node;
pub mod session;
pub mod settings;
pub mod util;
