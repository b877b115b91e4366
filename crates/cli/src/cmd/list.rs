//! Implementation of `forge --list`.
//!
//! Prints every node of the loaded (or freshly parsed) graph with its type and
//! dependency count. Nothing is built and the database is left untouched.

use anyhow::{Context, Result};
use serde::Serialize;

use super::SessionArgs;
use crate::output::{OutputFormat, print_info, print_json};

#[derive(Debug, Serialize)]
struct NodeEntry<'a> {
  name: &'a str,
  node_type: &'static str,
  dependencies: usize,
  stamp: String,
}

pub fn cmd_list(args: &SessionArgs, output: OutputFormat) -> Result<()> {
  let (session, _) = args.open()?;
  let graph = session.graph().context("Session has no graph")?;

  let entries: Vec<_> = graph
    .iter()
    .map(|(_, node)| NodeEntry {
      name: node.name(),
      node_type: node.type_label(),
      dependencies: node.dependencies().len(),
      stamp: node.stamp().to_string(),
    })
    .collect();

  if output.is_json() {
    return print_json(&entries);
  }

  print_info(&format!("{} node(s)", entries.len()));
  for entry in &entries {
    println!("  {:<10} {} ({} deps)", entry.node_type, entry.name, entry.dependencies);
  }
  Ok(())
}
