//! Node model.
//!
//! A node is a named unit of build state: a source file, a tool, a generated artifact or
//! a pure grouping. The set of node kinds is closed; per-kind configuration lives in the
//! [`NodeKind`] variant and behaviour is dispatched by matching on it.
//!
//! Nodes never own each other. Dependencies are [`NodeId`] handles into the owning
//! [`NodeGraph`](crate::graph::NodeGraph).

mod types;

pub use types::*;
