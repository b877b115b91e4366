//! Shared utilities.
//!
//! Hashing, path canonicalization and test helpers.

pub mod hash;
pub mod path;

#[cfg(test)]
pub mod testutil;
