//! Hashing and stamping utilities.
//!
//! This module provides:
//! - `ContentHash`: a full 64-character SHA-256 used for configuration signatures and
//!   cache keys
//! - `Stamp`: the compact 64-bit signature stored on nodes and dependency edges
//! - `hash_file()` / `hash_bytes()`: content hashing
//! - `file_stamp()`: modification-time stamp of a file

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA256 hash for content verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Opaque build signature of a node.
///
/// Zero means "no stamp": the node was never built, or the file it observes does not
/// exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp(pub u64);

impl Stamp {
  pub const NONE: Stamp = Stamp(0);

  pub fn is_none(self) -> bool {
    self.0 == 0
  }

  /// Fold a sequence of stamps into one, order sensitive.
  pub fn combine<I: IntoIterator<Item = Stamp>>(stamps: I) -> Stamp {
    let mut hasher = Sha256::new();
    for stamp in stamps {
      hasher.update(stamp.0.to_le_bytes());
    }
    Stamp::from_digest(&hasher.finalize())
  }

  /// Stamp derived from arbitrary bytes.
  pub fn of_bytes(data: &[u8]) -> Stamp {
    Stamp::from_digest(&Sha256::digest(data))
  }

  fn from_digest(digest: &[u8]) -> Stamp {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    // Never collide with NONE.
    Stamp(u64::from_le_bytes(bytes).max(1))
  }
}

impl std::fmt::Display for Stamp {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:016x}", self.0)
  }
}

/// Error during file hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },
}

/// Modification-time stamp of a file.
///
/// Returns [`Stamp::NONE`] when the file does not exist or its metadata cannot be read;
/// a missing file is a state, not an error.
pub fn file_stamp(path: &Path) -> Stamp {
  let Ok(metadata) = fs::metadata(path) else {
    return Stamp::NONE;
  };
  let Ok(modified) = metadata.modified() else {
    return Stamp::NONE;
  };
  let nanos = modified
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as u64)
    .unwrap_or_default();
  Stamp(nanos.max(1))
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
///
/// Returns the full 64-character SHA256 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(hex::encode(Sha256::digest(data)))
}
