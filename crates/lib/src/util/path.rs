//! Textual path canonicalization.
//!
//! Every path that becomes part of a node's identity goes through [`clean_path`], so two
//! spellings of the same logical file (`a/./b.c`, `a//b.c`, `x/../a/b.c`) map to one node
//! name. Nothing here touches the file system.

use std::path::Path;

/// Separator and root conventions used when cleaning a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
  /// `/` separated, rooted by a leading `/`.
  Unix,
  /// `\` separated, rooted by a drive letter (`C:`).
  Windows,
}

impl PathStyle {
  /// The style of the platform we were compiled for.
  pub fn native() -> Self {
    if cfg!(windows) { PathStyle::Windows } else { PathStyle::Unix }
  }

  pub fn separator(self) -> char {
    match self {
      PathStyle::Unix => '/',
      PathStyle::Windows => '\\',
    }
  }

  /// Split a path into its root (if rooted) and the remainder.
  ///
  /// On Windows a leading separator without a drive letter is *not* a root: such paths
  /// resolve against the working directory.
  fn split_root(self, path: &str) -> (Option<String>, &str) {
    match self {
      PathStyle::Unix => match path.strip_prefix(['/', '\\']) {
        Some(rest) => (Some("/".to_string()), rest),
        None => (None, path),
      },
      PathStyle::Windows => {
        let bytes = path.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
          (Some(format!("{}:\\", bytes[0] as char)), &path[2..])
        } else {
          (None, path)
        }
      }
    }
  }
}

/// Clean `path` against `working_dir` using the native [`PathStyle`].
pub fn clean_path(path: &str, working_dir: &str) -> String {
  clean_path_with(PathStyle::native(), path, working_dir)
}

/// [`clean_path`] for `Path` arguments.
pub fn clean_path_buf(path: &Path, working_dir: &Path) -> String {
  clean_path(&path.to_string_lossy(), &working_dir.to_string_lossy())
}

/// Clean `path` against `working_dir` using an explicit style.
///
/// Mixed separators are accepted, runs of separators collapse, `.` segments vanish and
/// `..` pops the previous segment (a `..` at the root is dropped). Relative inputs are
/// resolved against `working_dir`, which is cleaned the same way.
pub fn clean_path_with(style: PathStyle, path: &str, working_dir: &str) -> String {
  let mut segments: Vec<&str> = Vec::new();

  let root = match style.split_root(path) {
    (Some(root), rest) => {
      push_segments(&mut segments, rest);
      Some(root)
    }
    (None, rest) => {
      let (wd_root, wd_rest) = style.split_root(working_dir);
      push_segments(&mut segments, wd_rest);
      push_segments(&mut segments, rest);
      wd_root
    }
  };

  let sep = style.separator().to_string();
  let joined = segments.join(&sep);
  match root {
    Some(root) => root + &joined,
    None => joined,
  }
}

fn push_segments<'a>(segments: &mut Vec<&'a str>, rest: &'a str) {
  for segment in rest.split(['/', '\\']) {
    match segment {
      "" | "." => {}
      ".." => {
        segments.pop();
      }
      s => segments.push(s),
    }
  }
}

/// Whether `path` is rooted under `style`.
pub fn is_rooted(style: PathStyle, path: &str) -> bool {
  style.split_root(path).0.is_some()
}
