//! Path splitting.
//!
//! The shell surface addresses everything by a single slash-separated
//! string. Splitting yields the parent segments plus the leaf name that
//! the operation acts on. The literal path `/` is the root itself and
//! keeps `/` as its leaf so callers can recognise it.

use chainfs_error::{ChainFsError, Result};

/// A split path: the parent directory segments and the leaf name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec {
    pub parent: Vec<String>,
    pub leaf: String,
}

impl PathSpec {
    /// Parent segments as string slices, the shape the engine takes.
    #[must_use]
    pub fn parent_refs(&self) -> Vec<&str> {
        self.parent.iter().map(String::as_str).collect()
    }
}

/// Split a raw path on `/`.
///
/// Empty segments from leading, trailing, or doubled slashes are
/// dropped, so `/a//b/` names the same entry as `a/b`. NUL bytes never
/// name anything on the wire and are rejected here.
pub fn split_path(raw: &str) -> Result<PathSpec> {
    if raw.contains('\0') {
        return Err(ChainFsError::Format("NUL byte in path".to_owned()));
    }

    if raw == "/" {
        return Ok(PathSpec {
            parent: Vec::new(),
            leaf: "/".to_owned(),
        });
    }

    let mut segments: Vec<String> = raw
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    let Some(leaf) = segments.pop() else {
        return Err(ChainFsError::Format(format!("empty path {raw:?}")));
    };

    Ok(PathSpec {
        parent: segments,
        leaf,
    })
}
