//! Path validation for resolution and output writing.
//!
//! Every path the pipeline reads from or writes to must stay inside a known
//! directory (the project root for sources, the output directory for
//! artifacts). Checks are lexical: paths are cleaned first, then compared
//! component-wise, so `root/../etc` is rejected even if it never touches disk.

use std::path::{Component, Path, PathBuf};

use path_clean::PathClean;
use thiserror::Error;

/// A path escaped the directory it was supposed to stay within.
#[derive(Debug, Clone, Error)]
#[error("path traversal detected: '{}' escapes '{}'", path.display(), root.display())]
pub struct PathTraversalError {
    /// The offending path, after cleaning.
    pub path: PathBuf,
    /// The directory it escaped from.
    pub root: PathBuf,
}

/// Check that `path` (already absolute) lies within `root`.
pub fn validate_path_within_root(path: &Path, root: &Path) -> Result<(), PathTraversalError> {
    let cleaned = path.clean();
    let root = root.clean();

    let escapes = match cleaned.strip_prefix(&root) {
        Ok(relative) => relative
            .components()
            .any(|c| matches!(c, Component::ParentDir)),
        Err(_) => true,
    };

    if escapes {
        return Err(PathTraversalError {
            path: cleaned,
            root,
        });
    }
    Ok(())
}

/// Join `path` onto `root` when relative, clean it, and check it stays inside.
pub fn normalize_and_validate_path(path: &Path, root: &Path) -> Result<PathBuf, PathTraversalError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let cleaned = joined.clean();
    validate_path_within_root(&cleaned, root)?;
    Ok(cleaned)
}
