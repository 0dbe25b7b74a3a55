//! Extension and index-file probing.

use std::path::{Path, PathBuf};

use knit_graph::Runtime;

/// Extensions tried, in order, when a specifier omits one.
pub const EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "jsx", "ts", "tsx", "css", "json"];

/// `base.<ext>` for the first extension that names a file.
///
/// The extension is appended, so `./a.config` probes `a.config.js`.
pub(crate) async fn with_extensions(
    base: &Path,
    extensions: &[&str],
    runtime: &dyn Runtime,
) -> Option<PathBuf> {
    for ext in extensions {
        let mut candidate = base.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if runtime.is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// `base/index.<ext>` for the first extension that names a file.
pub(crate) async fn index_file(
    base: &Path,
    extensions: &[&str],
    runtime: &dyn Runtime,
) -> Option<PathBuf> {
    if !runtime.is_dir(base).await {
        return None;
    }
    for ext in extensions {
        let candidate = base.join(format!("index.{ext}"));
        if runtime.is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// The path itself if it is a file, else extension probing, else an index file.
pub(crate) async fn probe_file(
    base: &Path,
    extensions: &[&str],
    runtime: &dyn Runtime,
) -> Option<PathBuf> {
    if runtime.is_file(base).await {
        return Some(base.to_path_buf());
    }
    if let Some(found) = with_extensions(base, extensions, runtime).await {
        return Some(found);
    }
    index_file(base, extensions, runtime).await
}
