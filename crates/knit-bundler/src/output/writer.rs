//! Atomic output writing.
//!
//! Every file is first written next to its target with a `.tmp` suffix; only
//! when all of them are on disk are they renamed into place. A failure in
//! either phase removes whatever this call created, so the output directory
//! never holds a partial build. Target names are validated against the output
//! directory before anything is touched.

use std::path::{Path, PathBuf};

use knit_graph::Runtime;
use path_clean::PathClean;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::{Error, Result};

/// How [`write_files`] treats an existing output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Remove the output directory before writing.
    pub clean: bool,
    /// Replace files that already exist. When `false` an existing target is
    /// an [`Error::OutputExists`].
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            clean: false,
            overwrite: true,
        }
    }
}

/// Write `files` (output-relative name, content) below `dir`.
///
/// Returns the absolute paths written, in input order.
pub async fn write_files(
    runtime: &dyn Runtime,
    dir: &Path,
    files: &[(&str, &[u8])],
    options: WriteOptions,
) -> Result<Vec<PathBuf>> {
    let dir = normalize_dir(runtime, dir)?;

    let mut seen = FxHashSet::default();
    let mut targets = Vec::with_capacity(files.len());
    for (filename, content) in files {
        let target = validate_output_path(&dir, filename)?;
        if !seen.insert(target.clone()) {
            return Err(Error::InvalidOutputPath(format!(
                "'{filename}' would be written twice"
            )));
        }
        targets.push((target, *content));
    }

    if options.clean && runtime.exists(&dir) {
        debug!(dir = %dir.display(), "cleaning output directory");
        runtime.remove_dir_all(&dir).await?;
    }

    if !options.overwrite {
        if let Some((existing, _)) = targets.iter().find(|(target, _)| runtime.exists(target)) {
            return Err(Error::OutputExists(format!(
                "'{}' already exists; enable overwrite to replace it",
                existing.display()
            )));
        }
    }

    runtime.create_dir(&dir, true).await?;
    write_atomic(runtime, &targets).await?;
    debug!(dir = %dir.display(), files = targets.len(), "output written");

    Ok(targets.into_iter().map(|(target, _)| target).collect())
}

fn normalize_dir(runtime: &dyn Runtime, dir: &Path) -> Result<PathBuf> {
    let cleaned = dir.clean();
    if cleaned.is_absolute() {
        return Ok(cleaned);
    }
    let cwd = runtime
        .get_cwd()
        .map_err(|e| Error::InvalidOutputPath(format!("cannot resolve '{}': {e}", dir.display())))?;
    Ok(cwd.join(cleaned).clean())
}

/// Join `filename` onto `base_dir`, refusing anything that lands outside it.
pub(crate) fn validate_output_path(base_dir: &Path, filename: &str) -> Result<PathBuf> {
    if filename.contains('\0') {
        return Err(Error::InvalidOutputPath(format!(
            "'{}' contains a null byte",
            filename.escape_debug()
        )));
    }
    if filename.trim().is_empty() {
        return Err(Error::InvalidOutputPath("empty filename".to_string()));
    }

    let full_path = base_dir.join(Path::new(filename).clean()).clean();
    if full_path == base_dir || !full_path.starts_with(base_dir) {
        return Err(Error::InvalidOutputPath(format!(
            "'{}' escapes output directory '{}' (resolved to '{}')",
            filename,
            base_dir.display(),
            full_path.display()
        )));
    }
    Ok(full_path)
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

async fn write_atomic(runtime: &dyn Runtime, targets: &[(PathBuf, &[u8])]) -> Result<()> {
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(targets.len());

    for (target, content) in targets {
        let temp = temp_path(target);
        let written = async {
            if let Some(parent) = target.parent() {
                runtime.create_dir(parent, true).await?;
            }
            runtime.write_file(&temp, content).await
        }
        .await;
        if let Err(err) = written {
            rollback(runtime, &staged, &[]).await;
            return Err(err.into());
        }
        staged.push((temp, target.clone()));
    }

    let mut committed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (index, (temp, target)) in staged.iter().enumerate() {
        if let Err(err) = runtime.rename(temp, target).await {
            rollback(runtime, &staged[index..], &committed).await;
            return Err(err.into());
        }
        committed.push(target.clone());
    }
    Ok(())
}

/// Best effort: we are already failing, so cleanup errors are only logged.
async fn rollback(runtime: &dyn Runtime, staged: &[(PathBuf, PathBuf)], committed: &[PathBuf]) {
    let leftovers = staged.iter().map(|(temp, _)| temp).chain(committed);
    for path in leftovers {
        if runtime.exists(path) {
            if let Err(err) = runtime.remove_file(path).await {
                warn!(path = %path.display(), error = %err, "failed to roll back output file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knit_graph::test_utils::MemoryRuntime;

    #[test]
    fn validate_output_path_accepts_nested_names() {
        let base = Path::new("/tmp/output");
        assert_eq!(
            validate_output_path(base, "assets/logo.1f2e.svg").unwrap(),
            Path::new("/tmp/output/assets/logo.1f2e.svg")
        );
        assert_eq!(
            validate_output_path(base, "./index.html").unwrap(),
            Path::new("/tmp/output/index.html")
        );
    }

    #[test]
    fn validate_output_path_rejects_traversal() {
        let base = Path::new("/tmp/output");
        for name in ["../etc/passwd", "safe/../../../../etc/passwd", "/etc/passwd", ".", "a\0b"] {
            assert!(
                matches!(validate_output_path(base, name), Err(Error::InvalidOutputPath(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn temp_files_keep_the_full_name() {
        assert_eq!(
            temp_path(Path::new("/out/bundle.abc.js")),
            Path::new("/out/bundle.abc.js.tmp")
        );
    }

    #[tokio::test]
    async fn writes_every_file_and_no_temporaries() {
        let runtime = MemoryRuntime::new("/proj");
        let written = write_files(
            &runtime,
            Path::new("dist"),
            &[("bundle.js", b"js"), ("img/a.png", b"png")],
            WriteOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            written,
            vec![PathBuf::from("/proj/dist/bundle.js"), PathBuf::from("/proj/dist/img/a.png")]
        );
        assert_eq!(runtime.file("/proj/dist/img/a.png").as_deref(), Some(&b"png"[..]));
        assert!(runtime.paths().iter().all(|p| !p.to_string_lossy().ends_with(".tmp")));
    }

    #[tokio::test]
    async fn clean_removes_stale_files() {
        let runtime = MemoryRuntime::new("/proj").with_file("/proj/dist/old.js", "stale");
        let options = WriteOptions {
            clean: true,
            overwrite: true,
        };
        write_files(&runtime, Path::new("/proj/dist"), &[("new.js", b"x")], options)
            .await
            .unwrap();

        assert!(runtime.file("/proj/dist/old.js").is_none());
        assert!(runtime.file("/proj/dist/new.js").is_some());
    }

    #[tokio::test]
    async fn refuses_to_overwrite_when_disabled() {
        let runtime = MemoryRuntime::new("/proj").with_file("/proj/dist/a.js", "old");
        let options = WriteOptions {
            clean: false,
            overwrite: false,
        };
        let err = write_files(&runtime, Path::new("/proj/dist"), &[("a.js", b"new")], options)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::OutputExists(_)));
        assert_eq!(runtime.file("/proj/dist/a.js").as_deref(), Some(&b"old"[..]));
    }

    #[tokio::test]
    async fn duplicate_targets_are_rejected_before_writing() {
        let runtime = MemoryRuntime::new("/proj");
        let err = write_files(
            &runtime,
            Path::new("/proj/dist"),
            &[("a.js", b"1"), ("./a.js", b"2")],
            WriteOptions::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::InvalidOutputPath(_)));
        assert!(runtime.file("/proj/dist/a.js").is_none());
    }

    #[tokio::test]
    async fn writes_to_the_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = knit_graph::NativeRuntime;
        write_files(
            &runtime,
            dir.path(),
            &[("index.html", b"<html></html>"), ("js/bundle.js", b"1;")],
            WriteOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(dir.path().join("js/bundle.js")).unwrap(), b"1;");
        assert!(!dir.path().join("index.html.tmp").exists());
    }
}
