//! `node_modules` lookup for bare specifiers.

use std::path::{Path, PathBuf};

use knit_graph::Runtime;
use serde::Deserialize;
use tracing::debug;

use super::probe;

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    main: Option<String>,
}

/// Split `@scope/pkg/sub/path` into (`@scope/pkg`, `sub/path`).
pub(crate) fn split_package_specifier(specifier: &str) -> Option<(&str, &str)> {
    let mut slashes = specifier.match_indices('/').map(|(i, _)| i);
    let name_end = if specifier.starts_with('@') {
        // Scoped packages need both segments.
        slashes.nth(1)
    } else {
        slashes.next()
    };

    let (name, rest) = match name_end {
        Some(end) => (&specifier[..end], &specifier[end + 1..]),
        None => (specifier, ""),
    };
    if name.is_empty() || (name.starts_with('@') && !name.contains('/')) {
        return None;
    }
    Some((name, rest))
}

/// Find the nearest package directory named `name`, walking from `from_dir`
/// up to and including `root`.
async fn find_package_dir(
    name: &str,
    from_dir: &Path,
    root: &Path,
    runtime: &dyn Runtime,
) -> Option<PathBuf> {
    for dir in from_dir.ancestors() {
        if !dir.starts_with(root) {
            break;
        }
        let candidate = dir.join("node_modules").join(name);
        if runtime.is_dir(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

/// Resolve a bare specifier to a file inside `node_modules`.
///
/// The package entry comes from `package.json` `module`, then `main`, then
/// `index.js`; subpaths (`pkg/sub/file`) are probed inside the package.
pub(crate) async fn resolve_package(
    specifier: &str,
    from_dir: &Path,
    root: &Path,
    extensions: &[&str],
    runtime: &dyn Runtime,
) -> Option<PathBuf> {
    let (name, subpath) = split_package_specifier(specifier)?;
    let package_dir = find_package_dir(name, from_dir, root, runtime).await?;

    if !subpath.is_empty() {
        return probe::probe_file(&package_dir.join(subpath), extensions, runtime).await;
    }

    let manifest = match runtime.read_file(&package_dir.join("package.json")).await {
        Ok(bytes) => serde_json::from_slice::<PackageJson>(&bytes).unwrap_or_else(|err| {
            debug!(package = name, %err, "ignoring unreadable package.json");
            PackageJson::default()
        }),
        Err(_) => PackageJson::default(),
    };

    let entry = manifest
        .module
        .or(manifest.main)
        .unwrap_or_else(|| "index.js".to_string());
    probe::probe_file(&package_dir.join(entry), extensions, runtime).await
}
