use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use knit_graph::{ModuleGraph, Runtime, validate_path_within_root};
use path_clean::PathClean;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{HookName, Plugin, PluginContext};
use crate::emitter::{AssetKind, EmittedAsset};

/// One `from` -> `to` copy rule.
///
/// A file is copied to `to` (default: its own name). A directory is copied
/// recursively below `to` (default: the output root).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyPattern {
    /// Source path, relative to the project root.
    pub from: PathBuf,
    /// Destination, relative to the output directory.
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CopyOptions {
    patterns: Vec<CopyPattern>,
}

/// Copies static files into the output unchanged and unhashed.
#[derive(Debug, Clone, Default)]
pub struct CopyPlugin {
    patterns: Vec<CopyPattern>,
}

impl CopyPlugin {
    pub fn new(patterns: Vec<CopyPattern>) -> Self {
        Self { patterns }
    }

    /// Build from `{ "patterns": [{ "from": "static", "to": "assets" }] }`.
    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        let options: CopyOptions =
            serde_json::from_value(value.clone()).context("invalid copy plugin options")?;
        Ok(Self::new(options.patterns))
    }
}

#[async_trait]
impl Plugin for CopyPlugin {
    fn name(&self) -> &str {
        "copy"
    }

    fn hooks(&self) -> &[HookName] {
        &[HookName::BeforeEmit]
    }

    async fn before_emit(&self, cx: &mut PluginContext, _graph: &ModuleGraph) -> anyhow::Result<()> {
        for pattern in &self.patterns {
            let source = cx.root.join(&pattern.from).clean();
            validate_path_within_root(&source, &cx.root)?;
            // Held apart from `cx` so assets can be pushed while reading.
            let runtime = Arc::clone(&cx.runtime);

            let files = if runtime.is_dir(&source).await {
                let prefix = pattern.to.as_deref().unwrap_or("");
                collect_dir(runtime.as_ref(), &source)
                    .await?
                    .into_iter()
                    .map(|(relative, path)| (join_output(prefix, &relative), path))
                    .collect()
            } else if runtime.is_file(&source).await {
                let name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let target = match pattern.to.as_deref() {
                    Some(to) if to.ends_with('/') => join_output(to, &name),
                    Some(to) if !to.is_empty() => to.to_string(),
                    _ => name,
                };
                vec![(target, source.clone())]
            } else {
                bail!("copy source {} does not exist", source.display());
            };

            for (filename, path) in files {
                let content = runtime
                    .read_file(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                debug!(from = %path.display(), to = %filename, "copying static file");
                cx.emit_asset(EmittedAsset::new(filename, content, AssetKind::Other, None));
            }
        }
        Ok(())
    }
}

fn join_output(prefix: &str, relative: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() || prefix == "." {
        relative.to_string()
    } else {
        format!("{prefix}/{relative}")
    }
}

/// Every file below `dir` as (`/`-separated relative path, absolute path),
/// sorted by relative path.
async fn collect_dir(runtime: &dyn Runtime, dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![(String::new(), dir.to_path_buf())];

    while let Some((prefix, current)) = pending.pop() {
        let entries = runtime
            .read_dir(&current)
            .await
            .with_context(|| format!("failed to list {}", current.display()))?;
        for name in entries {
            let path = current.join(&name);
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            if runtime.is_dir(&path).await {
                pending.push((relative, path));
            } else {
                files.push((relative, path));
            }
        }
    }

    files.sort();
    Ok(files)
}
