use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModuleId;

/// What a module is, which decides its loader chain and how it is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// JavaScript/TypeScript source linked into the script bundle.
    Script,
    /// Stylesheet collected into the stylesheet artifact.
    Style,
    /// A unit compiled by an external toolchain (e.g. a Rust crate via wasm-pack).
    ForeignCompiled,
    /// Opaque file copied through to the output under a content-hashed name.
    Asset,
}

impl ModuleKind {
    /// Every kind, in declaration order.
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Script,
        ModuleKind::Style,
        ModuleKind::ForeignCompiled,
        ModuleKind::Asset,
    ];

    /// Derive the kind from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "mts" | "cts" | "tsx" => Self::Script,
            "css" => Self::Style,
            _ => Self::Asset,
        }
    }

    /// Infer the kind from a file path.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .map_or(Self::Asset, |ext| Self::from_extension(&ext))
    }

    /// Name used in configuration files (`loaders.style = [...]`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style => "style",
            Self::ForeignCompiled => "foreign_compiled",
            Self::Asset => "asset",
        }
    }

    /// Kinds whose transformed content is scanned for further dependencies.
    pub fn has_dependencies(&self) -> bool {
        matches!(self, Self::Script | Self::Style)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "script" | "js" => Ok(Self::Script),
            "style" | "css" => Ok(Self::Style),
            "foreign_compiled" | "foreigncompiled" | "foreign" => Ok(Self::ForeignCompiled),
            "asset" => Ok(Self::Asset),
            other => Err(format!("unknown module kind: {other}")),
        }
    }
}

/// A resolved and loaded module.
///
/// Nodes are built by their own load phase and are read-only once the graph
/// that owns them is complete.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub kind: ModuleKind,
    /// Bytes as read from disk (or synthesized for compiled units).
    pub raw_content: Vec<u8>,
    /// Bytes after the loader chain for `kind` ran.
    pub transformed_content: Vec<u8>,
    /// Dependencies in the order they appear in `transformed_content`.
    pub dependencies: Vec<ModuleId>,
    /// Each specifier as written in the source and the module it linked to.
    pub specifiers: Vec<(String, ModuleId)>,
    pub is_entry: bool,
}

impl ModuleNode {
    /// Create a new node builder with empty content and no dependencies.
    pub fn builder(id: ModuleId, kind: ModuleKind) -> ModuleNodeBuilder {
        ModuleNodeBuilder {
            node: Self {
                id,
                kind,
                raw_content: Vec::new(),
                transformed_content: Vec::new(),
                dependencies: Vec::new(),
                specifiers: Vec::new(),
                is_entry: false,
            },
        }
    }

    /// Record that `specifier` linked to `target`.
    ///
    /// `dependencies` keeps each target once, in first-seen order, while
    /// `specifiers` keeps every distinct spelling.
    pub fn link(&mut self, specifier: impl Into<String>, target: ModuleId) {
        let specifier = specifier.into();
        if !self.dependencies.contains(&target) {
            self.dependencies.push(target.clone());
        }
        if !self.specifiers.iter().any(|(s, _)| *s == specifier) {
            self.specifiers.push((specifier, target));
        }
    }

    /// Transformed content as UTF-8 text, lossily.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.transformed_content)
    }

    /// Rewrite every edge pointing at `from` so it points at `to`.
    pub(crate) fn retarget(&mut self, from: &ModuleId, to: &ModuleId) {
        let mut seen = Vec::with_capacity(self.dependencies.len());
        for dep in self.dependencies.drain(..) {
            let dep = if &dep == from { to.clone() } else { dep };
            if !seen.contains(&dep) {
                seen.push(dep);
            }
        }
        self.dependencies = seen;

        for (_, target) in &mut self.specifiers {
            if target == from {
                *target = to.clone();
            }
        }
    }
}

/// Builder for `ModuleNode` to avoid long argument lists in constructors.
pub struct ModuleNodeBuilder {
    node: ModuleNode,
}

impl ModuleNodeBuilder {
    pub fn raw_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.node.raw_content = content.into();
        self
    }

    pub fn transformed_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.node.transformed_content = content.into();
        self
    }

    /// Set both raw and transformed content to the same bytes.
    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        self.node.transformed_content = content.clone();
        self.node.raw_content = content;
        self
    }

    pub fn dependency(mut self, specifier: impl Into<String>, target: ModuleId) -> Self {
        self.node.link(specifier, target);
        self
    }

    pub fn entry(mut self, is_entry: bool) -> Self {
        self.node.is_entry = is_entry;
        self
    }

    pub fn build(self) -> ModuleNode {
        self.node
    }
}
