//! Bundle emission.
//!
//! [`emit`] turns a finished [`ModuleGraph`] into a [`BuildManifest`]: one
//! script bundle holding a small module registry, one stylesheet holding every
//! style module, and each asset copied through under a content-hashed name.
//! Emission is a pure function of the graph and the options, so two builds of
//! the same inputs produce byte-identical manifests.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::LazyLock;

use indexmap::IndexMap;
use knit_config::BuildConfig;
use knit_graph::{GraphError, ModuleGraph, ModuleId, ModuleKind, ModuleNode};
use miette::Diagnostic;
use regex::{Captures, Regex};
use rustc_hash::FxHashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::link::link_module;

/// Hex characters of the SHA-256 digest used in filenames.
pub const CONTENT_HASH_LEN: usize = 16;

/// `[name]` of the script bundle and the stylesheet.
pub const DEFAULT_BUNDLE_NAME: &str = "bundle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Script,
    Style,
    Binary,
    Other,
}

/// One output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmittedAsset {
    /// Path relative to the output directory.
    pub filename: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub content_hash: String,
    pub kind: AssetKind,
    /// Module the asset was copied from, if any.
    pub source: Option<ModuleId>,
}

impl EmittedAsset {
    pub fn new(
        filename: impl Into<String>,
        content: impl Into<Vec<u8>>,
        kind: AssetKind,
        source: Option<ModuleId>,
    ) -> Self {
        let content = content.into();
        Self {
            filename: filename.into(),
            content_hash: content_hash(&content),
            content,
            kind,
            source,
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Ordered output files plus which one is the entry bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildManifest {
    assets: Vec<EmittedAsset>,
    entry: Option<usize>,
}

impl BuildManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `asset`, rejecting a filename that is already taken.
    pub fn push(&mut self, asset: EmittedAsset) -> Result<(), EmitError> {
        if let Some(existing) = self.get(&asset.filename) {
            return Err(EmitError::FilenameCollision {
                filename: asset.filename.clone(),
                first: describe(existing),
                second: describe(&asset),
            });
        }
        self.assets.push(asset);
        Ok(())
    }

    /// Append the entry bundle.
    pub fn push_entry(&mut self, asset: EmittedAsset) -> Result<(), EmitError> {
        self.push(asset)?;
        self.entry = Some(self.assets.len() - 1);
        Ok(())
    }

    pub fn assets(&self) -> &[EmittedAsset] {
        &self.assets
    }

    pub fn entry(&self) -> Option<&EmittedAsset> {
        self.entry.and_then(|index| self.assets.get(index))
    }

    pub fn get(&self, filename: &str) -> Option<&EmittedAsset> {
        self.assets.iter().find(|asset| asset.filename == filename)
    }

    pub fn of_kind(&self, kind: AssetKind) -> impl Iterator<Item = &EmittedAsset> {
        self.assets.iter().filter(move |asset| asset.kind == kind)
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.assets.iter().map(|asset| asset.filename.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

fn describe(asset: &EmittedAsset) -> String {
    match &asset.source {
        Some(id) => id.to_string(),
        None => format!("{:?} output", asset.kind).to_ascii_lowercase(),
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum EmitError {
    #[error("two outputs would be written to '{filename}': {first} and {second}")]
    #[diagnostic(
        code(knit::emit::filename_collision),
        help("Include [contenthash] in the filename patterns so distinct outputs get distinct names")
    )]
    FilenameCollision {
        filename: String,
        first: String,
        second: String,
    },

    #[error("the module graph has no entries")]
    #[diagnostic(code(knit::emit::no_entries))]
    NoEntries,

    #[error("module {0} is missing from the graph")]
    #[diagnostic(code(knit::emit::missing_module))]
    MissingModule(ModuleId),

    #[error("{module}:{line}: {message}")]
    #[diagnostic(
        code(knit::emit::unsupported_syntax),
        help("Module syntax must use string specifiers and named declarations to be linked into the bundle")
    )]
    UnsupportedSyntax {
        module: ModuleId,
        line: usize,
        message: String,
    },

    #[error("failed to serialize the module registry: {0}")]
    #[diagnostic(code(knit::emit::serialize))]
    Serialize(#[from] serde_json::Error),
}

impl From<GraphError> for EmitError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::ModuleNotFound(id) | GraphError::UnknownEntry(id) => Self::MissingModule(id),
            GraphError::DanglingEdge { to, .. } => Self::MissingModule(to),
            GraphError::DuplicateModule(id) => Self::MissingModule(id),
            GraphError::ModuleId(_) => Self::NoEntries,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmitOptions {
    /// Module keys in the bundle are relative to this directory.
    pub root: PathBuf,
    pub public_path: String,
    pub bundle_name: String,
    pub output_filename_pattern: String,
    pub style_filename_pattern: String,
    pub asset_filename_pattern: String,
}

impl EmitOptions {
    pub fn from_config(config: &BuildConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_path: config.public_path.clone(),
            bundle_name: DEFAULT_BUNDLE_NAME.to_string(),
            output_filename_pattern: config.output_filename_pattern.clone(),
            style_filename_pattern: config.style_filename_pattern.clone(),
            asset_filename_pattern: config.asset_filename_pattern.clone(),
        }
    }

    /// URL the bundle uses for an emitted file.
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}{}", self.public_path, filename)
    }
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self::from_config(&BuildConfig::default(), PathBuf::from("/"))
    }
}

/// First [`CONTENT_HASH_LEN`] hex characters of the SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let mut hex = String::with_capacity(CONTENT_HASH_LEN);
    for byte in digest.iter().take(CONTENT_HASH_LEN / 2) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Fill `[name]`, `[contenthash]` and `[ext]` in `pattern`.
pub fn render_filename(pattern: &str, name: &str, hash: &str, ext: &str) -> String {
    pattern
        .replace("[name]", name)
        .replace("[contenthash]", hash)
        .replace("[ext]", ext)
}

/// Emit `graph` into a manifest: script bundle first, then the stylesheet,
/// then assets in stable order.
pub fn emit(graph: &ModuleGraph, options: &EmitOptions) -> Result<BuildManifest, EmitError> {
    if graph.entries().is_empty() {
        return Err(EmitError::NoEntries);
    }
    let order = graph.stable_order();

    let mut assets = Vec::new();
    let mut asset_files: FxHashMap<&ModuleId, String> = FxHashMap::default();
    for id in &order {
        let node = node(graph, id)?;
        if node.kind != ModuleKind::Asset {
            continue;
        }
        let hash = content_hash(&node.transformed_content);
        let ext = id.extension();
        let filename = render_filename(&options.asset_filename_pattern, &id.file_stem(), &hash, &ext);
        let kind = if ext == "wasm" {
            AssetKind::Binary
        } else {
            AssetKind::Other
        };
        asset_files.insert(*id, filename.clone());
        assets.push(EmittedAsset::new(
            filename,
            node.transformed_content.clone(),
            kind,
            Some((*id).clone()),
        ));
    }

    let mut manifest = BuildManifest::new();

    let script = script_bundle(graph, &order, &asset_files, options)?;
    let script_name = render_filename(
        &options.output_filename_pattern,
        &options.bundle_name,
        &content_hash(script.as_bytes()),
        "js",
    );
    manifest.push_entry(EmittedAsset::new(script_name, script, AssetKind::Script, None))?;

    if let Some(stylesheet) = stylesheet(graph, &order, &asset_files, options)? {
        let style_name = render_filename(
            &options.style_filename_pattern,
            &options.bundle_name,
            &content_hash(stylesheet.as_bytes()),
            "css",
        );
        manifest.push(EmittedAsset::new(style_name, stylesheet, AssetKind::Style, None))?;
    }

    for asset in assets {
        manifest.push(asset)?;
    }

    debug!(files = manifest.len(), modules = graph.len(), "emitted bundle");
    Ok(manifest)
}

fn node<'g>(graph: &'g ModuleGraph, id: &ModuleId) -> Result<&'g ModuleNode, EmitError> {
    graph
        .get(id)
        .ok_or_else(|| EmitError::MissingModule(id.clone()))
}

const REGISTRY_PRELUDE: &str = r#"(function () {
  var __knit_base =
    typeof document !== "undefined" && document.currentScript
      ? document.currentScript.src
      : typeof location !== "undefined"
        ? location.href
        : "";
  var cache = {};
  function __knit_export(exports, getters) {
    Object.defineProperty(exports, "__esModule", { value: true });
    for (var name in getters) {
      Object.defineProperty(exports, name, { enumerable: true, get: getters[name] });
    }
  }
  function __knit_reexport(exports, source) {
    Object.keys(source).forEach(function (name) {
      if (name === "default" || Object.prototype.hasOwnProperty.call(exports, name)) return;
      Object.defineProperty(exports, name, {
        enumerable: true,
        get: function () {
          return source[name];
        },
      });
    });
  }
  function __knit_default(exports) {
    return exports && exports.__esModule ? exports.default : exports;
  }
  function load(modules, key) {
    if (cache[key]) return cache[key].exports;
    var record = modules[key];
    var module = (cache[key] = { exports: {} });
    record[0].call(module.exports, module, module.exports, function (specifier) {
      var target = record[1][specifier];
      if (target === undefined) {
        throw new Error("Cannot find module '" + specifier + "' from '" + key + "'");
      }
      return load(modules, target);
    });
    return module.exports;
  }
  function run(modules, entries) {
    for (var i = 0; i < entries.length; i++) load(modules, entries[i]);
  }
  run({
"#;

fn script_bundle(
    graph: &ModuleGraph,
    order: &[&ModuleId],
    asset_files: &FxHashMap<&ModuleId, String>,
    options: &EmitOptions,
) -> Result<String, EmitError> {
    let root = options.root.as_path();
    let mut out = String::from(REGISTRY_PRELUDE);

    for id in order {
        let node = node(graph, id)?;
        let key = serde_json::to_string(&id.key(root))?;
        let body: Cow<'_, str> = match node.kind {
            ModuleKind::Script => {
                let text = node.text();
                let linked = link_module(&text, |specifier| {
                    node.specifiers.iter().any(|(written, _)| written == specifier)
                })
                .map_err(|err| EmitError::UnsupportedSyntax {
                    module: (*id).clone(),
                    line: err.line,
                    message: err.message,
                })?;
                Cow::Owned(linked.into_owned())
            }
            ModuleKind::Asset => match asset_files.get(id) {
                Some(filename) => format!(
                    "module.exports = {};",
                    serde_json::to_string(&options.public_url(filename))?
                )
                .into(),
                None => Cow::Borrowed(""),
            },
            ModuleKind::Style | ModuleKind::ForeignCompiled => Cow::Borrowed(""),
        };

        let mut links: IndexMap<&str, String> = IndexMap::new();
        if node.kind == ModuleKind::Script {
            for (specifier, target) in &node.specifiers {
                links
                    .entry(specifier.as_str())
                    .or_insert_with(|| target.key(root));
            }
        }
        let links = serde_json::to_string(&links)?;

        if body.is_empty() {
            let _ = writeln!(out, "{key}: [function (module, exports, require) {{}}, {links}],");
        } else {
            let body = body.trim_end_matches('\n');
            let _ = writeln!(
                out,
                "{key}: [function (module, exports, require) {{\n{body}\n}}, {links}],"
            );
        }
    }

    let entries: Vec<String> = graph.entries().iter().map(|id| id.key(root)).collect();
    let entries = serde_json::to_string(&entries)?;
    let _ = writeln!(out, "  }}, {entries});\n}})();");
    Ok(out)
}

static CSS_IMPORT_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;[ \t]*\n?"#)
        .unwrap_or_else(|e| unreachable!("css import rule pattern: {e}"))
});

static CSS_URL_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\burl\(\s*["']?([^"')]+?)["']?\s*\)"#)
        .unwrap_or_else(|e| unreachable!("css url pattern: {e}"))
});

/// Concatenate style modules in stable order. `@import`s of bundled
/// stylesheets are dropped, since their content is already included, and
/// `url()`s of bundled assets point at the emitted file.
fn stylesheet(
    graph: &ModuleGraph,
    order: &[&ModuleId],
    asset_files: &FxHashMap<&ModuleId, String>,
    options: &EmitOptions,
) -> Result<Option<String>, EmitError> {
    let mut parts = Vec::new();
    for id in order {
        let node = node(graph, id)?;
        if node.kind != ModuleKind::Style {
            continue;
        }

        let mut imports: Vec<&str> = Vec::new();
        let mut urls: FxHashMap<&str, String> = FxHashMap::default();
        for (specifier, target) in &node.specifiers {
            match graph.get(target).map(|n| n.kind) {
                Some(ModuleKind::Style) => imports.push(specifier),
                Some(ModuleKind::Asset) => {
                    if let Some(filename) = asset_files.get(target) {
                        urls.insert(specifier, options.public_url(filename));
                    }
                }
                _ => {}
            }
        }

        let text = node.text();
        let text = CSS_IMPORT_RULE.replace_all(&text, |caps: &Captures<'_>| {
            if imports.contains(&&caps[1]) {
                String::new()
            } else {
                caps[0].to_string()
            }
        });
        let text = CSS_URL_REF.replace_all(&text, |caps: &Captures<'_>| {
            match urls.get(caps[1].trim()) {
                Some(url) => format!("url(\"{url}\")"),
                None => caps[0].to_string(),
            }
        });
        parts.push(text.into_owned());
    }

    Ok((!parts.is_empty()).then(|| parts.join("\n")))
}
