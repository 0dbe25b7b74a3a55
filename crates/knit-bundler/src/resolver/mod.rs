//! Specifier resolution.
//!
//! A [`Resolver`] maps an import specifier plus the importing module to a
//! [`ModuleId`] and [`ModuleKind`]. Several strategies are installed in a fixed
//! priority order and every applicable one is evaluated: no hit is
//! [`ResolutionError::NotFound`], more than one distinct hit is
//! [`ResolutionError::Ambiguous`]. Nothing is ever picked silently.
//!
//! Resolution only looks at the filesystem through the [`Runtime`], so for a
//! given snapshot it is a pure function of its inputs.

mod package;
mod probe;

pub use probe::EXTENSIONS;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use knit_graph::{
    COMPILED_TAG, FOREIGN_TAG, ModuleId, ModuleKind, Runtime, validate_path_within_root,
};
use miette::Diagnostic;
use path_clean::PathClean;
use thiserror::Error;
use tracing::debug;

/// Resolution strategies in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Path into the configured foreign compile unit.
    ForeignUnit,
    /// Configured prefix rewrite (`@/x` -> `src/x`).
    Alias,
    /// Relative or absolute path naming an existing file.
    ExplicitPath,
    /// Bare package specifier looked up in `node_modules`.
    PackageRoot,
    /// Path with an implied extension or directory index.
    ExtensionProbe,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::ForeignUnit,
        Strategy::Alias,
        Strategy::ExplicitPath,
        Strategy::PackageRoot,
        Strategy::ExtensionProbe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ForeignUnit => "foreign-unit",
            Strategy::Alias => "alias",
            Strategy::ExplicitPath => "explicit-path",
            Strategy::PackageRoot => "package-root",
            Strategy::ExtensionProbe => "extension-probe",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("cannot resolve '{specifier}' from {} (tried: {})", importer_label(.importer), strategy_list(.tried))]
    #[diagnostic(
        code(knit::resolve::not_found),
        help("Check the path and extension, or add an entry to 'alias'")
    )]
    NotFound {
        specifier: String,
        importer: Option<ModuleId>,
        tried: Vec<Strategy>,
    },

    #[error("'{specifier}' from {} is ambiguous: {}", importer_label(.importer), candidate_list(.candidates))]
    #[diagnostic(
        code(knit::resolve::ambiguous),
        help("Spell the specifier with its extension or full path so only one candidate matches")
    )]
    Ambiguous {
        specifier: String,
        importer: Option<ModuleId>,
        candidates: Vec<(Strategy, ModuleId)>,
    },

    #[error("'{specifier}' resolves to {}, outside the project root {}", path.display(), root.display())]
    #[diagnostic(code(knit::resolve::outside_root))]
    OutsideRoot {
        specifier: String,
        path: PathBuf,
        root: PathBuf,
    },

    #[error("invalid specifier '{specifier}': {reason}")]
    #[diagnostic(code(knit::resolve::invalid_specifier))]
    InvalidSpecifier { specifier: String, reason: String },
}

impl ResolutionError {
    pub fn specifier(&self) -> &str {
        match self {
            Self::NotFound { specifier, .. }
            | Self::Ambiguous { specifier, .. }
            | Self::OutsideRoot { specifier, .. }
            | Self::InvalidSpecifier { specifier, .. } => specifier,
        }
    }
}

fn importer_label(importer: &Option<ModuleId>) -> String {
    importer
        .as_ref()
        .map_or_else(|| "the project root".to_string(), |id| id.to_string())
}

fn strategy_list(tried: &[Strategy]) -> String {
    tried.iter().map(Strategy::as_str).collect::<Vec<_>>().join(", ")
}

fn candidate_list(candidates: &[(Strategy, ModuleId)]) -> String {
    candidates
        .iter()
        .map(|(strategy, id)| format!("{strategy} -> {id}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Layout of the foreign compile unit on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignUnitLayout {
    /// Directory containing `Cargo.toml`.
    pub dir: PathBuf,
    /// Compiler output directory (absolute).
    pub out_dir: PathBuf,
}

impl ForeignUnitLayout {
    pub fn new(dir: impl Into<PathBuf>, out_dir: impl AsRef<Path>) -> Self {
        let dir = dir.into().clean();
        let out_dir = dir.join(out_dir).clean();
        Self { dir, out_dir }
    }

    /// Placeholder id for the unit.
    pub fn module_id(&self) -> Option<ModuleId> {
        ModuleId::new(&self.dir).ok().map(|id| id.with_tag(FOREIGN_TAG))
    }

    /// Paths owned by the unit: its directory, its manifest, and anything the
    /// compiler writes.
    pub fn claims(&self, path: &Path) -> bool {
        path == self.dir || path == self.dir.join("Cargo.toml") || path.starts_with(&self.out_dir)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    pub root: PathBuf,
    pub alias: IndexMap<String, String>,
    pub foreign_unit: Option<ForeignUnitLayout>,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: ModuleId,
    pub kind: ModuleKind,
    /// Highest-priority strategy that produced the hit.
    pub strategy: Strategy,
}

#[derive(Debug, Clone)]
pub struct Resolver {
    options: ResolverOptions,
    runtime: Arc<dyn Runtime>,
}

impl Resolver {
    pub fn new(options: ResolverOptions, runtime: Arc<dyn Runtime>) -> Self {
        let mut options = options;
        options.root = options.root.clean();
        Self { options, runtime }
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    pub fn foreign_unit(&self) -> Option<&ForeignUnitLayout> {
        self.options.foreign_unit.as_ref()
    }

    /// Resolve `specifier` as written in `importer`. `None` means an entry
    /// specifier, which is always taken relative to the project root.
    pub async fn resolve(
        &self,
        specifier: &str,
        importer: Option<&ModuleId>,
    ) -> Result<Resolved, ResolutionError> {
        let trimmed = strip_query(specifier.trim());
        if trimmed.is_empty() {
            return Err(ResolutionError::InvalidSpecifier {
                specifier: specifier.to_string(),
                reason: "empty specifier".to_string(),
            });
        }

        let spelled: std::borrow::Cow<'_, str> = match importer {
            None if !is_path_like(trimmed) => format!("./{trimmed}").into(),
            _ => trimmed.into(),
        };
        let base_dir = match importer {
            Some(id) => id
                .as_path()
                .parent()
                .map_or_else(|| self.options.root.clone(), Path::to_path_buf),
            None => self.options.root.clone(),
        };
        // Compiled glue lives inside the unit's output directory and may
        // reference siblings there.
        let from_compiled = importer.is_some_and(|id| id.tag() == Some(COMPILED_TAG));

        let path_like = is_path_like(&spelled);
        let target = path_like.then(|| {
            if Path::new(spelled.as_ref()).is_absolute() {
                PathBuf::from(spelled.as_ref()).clean()
            } else {
                base_dir.join(spelled.as_ref()).clean()
            }
        });

        let mut hits: Vec<(Strategy, PathBuf, ModuleKind)> = Vec::new();
        let mut tried = Vec::new();
        let extensions = EXTENSIONS;
        let runtime = self.runtime.as_ref();

        for strategy in Strategy::ALL {
            match strategy {
                Strategy::ForeignUnit => {
                    let (Some(unit), Some(target)) = (&self.options.foreign_unit, &target) else {
                        continue;
                    };
                    if from_compiled {
                        continue;
                    }
                    tried.push(strategy);
                    if unit.claims(target) {
                        hits.push((strategy, unit.dir.clone(), ModuleKind::ForeignCompiled));
                    }
                }
                Strategy::Alias => {
                    let Some(rewritten) = self.apply_alias(&spelled) else {
                        continue;
                    };
                    tried.push(strategy);
                    if let Some(found) = probe::probe_file(&rewritten, extensions, runtime).await {
                        hits.push((strategy, found, ModuleKind::Script));
                    }
                }
                Strategy::ExplicitPath => {
                    let Some(target) = &target else { continue };
                    tried.push(strategy);
                    if runtime.is_file(target).await {
                        hits.push((strategy, target.clone(), ModuleKind::Script));
                    }
                }
                Strategy::PackageRoot => {
                    if path_like {
                        continue;
                    }
                    tried.push(strategy);
                    if let Some(found) = package::resolve_package(
                        &spelled,
                        &base_dir,
                        &self.options.root,
                        extensions,
                        runtime,
                    )
                    .await
                    {
                        hits.push((strategy, found, ModuleKind::Script));
                    }
                }
                Strategy::ExtensionProbe => {
                    let Some(target) = &target else { continue };
                    tried.push(strategy);
                    let found = match probe::with_extensions(target, extensions, runtime).await {
                        Some(found) => Some(found),
                        None => probe::index_file(target, extensions, runtime).await,
                    };
                    if let Some(found) = found {
                        hits.push((strategy, found, ModuleKind::Script));
                    }
                }
            }
        }

        // Files owned by the unit are reachable only through the unit itself.
        if let Some(unit) = &self.options.foreign_unit {
            if !from_compiled {
                hits.retain(|(strategy, path, _)| {
                    *strategy == Strategy::ForeignUnit || !unit.claims(path)
                });
            }
        }

        let mut distinct: Vec<(Strategy, ModuleId, ModuleKind)> = Vec::new();
        for (strategy, path, kind) in hits {
            if let Err(err) = validate_path_within_root(&path, &self.options.root) {
                return Err(ResolutionError::OutsideRoot {
                    specifier: specifier.to_string(),
                    path: err.path,
                    root: err.root,
                });
            }
            let id = ModuleId::new(&path).map_err(|e| ResolutionError::InvalidSpecifier {
                specifier: specifier.to_string(),
                reason: e.to_string(),
            })?;
            let (id, kind) = if kind == ModuleKind::ForeignCompiled {
                (id.with_tag(FOREIGN_TAG), kind)
            } else {
                let kind = ModuleKind::from_path(id.as_path());
                (id, kind)
            };
            if !distinct.iter().any(|(_, existing, _)| *existing == id) {
                distinct.push((strategy, id, kind));
            }
        }

        match distinct.len() {
            0 => Err(ResolutionError::NotFound {
                specifier: specifier.to_string(),
                importer: importer.cloned(),
                tried,
            }),
            1 => {
                let (strategy, id, kind) = distinct.remove(0);
                debug!(specifier, %id, %strategy, "resolved");
                Ok(Resolved { id, kind, strategy })
            }
            _ => Err(ResolutionError::Ambiguous {
                specifier: specifier.to_string(),
                importer: importer.cloned(),
                candidates: distinct.into_iter().map(|(s, id, _)| (s, id)).collect(),
            }),
        }
    }

    /// Rewrite `specifier` through the first matching alias prefix.
    fn apply_alias(&self, specifier: &str) -> Option<PathBuf> {
        for (prefix, target) in &self.options.alias {
            let rest = if specifier == prefix {
                ""
            } else if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
                match rest.strip_prefix('/') {
                    Some(rest) => rest,
                    None if prefix.ends_with('/') => rest,
                    None => continue,
                }
            } else {
                continue;
            };

            let base = self.options.root.join(target);
            let rewritten = if rest.is_empty() {
                base
            } else {
                base.join(rest)
            };
            return Some(rewritten.clean());
        }
        None
    }
}

/// `./x`, `../x`, `/x`, `.` and `..` are path-like; everything else is bare.
pub fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
        || specifier == ".."
}

/// Drop `?query` and `#fragment` suffixes (`./font.woff?v=3`).
fn strip_query(specifier: &str) -> &str {
    let end = specifier.find(['?', '#']).unwrap_or(specifier.len());
    &specifier[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use knit_graph::test_utils::MemoryRuntime;

    fn resolver(runtime: MemoryRuntime, options: ResolverOptions) -> Resolver {
        Resolver::new(options, Arc::new(runtime))
    }

    fn root_options() -> ResolverOptions {
        ResolverOptions {
            root: PathBuf::from("/proj"),
            ..ResolverOptions::default()
        }
    }

    fn id(path: &str) -> ModuleId {
        ModuleId::new(path).unwrap()
    }

    #[tokio::test]
    async fn entry_is_root_relative() {
        let runtime = MemoryRuntime::new("/proj").with_file("/proj/src/index.js", "");
        let resolver = resolver(runtime, root_options());

        let resolved = resolver.resolve("src/index.js", None).await.unwrap();
        assert_eq!(resolved.id, id("/proj/src/index.js"));
        assert_eq!(resolved.kind, ModuleKind::Script);
        assert_eq!(resolved.strategy, Strategy::ExplicitPath);
    }

    #[tokio::test]
    async fn extension_and_index_probing() {
        let runtime = MemoryRuntime::new("/proj")
            .with_file("/proj/src/util.ts", "")
            .with_file("/proj/src/components/index.jsx", "");
        let resolver = resolver(runtime, root_options());
        let importer = id("/proj/src/index.js");

        let util = resolver.resolve("./util", Some(&importer)).await.unwrap();
        assert_eq!(util.id, id("/proj/src/util.ts"));
        assert_eq!(util.strategy, Strategy::ExtensionProbe);

        let components = resolver.resolve("./components", Some(&importer)).await.unwrap();
        assert_eq!(components.id, id("/proj/src/components/index.jsx"));
    }

    #[tokio::test]
    async fn two_distinct_hits_are_ambiguous() {
        let runtime = MemoryRuntime::new("/proj")
            .with_file("/proj/src/data", "raw")
            .with_file("/proj/src/data.js", "");
        let resolver = resolver(runtime, root_options());

        let err = resolver
            .resolve("./data", Some(&id("/proj/src/index.js")))
            .await
            .unwrap_err();
        match err {
            ResolutionError::Ambiguous { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].0, Strategy::ExplicitPath);
                assert_eq!(candidates[1].0, Strategy::ExtensionProbe);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_reports_tried_strategies() {
        let resolver = resolver(MemoryRuntime::new("/proj"), root_options());
        let err = resolver
            .resolve("./nope", Some(&id("/proj/src/index.js")))
            .await
            .unwrap_err();
        match err {
            ResolutionError::NotFound { tried, .. } => {
                assert_eq!(tried, vec![Strategy::ExplicitPath, Strategy::ExtensionProbe]);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn package_entry_fields() {
        let runtime = MemoryRuntime::new("/proj")
            .with_file(
                "/proj/node_modules/pretty/package.json",
                r#"{ "main": "lib/main.js", "module": "esm/index" }"#,
            )
            .with_file("/proj/node_modules/pretty/esm/index.mjs", "")
            .with_file("/proj/node_modules/pretty/lib/main.js", "")
            .with_file("/proj/node_modules/@ui/kit/index.js", "")
            .with_file("/proj/node_modules/@ui/kit/dist/kit.css", "");
        let resolver = resolver(runtime, root_options());
        let importer = id("/proj/src/deep/a.js");

        let pretty = resolver.resolve("pretty", Some(&importer)).await.unwrap();
        assert_eq!(pretty.id, id("/proj/node_modules/pretty/esm/index.mjs"));
        assert_eq!(pretty.strategy, Strategy::PackageRoot);

        let kit = resolver.resolve("@ui/kit", Some(&importer)).await.unwrap();
        assert_eq!(kit.id, id("/proj/node_modules/@ui/kit/index.js"));

        let css = resolver
            .resolve("@ui/kit/dist/kit.css", Some(&importer))
            .await
            .unwrap();
        assert_eq!(css.kind, ModuleKind::Style);
    }

    #[tokio::test]
    async fn alias_rewrites_to_root() {
        let runtime = MemoryRuntime::new("/proj").with_file("/proj/src/lib/math.js", "");
        let mut options = root_options();
        options.alias.insert("@".into(), "src".into());
        let resolver = resolver(runtime, options);

        let resolved = resolver
            .resolve("@/lib/math", Some(&id("/proj/src/app/x.js")))
            .await
            .unwrap();
        assert_eq!(resolved.id, id("/proj/src/lib/math.js"));
        assert_eq!(resolved.strategy, Strategy::Alias);
    }

    #[tokio::test]
    async fn foreign_unit_claims_directory_and_output() {
        let runtime = MemoryRuntime::new("/proj")
            .with_file("/proj/crate/Cargo.toml", "[package]\nname = \"app\"\n")
            .with_file("/proj/crate/pkg/app.js", "stale");
        let mut options = root_options();
        options.foreign_unit = Some(ForeignUnitLayout::new("/proj/crate", "pkg"));
        let resolver = resolver(runtime, options);
        let importer = id("/proj/src/index.js");

        for spec in ["../crate", "../crate/Cargo.toml", "../crate/pkg/app.js", "../crate/pkg"] {
            let resolved = resolver.resolve(spec, Some(&importer)).await.unwrap();
            assert_eq!(resolved.id, id("/proj/crate").with_tag(FOREIGN_TAG), "{spec}");
            assert_eq!(resolved.kind, ModuleKind::ForeignCompiled);
            assert_eq!(resolved.strategy, Strategy::ForeignUnit);
        }
    }

    #[tokio::test]
    async fn compiled_glue_reaches_its_siblings() {
        let runtime = MemoryRuntime::new("/proj")
            .with_file("/proj/crate/Cargo.toml", "")
            .with_file("/proj/crate/pkg/snippets/helper.js", "");
        let mut options = root_options();
        options.foreign_unit = Some(ForeignUnitLayout::new("/proj/crate", "pkg"));
        let resolver = resolver(runtime, options);
        let glue = id("/proj/crate/pkg/app.js").with_tag(COMPILED_TAG);

        let resolved = resolver
            .resolve("./snippets/helper.js", Some(&glue))
            .await
            .unwrap();
        assert_eq!(resolved.id, id("/proj/crate/pkg/snippets/helper.js"));
    }

    #[tokio::test]
    async fn escaping_the_root_is_rejected() {
        let runtime = MemoryRuntime::new("/").with_file("/etc/secret.js", "");
        let resolver = resolver(runtime, root_options());

        let err = resolver
            .resolve("../../etc/secret.js", Some(&id("/proj/src/index.js")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::OutsideRoot { .. }));
    }

    #[tokio::test]
    async fn query_suffix_is_ignored() {
        let runtime = MemoryRuntime::new("/proj").with_file("/proj/src/font.woff", "");
        let resolver = resolver(runtime, root_options());

        let resolved = resolver
            .resolve("./font.woff?v=3#iefix", Some(&id("/proj/src/a.css")))
            .await
            .unwrap();
        assert_eq!(resolved.kind, ModuleKind::Asset);
    }
}
