//! Loader registry and per-kind transform chains.
//!
//! A [`Loader`] turns bytes into bytes. Loaders are registered by name and
//! arranged into one ordered chain per [`ModuleKind`]; the chain runs left to
//! right and stops at the first failure. Loaders only transform content. New
//! modules enter the graph through the after-load plugin hook, never through a
//! loader.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use knit_config::ConfigError;
use knit_graph::{ModuleId, ModuleKind};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

/// What a loader knows about the module it is transforming.
#[derive(Debug, Clone, Copy)]
pub struct LoaderContext<'a> {
    pub module_id: &'a ModuleId,
    pub kind: ModuleKind,
    pub root: &'a Path,
}

pub trait Loader: Send + Sync {
    /// Name used in `loaders` chains.
    fn name(&self) -> &str;

    fn transform(&self, content: Vec<u8>, cx: &LoaderContext<'_>) -> anyhow::Result<Vec<u8>>;
}

/// Adapts a closure into a [`Loader`].
pub struct FnLoader<F> {
    name: String,
    f: F,
}

impl<F> FnLoader<F>
where
    F: Fn(Vec<u8>, &LoaderContext<'_>) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Loader for FnLoader<F>
where
    F: Fn(Vec<u8>, &LoaderContext<'_>) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, content: Vec<u8>, cx: &LoaderContext<'_>) -> anyhow::Result<Vec<u8>> {
        (self.f)(content, cx)
    }
}

impl<F> fmt::Debug for FnLoader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLoader").field("name", &self.name).finish()
    }
}

/// A loader in a chain failed.
#[derive(Debug, Error, Diagnostic)]
#[error("loader '{loader_name}' failed on {module_id}: {cause}")]
#[diagnostic(code(knit::transform::failed))]
pub struct TransformError {
    pub loader_name: String,
    pub module_id: ModuleId,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct LoaderRegistry {
    available: IndexMap<String, Arc<dyn Loader>>,
    chains: FxHashMap<ModuleKind, Vec<Arc<dyn Loader>>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a loader available by its name. A later registration under the
    /// same name replaces the earlier one for chains configured afterwards.
    pub fn register(&mut self, loader: Arc<dyn Loader>) {
        self.available.insert(loader.name().to_string(), loader);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.available.contains_key(name)
    }

    /// Set the chain for `kind` from registered loader names.
    pub fn set_chain<S: AsRef<str>>(&mut self, kind: ModuleKind, names: &[S]) -> Result<(), ConfigError> {
        let chain = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.available
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownLoader {
                        kind: kind.to_string(),
                        name: name.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.chains.insert(kind, chain);
        Ok(())
    }

    /// Set every chain named in a `loaders` config table.
    pub fn from_config(&mut self, loaders: &IndexMap<String, Vec<String>>) -> Result<(), ConfigError> {
        for (kind, names) in loaders {
            let kind = kind.parse::<ModuleKind>().map_err(|message| ConfigError::SchemaValidation {
                message,
                hint: None,
            })?;
            self.set_chain(kind, names)?;
        }
        Ok(())
    }

    /// The chain for `kind`, empty when none is configured.
    pub fn loaders_for(&self, kind: ModuleKind) -> &[Arc<dyn Loader>] {
        self.chains.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run the chain for `kind` over `content`.
    pub fn run(
        &self,
        kind: ModuleKind,
        module_id: &ModuleId,
        root: &Path,
        content: Vec<u8>,
    ) -> Result<Vec<u8>, TransformError> {
        let cx = LoaderContext {
            module_id,
            kind,
            root,
        };

        let mut content = content;
        for loader in self.loaders_for(kind) {
            trace!(loader = loader.name(), module = %module_id, "transform");
            content = loader
                .transform(content, &cx)
                .map_err(|cause| TransformError {
                    loader_name: loader.name().to_string(),
                    module_id: module_id.clone(),
                    cause: cause.into(),
                })?;
        }
        Ok(content)
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains: Vec<_> = ModuleKind::ALL
            .iter()
            .filter_map(|kind| {
                self.chains.get(kind).map(|chain| {
                    let names: Vec<_> = chain.iter().map(|l| l.name().to_string()).collect();
                    (kind.as_str(), names)
                })
            })
            .collect();
        f.debug_struct("LoaderRegistry")
            .field("available", &self.available.keys().collect::<Vec<_>>())
            .field("chains", &chains)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn upper() -> Arc<dyn Loader> {
        Arc::new(FnLoader::new("upper", |content: Vec<u8>, _cx: &LoaderContext<'_>| {
            Ok(content.to_ascii_uppercase())
        }))
    }

    fn suffix() -> Arc<dyn Loader> {
        Arc::new(FnLoader::new("suffix", |mut content: Vec<u8>, cx: &LoaderContext<'_>| {
            content.extend_from_slice(format!("/*{}*/", cx.kind).as_bytes());
            Ok(content)
        }))
    }

    fn failing() -> Arc<dyn Loader> {
        Arc::new(FnLoader::new("broken", |_content: Vec<u8>, _cx: &LoaderContext<'_>| {
            anyhow::bail!("unexpected token")
        }))
    }

    fn id() -> ModuleId {
        ModuleId::new("/proj/a.css").unwrap()
    }

    #[test]
    fn chain_runs_in_order() {
        let mut registry = LoaderRegistry::new();
        registry.register(upper());
        registry.register(suffix());
        registry
            .set_chain(ModuleKind::Style, &["upper", "suffix"])
            .unwrap();

        let out = registry
            .run(ModuleKind::Style, &id(), &PathBuf::from("/proj"), b"a{}".to_vec())
            .unwrap();
        assert_eq!(out, b"A{}/*style*/");
    }

    #[test]
    fn empty_chain_is_identity() {
        let registry = LoaderRegistry::new();
        let out = registry
            .run(ModuleKind::Script, &id(), Path::new("/proj"), b"x".to_vec())
            .unwrap();
        assert_eq!(out, b"x");
    }

    #[test]
    fn failure_short_circuits() {
        let mut registry = LoaderRegistry::new();
        registry.register(failing());
        registry.register(suffix());
        registry
            .set_chain(ModuleKind::Style, &["broken", "suffix"])
            .unwrap();

        let err = registry
            .run(ModuleKind::Style, &id(), Path::new("/proj"), b"a".to_vec())
            .unwrap_err();
        assert_eq!(err.loader_name, "broken");
        assert_eq!(err.module_id, id());
        assert!(err.cause.to_string().contains("unexpected token"));
    }

    #[test]
    fn unknown_loader_name_is_a_config_error() {
        let mut registry = LoaderRegistry::new();
        let err = registry
            .set_chain(ModuleKind::Style, &["missing"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLoader { .. }));
    }

    #[test]
    fn from_config_parses_kinds() {
        let mut registry = LoaderRegistry::new();
        registry.register(upper());

        let mut loaders = IndexMap::new();
        loaders.insert("script".to_string(), vec!["upper".to_string()]);
        registry.from_config(&loaders).unwrap();
        assert_eq!(registry.loaders_for(ModuleKind::Script).len(), 1);

        loaders.insert("pictures".to_string(), vec![]);
        assert!(registry.from_config(&loaders).is_err());
    }
}
