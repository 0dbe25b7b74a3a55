//! Plugin hook system.
//!
//! Plugins observe and extend a build at six hooks ([`HookName`]). The
//! [`PluginDriver`] keeps an explicit, ordered handler list per hook and runs
//! handlers strictly in registration order; the first failure aborts the
//! build as a [`PluginError`].
//!
//! Built-in plugins:
//! - [`HtmlPlugin`] (`html`): writes the HTML shell at `after-emit`
//! - [`CopyPlugin`] (`copy`): copies static files into the output at `before-emit`

mod copy;
mod driver;
mod factory;
mod html;

pub use copy::{CopyPattern, CopyPlugin};
pub use driver::PluginDriver;
pub use factory::{PluginConstructor, PluginFactory};
pub use html::{HtmlPlugin, HtmlPluginOptions};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use knit_config::{BuildConfig, InjectionPoint};
use knit_graph::{ModuleGraph, ModuleId, ModuleNode, Runtime};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::emitter::{BuildManifest, EmittedAsset};

/// Build phases a plugin can hook into, in the order they fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookName {
    Init,
    BeforeResolve,
    AfterLoad,
    GraphComplete,
    BeforeEmit,
    AfterEmit,
}

impl HookName {
    pub const ALL: [HookName; 6] = [
        HookName::Init,
        HookName::BeforeResolve,
        HookName::AfterLoad,
        HookName::GraphComplete,
        HookName::BeforeEmit,
        HookName::AfterEmit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookName::Init => "init",
            HookName::BeforeResolve => "before-resolve",
            HookName::AfterLoad => "after-load",
            HookName::GraphComplete => "graph-complete",
            HookName::BeforeEmit => "before-emit",
            HookName::AfterEmit => "after-emit",
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin handler failed.
#[derive(Debug, Error, Diagnostic)]
#[error("plugin '{plugin}' failed in the {hook} hook: {cause}")]
#[diagnostic(code(knit::plugin::failed))]
pub struct PluginError {
    pub hook: HookName,
    pub plugin: String,
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

impl PluginError {
    pub fn new(hook: HookName, plugin: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            hook,
            plugin: plugin.into(),
            cause: cause.into(),
        }
    }
}

/// Per-build state shared by every plugin.
///
/// Created fresh for each build and dropped with it.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub root: PathBuf,
    pub output_dir: PathBuf,
    pub public_path: String,
    pub injection_point: InjectionPoint,
    /// Text of the configured HTML template, if any.
    pub html_template: Option<String>,
    pub html_filename: String,
    /// HTML shell produced by the `html` plugin.
    pub html: Option<String>,
    /// Extra output files, appended to the manifest after emission.
    pub extra_assets: Vec<EmittedAsset>,
    /// Free-form values plugins use to talk to each other.
    pub variables: IndexMap<String, Value>,
    pub runtime: Arc<dyn Runtime>,
}

impl PluginContext {
    pub fn new(config: &BuildConfig, root: impl Into<PathBuf>, runtime: Arc<dyn Runtime>) -> Self {
        let root = root.into();
        Self {
            output_dir: config.output_path(&root),
            root,
            public_path: config.public_path.clone(),
            injection_point: config.html_injection_point.clone(),
            html_template: None,
            html_filename: config.html_filename.clone(),
            html: None,
            extra_assets: Vec::new(),
            variables: IndexMap::new(),
            runtime,
        }
    }

    pub fn emit_asset(&mut self, asset: EmittedAsset) {
        self.extra_assets.push(asset);
    }
}

/// A build plugin. Every hook defaults to a no-op; [`Plugin::hooks`] lists
/// the hooks [`PluginDriver::register_plugin`] wires up.
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn hooks(&self) -> &[HookName];

    async fn init(&self, _cx: &mut PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Rewrite a specifier before it is resolved. `None` keeps it.
    async fn before_resolve(
        &self,
        _cx: &mut PluginContext,
        _specifier: &str,
        _importer: &ModuleId,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// Inspect a freshly loaded module. Returned specifiers become extra
    /// dependencies of that module, resolved relative to it.
    async fn after_load(
        &self,
        _cx: &mut PluginContext,
        _module: &ModuleNode,
    ) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn graph_complete(&self, _cx: &mut PluginContext, _graph: &ModuleGraph) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_emit(&self, _cx: &mut PluginContext, _graph: &ModuleGraph) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_emit(
        &self,
        _cx: &mut PluginContext,
        _manifest: &BuildManifest,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
